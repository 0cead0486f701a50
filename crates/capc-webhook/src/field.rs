//! Field-level admission errors
//!
//! Rendered the way the API server renders field errors, so a denial reads
//! `spec.zones: Required value: Zones` or
//! `spec.offering: Forbidden: offering`.

use std::fmt;

/// Class of a field error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// A field that must be set is missing
    Required,
    /// A value or change is not allowed
    Forbidden,
}

impl FieldErrorKind {
    fn label(self) -> &'static str {
        match self {
            FieldErrorKind::Required => "Required value",
            FieldErrorKind::Forbidden => "Forbidden",
        }
    }
}

/// One rejected field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Error class
    pub kind: FieldErrorKind,
    /// Dotted field path, e.g. `spec.controlPlaneEndpoint.host`
    pub path: String,
    /// Human-readable detail
    pub detail: String,
}

impl FieldError {
    /// Missing required field
    pub fn required(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Required,
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Forbidden value or change
    pub fn forbidden(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Forbidden,
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.path, self.kind.label(), self.detail)
    }
}

/// Push a forbidden-change error when `old` and `new` differ
pub(crate) fn immutable<T: PartialEq + ?Sized>(
    errors: &mut Vec<FieldError>,
    old: &T,
    new: &T,
    path: &str,
    detail: &str,
) {
    if old != new {
        errors.push(FieldError::forbidden(path, detail));
    }
}

/// Denial message for an object, in the API server's "is invalid" form.
///
/// A single error is inlined; several are listed in brackets.
pub fn invalid_message(kind: &str, group: &str, name: &str, errors: &[FieldError]) -> String {
    let rendered = match errors {
        [single] => single.to_string(),
        many => format!(
            "[{}]",
            many.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    format!("{}.{} \"{}\" is invalid: {}", kind, group, name, rendered)
}
