//! Slash-delimited organizational paths ("ROOT/a/b")
//!
//! Segments are stored beneath the root anchor, so the bare root path has no
//! segments. Equality is segment-wise: "ROOT/a/", "/ROOT/a" and "a" are the
//! same path.

use std::fmt;

/// Literal name of the root domain
pub const ROOT_DOMAIN: &str = "ROOT";

/// A root-anchored path of non-empty segments
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct OrgPath {
    segments: Vec<String>,
}

impl OrgPath {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path, anchoring it at the root when the anchor is missing
    pub fn parse(raw: &str) -> Self {
        let mut segments: Vec<String> = raw
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.first().is_some_and(|s| s == ROOT_DOMAIN) {
            segments.remove(0);
        }
        Self { segments }
    }

    /// Build a path from segments beneath the root
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// Segments beneath the root anchor
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True for the bare root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path minus its last segment; the root has no parent
    pub fn parent(&self) -> Option<OrgPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment, or the root name for the root path
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or(ROOT_DOMAIN)
    }

    /// Path with one more segment
    pub fn child(&self, name: &str) -> OrgPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Every non-root prefix, shallowest first, ending with the path itself.
    ///
    /// Walking these top-down visits each level exactly once.
    pub fn descendants_from_root(&self) -> impl Iterator<Item = OrgPath> + '_ {
        (1..=self.segments.len()).map(|depth| Self {
            segments: self.segments[..depth].to_vec(),
        })
    }
}

impl fmt::Display for OrgPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROOT_DOMAIN)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for OrgPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ROOT", &[])]
    #[case("ROOT/", &[])]
    #[case("/", &[])]
    #[case("", &[])]
    #[case("blah", &["blah"])]
    #[case("ROOT/blah", &["blah"])]
    #[case("/ROOT/someNewDomain/tooBlah/", &["someNewDomain", "tooBlah"])]
    #[case("foo//bar", &["foo", "bar"])]
    fn parses_segments(#[case] raw: &str, #[case] want: &[&str]) {
        let path = OrgPath::parse(raw);
        assert_eq!(path.segments(), want);
    }

    #[test]
    fn equality_is_segment_wise() {
        assert_eq!(OrgPath::parse("ROOT/a/b"), OrgPath::parse("a/b/"));
        assert_ne!(OrgPath::parse("ROOT/a/b"), OrgPath::parse("ROOT/a"));
        assert_eq!(OrgPath::parse("ROOT/a"), OrgPath::from_segments(["a"]));
    }

    #[test]
    fn parent_walks_up_to_root() {
        let path = OrgPath::parse("ROOT/someNewDomain/tooBlah");
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string(), "ROOT/someNewDomain");
        let root = parent.parent().unwrap();
        assert!(root.is_root());
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn display_and_name() {
        assert_eq!(OrgPath::root().to_string(), "ROOT");
        assert_eq!(OrgPath::root().name(), "ROOT");
        let path = OrgPath::parse("blah");
        assert_eq!(path.to_string(), "ROOT/blah");
        assert_eq!(path.name(), "blah");
        assert_eq!(OrgPath::root().child("x").to_string(), "ROOT/x");
    }

    #[test]
    fn descendants_visit_each_level_once() {
        let path = OrgPath::parse("ROOT/a/b/c");
        let walked: Vec<String> = path.descendants_from_root().map(|p| p.to_string()).collect();
        assert_eq!(walked, vec!["ROOT/a", "ROOT/a/b", "ROOT/a/b/c"]);
        assert_eq!(OrgPath::root().descendants_from_root().count(), 0);
    }
}
