//! Gzip + base64 encoding for instance user data

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::Error;

/// Gzip `input` and encode the result as standard base64.
pub fn compress_and_encode(input: &str) -> Result<String, Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(input.as_bytes())
        .map_err(|e| Error::internal_with_context("compress", e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::internal_with_context("compress", e.to_string()))?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`compress_and_encode`].
pub fn decode_and_decompress(encoded: &str) -> Result<String, Error> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::serialization_for_kind("user-data", e.to_string()))?;
    let mut out = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut out)
        .map_err(|e| Error::serialization_for_kind("user-data", e.to_string()))?;
    Ok(out)
}
