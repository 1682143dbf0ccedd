//! The gzenv codec: JSON → zlib → URL-safe base64.
//!
//! Used to carry [`EnvDiff`](super::EnvDiff) and
//! [`WatchList`](super::WatchList) values inside shell environment
//! variables, where the payload must be a single token with no shell
//! metacharacters.

use std::io::{Read, Write};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from gzenv encoding or decoding.
#[derive(Debug, Error)]
pub enum GzenvError {
    /// JSON serialization or deserialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The input was not valid URL-safe base64.
    #[error("base64 decode: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Compression or decompression failed.
    #[error("zlib: {0}")]
    Zlib(#[from] std::io::Error),
}

/// Encode a value to the gzenv wire format.
///
/// # Errors
///
/// Returns [`GzenvError`] if serialization or compression fails.
pub fn marshal<T: Serialize>(value: &T) -> Result<String, GzenvError> {
    let json = serde_json::to_vec(value)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    Ok(URL_SAFE.encode(compressed))
}

/// Decode a value from the gzenv wire format.
///
/// # Errors
///
/// Returns [`GzenvError`] on invalid base64, invalid zlib, or JSON that
/// does not match `T`.
pub fn unmarshal<T: DeserializeOwned>(encoded: &str) -> Result<T, GzenvError> {
    let compressed = URL_SAFE.decode(encoded)?;

    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;

    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_round_trip() {
        let value: BTreeMap<String, String> =
            [("KEY".to_string(), "value with spaces\n".to_string())].into();
        let encoded = marshal(&value).unwrap();
        let decoded: BTreeMap<String, String> = unmarshal(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_output_is_shell_safe() {
        let value: BTreeMap<String, String> =
            [("PATH".to_string(), "/usr/bin:/bin".to_string())].into();
        let encoded = marshal(&value).unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=')));
    }

    #[test]
    fn test_invalid_base64_errors() {
        let err = unmarshal::<BTreeMap<String, String>>("!!!not-base64!!!");
        assert!(matches!(err, Err(GzenvError::Base64(_))));
    }

    #[test]
    fn test_invalid_zlib_errors() {
        let encoded = URL_SAFE.encode(b"definitely not zlib");
        let err = unmarshal::<BTreeMap<String, String>>(&encoded);
        assert!(matches!(err, Err(GzenvError::Zlib(_))));
    }
}
