//! CBOR encoding through serde.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or do not match `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Progress {
        key: u32,
        value: u32,
        label: String,
    }

    #[test]
    fn roundtrip_struct() {
        let value = Progress {
            key: 7,
            value: 5,
            label: "laps".into(),
        };
        let bytes = to_cbor(&value).unwrap();
        let decoded: Progress = from_cbor(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: CodecResult<Progress> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn decode_wrong_shape_fails() {
        let bytes = to_cbor(&42u32).unwrap();
        let result: CodecResult<Progress> = from_cbor(&bytes);
        assert!(result.is_err());
    }
}
