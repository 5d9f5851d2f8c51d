use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use kestrel_core::{StorageError, StorageResult};

/// Turns stored objects into bytes and back
pub trait ObjectCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> StorageResult<Bytes>;

    fn decode(&self, bytes: &[u8]) -> StorageResult<T>;

    /// Content type recorded on written objects
    fn content_type(&self) -> &str;

    /// Get codec identifier
    fn codec_id(&self) -> &'static str;
}

/// JSON codec for serde types
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> ObjectCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> StorageResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(StorageError::serialization)
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<T> {
        serde_json::from_slice(bytes).map_err(StorageError::serialization)
    }

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }
}

/// Stores byte payloads untouched (files, images)
#[derive(Debug, Clone)]
pub struct RawBytesCodec {
    content_type: String,
}

impl RawBytesCodec {
    pub fn new<S: Into<String>>(content_type: S) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }
}

impl Default for RawBytesCodec {
    fn default() -> Self {
        Self::new("application/octet-stream")
    }
}

impl ObjectCodec<Vec<u8>> for RawBytesCodec {
    fn encode(&self, value: &Vec<u8>) -> StorageResult<Bytes> {
        Ok(Bytes::copy_from_slice(value))
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn codec_id(&self) -> &'static str {
        "raw"
    }
}

impl ObjectCodec<Bytes> for RawBytesCodec {
    fn encode(&self, value: &Bytes) -> StorageResult<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn codec_id(&self) -> &'static str {
        "raw"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Survey {
        title: String,
        questions: u32,
    }

    #[test]
    fn json_rejects_malformed_payloads() {
        let err = <JsonCodec as ObjectCodec<Survey>>::decode(&JsonCodec, b"{not json").unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn json_encodes_serde_types() {
        let survey = Survey {
            title: "weekly".into(),
            questions: 3,
        };
        let bytes = JsonCodec.encode(&survey).unwrap();
        assert_eq!(&bytes[..], br#"{"title":"weekly","questions":3}"#);
        assert_eq!(<JsonCodec as ObjectCodec<Survey>>::content_type(&JsonCodec), "application/json");
    }

    #[test]
    fn raw_bytes_keep_their_content_type() {
        let codec = RawBytesCodec::new("image/png");
        let bytes = codec.encode(&vec![0x89, 0x50]).unwrap();
        assert_eq!(&bytes[..], &[0x89, 0x50]);
        assert_eq!(<RawBytesCodec as ObjectCodec<Vec<u8>>>::content_type(&codec), "image/png");
    }
}
