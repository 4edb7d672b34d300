//! The compressed payload value object.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Content compressed for transport, together with the logical path it
/// was shared under.
///
/// `compressed_size == data.len()` and `original_size` is the length of the
/// inflated bytes. Serialized field names match the share-link JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedPayload {
    /// Compressed bytes, base64 in JSON.
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,

    pub filepath: String,

    #[serde(rename = "size")]
    pub original_size: u64,

    pub compressed_size: u64,

    pub created_at: Timestamp,

    pub modified_at: Timestamp,
}

impl CompressedPayload {
    /// Standard base64 of the compressed bytes, as embedded in URLs.
    pub fn data_base64(&self) -> String {
        encode_base64(&self.data)
    }
}

pub(crate) fn encode_base64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode standard base64, tolerating the spaces a form decoder leaves
/// where `+` was not escaped and missing padding.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    let cleaned: String = text
        .trim()
        .chars()
        .map(|c| if c == ' ' { '+' } else { c })
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let unpadded = cleaned.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD.decode(unpadded)
}

/// Serde adapter storing byte buffers as base64 strings.
pub mod serde_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_base64(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_base64(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_tolerates_form_decoding() {
        let original = vec![0xfb, 0xff, 0xbf];
        let encoded = encode_base64(&original);
        assert_eq!(encoded, "+/+/");
        assert_eq!(decode_base64(" /+/").unwrap(), original);
        assert_eq!(decode_base64("AQI").unwrap(), vec![1, 2]);
        assert_eq!(decode_base64("AQI=").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_payload_json_field_names() {
        let payload = CompressedPayload {
            data: vec![1, 2, 3],
            filepath: "a.txt".into(),
            original_size: 10,
            compressed_size: 3,
            created_at: Timestamp(5),
            modified_at: Timestamp(6),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["size"], 10);
        assert_eq!(value["compressedSize"], 3);
        assert_eq!(value["createdAt"], 5);
        assert_eq!(value["data"], "AQID");

        let back: CompressedPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
