//! The packed payload envelope of the preprocessor RPC.
//!
//! Wire format: the ASCII decimal byte length of the JSON header, a
//! literal `!`, the UTF-8 JSON, then raw binary sections. Binary fields
//! appear in the JSON as `["buffer", start, end]` with offsets relative
//! to the start of the binary region. The in-page adapter unpacks the
//! same format symmetrically.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Value};
use webreel_common::{WebreelError, WebreelResult};

/// Incremental builder for a packed payload.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    header: serde_json::Map<String, Value>,
    blobs: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain JSON field to the header.
    pub fn field(mut self, key: &str, value: impl Serialize) -> Self {
        self.header.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }

    /// Add a binary section, referenced from the header as
    /// `["buffer", start, end]`.
    pub fn buffer(mut self, key: &str, bytes: &[u8]) -> Self {
        let start = self.blobs.len();
        self.blobs.extend_from_slice(bytes);
        let end = self.blobs.len();
        self.header
            .insert(key.to_string(), json!(["buffer", start, end]));
        self
    }

    /// Serialize to the wire format.
    pub fn finish(self) -> Vec<u8> {
        let header = serde_json::to_string(&Value::Object(self.header))
            .expect("JSON maps of JSON values always serialize");
        let mut out = Vec::with_capacity(header.len() + self.blobs.len() + 12);
        out.extend_from_slice(header.len().to_string().as_bytes());
        out.push(b'!');
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.blobs);
        out
    }
}

/// A decoded payload: the JSON header with buffer references resolved
/// into owned byte vectors.
#[derive(Debug)]
pub struct UnpackedPayload {
    pub header: Value,
    pub buffers: HashMap<String, Vec<u8>>,
}

/// Decode the wire format produced by [`PayloadBuilder`].
pub fn unpack(bytes: &[u8]) -> WebreelResult<UnpackedPayload> {
    let bang = bytes
        .iter()
        .position(|&b| b == b'!')
        .ok_or_else(|| WebreelError::preprocess("payload missing length delimiter"))?;
    let len: usize = std::str::from_utf8(&bytes[..bang])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WebreelError::preprocess("payload length prefix is not a decimal"))?;

    let header_start = bang + 1;
    let blob_start = header_start + len;
    if blob_start > bytes.len() {
        return Err(WebreelError::preprocess(format!(
            "payload header length {len} exceeds payload size {}",
            bytes.len()
        )));
    }

    let header: Value = serde_json::from_slice(&bytes[header_start..blob_start])?;
    let blobs = &bytes[blob_start..];

    let mut buffers = HashMap::new();
    if let Value::Object(map) = &header {
        for (key, value) in map {
            if let Some((start, end)) = buffer_ref(value) {
                if end > blobs.len() || start > end {
                    return Err(WebreelError::preprocess(format!(
                        "buffer '{key}' range {start}..{end} outside binary region of {} bytes",
                        blobs.len()
                    )));
                }
                buffers.insert(key.clone(), blobs[start..end].to_vec());
            }
        }
    }

    Ok(UnpackedPayload { header, buffers })
}

fn buffer_ref(value: &Value) -> Option<(usize, usize)> {
    let arr = value.as_array()?;
    if arr.len() != 3 || arr[0].as_str() != Some("buffer") {
        return None;
    }
    Some((arr[1].as_u64()? as usize, arr[2].as_u64()? as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_bytes_and_header() {
        let main = vec![1u8, 2, 3, 4, 5];
        let mask = vec![9u8, 8, 7];
        let packed = PayloadBuilder::new()
            .field("hasMask", true)
            .field("hasAudio", false)
            .field("hasClip", false)
            .buffer("buffer", &main)
            .buffer("maskBuffer", &mask)
            .finish();

        let unpacked = unpack(&packed).unwrap();
        assert_eq!(unpacked.header["hasMask"], serde_json::json!(true));
        assert_eq!(unpacked.buffers["buffer"], main);
        assert_eq!(unpacked.buffers["maskBuffer"], mask);
    }

    #[test]
    fn wire_format_starts_with_ascii_length_and_bang() {
        let packed = PayloadBuilder::new().field("hasMask", false).finish();
        let bang = packed.iter().position(|&b| b == b'!').unwrap();
        let len: usize = std::str::from_utf8(&packed[..bang])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(packed.len(), bang + 1 + len);
    }

    #[test]
    fn empty_binary_sections_are_legal() {
        let packed = PayloadBuilder::new().buffer("buffer", &[]).finish();
        let unpacked = unpack(&packed).unwrap();
        assert!(unpacked.buffers["buffer"].is_empty());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let packed = PayloadBuilder::new().buffer("buffer", &[1, 2, 3]).finish();
        assert!(unpack(&packed[..packed.len() - 2]).is_err());
        assert!(unpack(b"notanumber!{}").is_err());
        assert!(unpack(b"{}").is_err());
    }
}
