//! Wire envelope and the frame types carried inside an encrypted envelope.
//!
//! Both are externally-tagged CBOR sum types discriminated by a `type`
//! string field, matching the wire format described for the control
//! channel: handshake envelopes carry base64-text fields (so they can be
//! logged/inspected without a CBOR reader), while `enc` and the frames
//! within it use raw CBOR byte strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level frame exchanged over the outer WebSocket at `/__ra__`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "server_kx")]
    ServerKx {
        #[serde(rename = "x25519PublicKey")]
        x25519_public_key: String,
        quote: String,
        runtime_data: Option<String>,
        verifier_data: Option<String>,
    },
    #[serde(rename = "client_kx")]
    ClientKx {
        #[serde(rename = "sealedSymmetricKey")]
        sealed_symmetric_key: String,
    },
    #[serde(rename = "enc")]
    Enc {
        nonce: serde_bytes::ByteBuf,
        ciphertext: serde_bytes::ByteBuf,
    },
}

/// Plaintext carried inside an `Envelope::Enc` ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "http_request")]
    HttpRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        method: String,
        url: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
    },
    #[serde(rename = "http_response")]
    HttpResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        status: u16,
        #[serde(rename = "statusText")]
        status_text: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
        error: Option<String>,
    },
    #[serde(rename = "ws_connect")]
    WsConnect {
        #[serde(rename = "connectionId")]
        connection_id: String,
        url: String,
        protocols: Option<Vec<String>>,
    },
    #[serde(rename = "ws_close")]
    WsClose {
        #[serde(rename = "connectionId")]
        connection_id: String,
        code: Option<u16>,
        reason: Option<String>,
    },
    #[serde(rename = "ws_message")]
    WsMessage {
        #[serde(rename = "connectionId")]
        connection_id: String,
        data: WsData,
        #[serde(rename = "dataType")]
        data_type: WsDataType,
    },
    #[serde(rename = "ws_event")]
    WsEvent {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "eventType")]
        event_type: WsEventType,
        code: Option<u16>,
        reason: Option<String>,
        error: Option<String>,
    },
}

/// `ws_message.data`: either a UTF-8 string or an opaque byte payload,
/// distinguished on the wire by `dataType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsData {
    Text(String),
    Binary(serde_bytes::ByteBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsDataType {
    String,
    #[serde(rename = "arraybuffer")]
    ArrayBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsEventType {
    Open,
    Close,
    Error,
}

/// Text/binary heuristic used both to choose `dataType` when sending and
/// to decide how to hand received bytes to the application: no NUL byte
/// and no byte in `[0x80, 0xA0)` within the first KiB is treated as text.
/// Lossy by design — preserve exactly, don't "fix" false positives.
pub fn looks_like_text(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(1024)];
    !window.iter().any(|&b| b == 0 || (0x80..0xA0).contains(&b))
}

impl WsData {
    /// Build a `ws_message.data` value from raw bytes using the text
    /// heuristic, alongside the `dataType` it implies.
    pub fn from_payload(bytes: Vec<u8>) -> (Self, WsDataType) {
        if looks_like_text(&bytes) {
            match String::from_utf8(bytes) {
                Ok(s) => (WsData::Text(s), WsDataType::String),
                Err(e) => (
                    WsData::Binary(serde_bytes::ByteBuf::from(e.into_bytes())),
                    WsDataType::ArrayBuffer,
                ),
            }
        } else {
            (WsData::Binary(serde_bytes::ByteBuf::from(bytes)), WsDataType::ArrayBuffer)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WsData::Text(s) => s.len(),
            WsData::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_heuristic_rejects_embedded_nul() {
        assert!(!looks_like_text(&[65, 0, 66, 255]));
    }

    #[test]
    fn text_heuristic_accepts_plain_ascii() {
        assert!(looks_like_text(b"hello world"));
    }

    #[test]
    fn text_heuristic_rejects_c1_control_range() {
        assert!(!looks_like_text(&[0x90]));
        assert!(looks_like_text(&[0x7F]));
        assert!(looks_like_text(&[0xA0]));
    }

    #[test]
    fn envelope_round_trips_through_cbor() {
        let env = Envelope::ClientKx {
            sealed_symmetric_key: "abcd".to_string(),
        };
        let bytes = serde_cbor::to_vec(&env).unwrap();
        let decoded: Envelope = serde_cbor::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, Envelope::ClientKx { sealed_symmetric_key } if sealed_symmetric_key == "abcd"));
    }

    #[test]
    fn frame_round_trips_through_cbor() {
        let frame = Frame::WsMessage {
            connection_id: "c1".into(),
            data: WsData::Text("hi".into()),
            data_type: WsDataType::String,
        };
        let bytes = serde_cbor::to_vec(&frame).unwrap();
        let decoded: Frame = serde_cbor::from_slice(&bytes).unwrap();
        match decoded {
            Frame::WsMessage { connection_id, data, data_type } => {
                assert_eq!(connection_id, "c1");
                assert_eq!(data_type, WsDataType::String);
                assert!(matches!(data, WsData::Text(s) if s == "hi"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
