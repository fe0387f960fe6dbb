//! The browser wire protocol.
//!
//! Every frame on the terminal transport is a JSON envelope
//! `{"type": "...", "data": {...}}`. The envelope is a closed sum type:
//! anything that does not decode into one of the variants below is a
//! protocol violation, and each bridge state accepts only the subset of
//! variants that is valid there.
//!
//! Terminal byte payloads (`input`/`output`) are base64-encoded so that
//! raw shell output containing invalid UTF-8 survives the JSON framing
//! losslessly.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::hostkey::HostKeyStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    /// Server is ready for the client to send its key material.
    Ready,
    /// Client-supplied key material for credential decryption.
    Auth { key: String },
    /// Session established; carries the verified host-key fingerprint.
    Connected { host_key: String },
    /// Host key needs a trust decision from the user.
    HostKeyVerify {
        status: HostKeyStatus,
        fingerprint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stored_key: Option<String>,
    },
    /// User's trust decision.
    HostKeyConfirm { accept: bool },
    /// Terminal input, base64-encoded bytes.
    Input { data: String },
    /// Terminal output, base64-encoded bytes.
    Output { data: String },
    /// Terminal window size change.
    Resize { rows: u16, cols: u16 },
    Ping,
    Pong,
    /// Fatal session error; the transport closes shortly after.
    Error { error: String },
}

impl Envelope {
    pub fn input(bytes: &[u8]) -> Self {
        Self::Input {
            data: encode_payload(bytes),
        }
    }

    pub fn output(bytes: &[u8]) -> Self {
        Self::Output {
            data: encode_payload(bytes),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { error: message.into() }
    }

    /// The wire name of this envelope's type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Auth { .. } => "auth",
            Self::Connected { .. } => "connected",
            Self::HostKeyVerify { .. } => "host_key_verify",
            Self::HostKeyConfirm { .. } => "host_key_confirm",
            Self::Input { .. } => "input",
            Self::Output { .. } => "output",
            Self::Resize { .. } => "resize",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        // The envelope contains only JSON-representable data.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","data":{"error":"encoding failure"}}"#.to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

pub fn encode_payload(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_payload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_variants_use_bare_type_tag() {
        assert_eq!(Envelope::Ready.to_json(), r#"{"type":"ready"}"#);
        assert_eq!(Envelope::from_json(r#"{"type":"pong"}"#).unwrap(), Envelope::Pong);
    }

    #[test]
    fn struct_variants_round_trip() {
        let cases = [
            Envelope::Auth { key: "secret".into() },
            Envelope::Connected {
                host_key: "SHA256:abc".into(),
            },
            Envelope::HostKeyVerify {
                status: HostKeyStatus::Mismatch,
                fingerprint: "SHA256:new".into(),
                stored_key: Some("SHA256:old".into()),
            },
            Envelope::HostKeyConfirm { accept: false },
            Envelope::input(b"ls -la\n"),
            Envelope::output(b"\x1b[32mok\x1b[0m"),
            Envelope::Resize { rows: 50, cols: 132 },
            Envelope::error("boom"),
        ];
        for env in cases {
            let decoded = Envelope::from_json(&env.to_json()).unwrap();
            assert_eq!(decoded, env);
        }
    }

    #[test]
    fn host_key_status_serializes_lowercase() {
        let env = Envelope::HostKeyVerify {
            status: HostKeyStatus::New,
            fingerprint: "SHA256:abc".into(),
            stored_key: None,
        };
        let json = env.to_json();
        assert!(json.contains(r#""status":"new""#), "{json}");
        assert!(!json.contains("stored_key"), "{json}");
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        assert!(Envelope::from_json(r#"{"type":"shutdown"}"#).is_err());
        assert!(Envelope::from_json(r#"{"nonsense":true}"#).is_err());
    }

    #[test]
    fn payload_encoding_is_lossless_for_arbitrary_bytes() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let env = Envelope::output(&bytes);
        match Envelope::from_json(&env.to_json()).unwrap() {
            Envelope::Output { data } => assert_eq!(decode_payload(&data).unwrap(), bytes),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
