//! # Overlay Wire Protocol
//!
//! JSON frames exchanged with browser overlay clients over the delivery socket.

use serde::{Deserialize, Serialize};

/// Close code sent when a client is refused (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Registered { channel: String },
    PlayAudio { url: String },
    StopAudio,
    Pong { ts: i64 },
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Ping,
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        // Plain enum of strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_frame_shapes() {
        assert_eq!(
            ServerFrame::Registered {
                channel: "foo".into()
            }
            .to_json(),
            r#"{"type":"registered","channel":"foo"}"#
        );
        assert_eq!(
            ServerFrame::PlayAudio {
                url: "https://x/a.mp3".into()
            }
            .to_json(),
            r#"{"type":"playAudio","url":"https://x/a.mp3"}"#
        );
        assert_eq!(ServerFrame::StopAudio.to_json(), r#"{"type":"stopAudio"}"#);
        assert_eq!(ServerFrame::Pong { ts: 5 }.to_json(), r#"{"type":"pong","ts":5}"#);
    }

    #[test]
    fn test_client_ping_parses() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"dance"}"#).is_err());
    }
}
