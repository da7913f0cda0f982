//! Outcome envelope carried from worker to manager
//!
//! Wire format (JSON):
//!
//! ```text
//! {"status":"ok","value":<T>}
//! {"status":"error","kind":"application"|"transport","message":"...","trace":"..."}
//! ```
//!
//! Errors travel as values and only become a `TaskError` when the manager
//! decodes the frame.

use crate::error::TaskError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Origin of a failure captured inside the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Application,
    Transport,
}

/// Tagged result written by the worker entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope<T> {
    Ok {
        value: T,
    },
    Error {
        kind: FailureKind,
        message: String,
        trace: String,
    },
}

impl<T> Envelope<T> {
    pub fn failure(kind: FailureKind, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Envelope::Error {
            kind,
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// Convert into the value returned by `Task::get`
    pub fn into_result(self) -> Result<T, TaskError> {
        match self {
            Envelope::Ok { value } => Ok(value),
            Envelope::Error {
                kind: FailureKind::Application,
                message,
                trace,
            } => Err(TaskError::Application { message, trace }),
            Envelope::Error {
                kind: FailureKind::Transport,
                message,
                trace,
            } => Err(TaskError::Transport { message, trace }),
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    pub fn decode(frame: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(frame)
    }

    /// Decode a frame straight into an outcome; an undecodable frame is a
    /// transport failure.
    pub fn decode_outcome(frame: &[u8]) -> Result<T, TaskError> {
        match Self::decode(frame) {
            Ok(envelope) => envelope.into_result(),
            Err(e) => Err(TaskError::Transport {
                message: format!("failed to decode outcome: {}", e),
                trace: format!(
                    "{:?}\n\nBacktrace:\n{}",
                    e,
                    std::backtrace::Backtrace::force_capture()
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let ok: Envelope<u32> = Envelope::Ok { value: 42 };
        assert_eq!(
            String::from_utf8(ok.encode().unwrap()).unwrap(),
            r#"{"status":"ok","value":42}"#
        );

        let err: Envelope<u32> = Envelope::failure(FailureKind::Application, "x", "trace");
        let json: serde_json::Value = serde_json::from_slice(&err.encode().unwrap()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "application");
        assert_eq!(json["message"], "x");
    }

    #[test]
    fn test_error_frame_decodes_for_any_value_type() {
        let frame = Envelope::<()>::failure(FailureKind::Transport, "unserializable", "t")
            .encode()
            .unwrap();

        let outcome = Envelope::<Vec<String>>::decode_outcome(&frame);
        assert_eq!(
            outcome,
            Err(TaskError::Transport {
                message: "unserializable".to_string(),
                trace: "t".to_string(),
            })
        );
    }

    #[test]
    fn test_garbage_frame_is_transport_error() {
        let outcome = Envelope::<u32>::decode_outcome(b"\x00not json");
        match outcome {
            Err(TaskError::Transport { message, trace }) => {
                assert!(message.starts_with("failed to decode outcome"));
                assert!(!trace.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_value_type_mismatch_is_transport_error() {
        let frame = Envelope::Ok {
            value: "forty-two".to_string(),
        }
        .encode()
        .unwrap();
        assert!(matches!(
            Envelope::<u32>::decode_outcome(&frame),
            Err(TaskError::Transport { .. })
        ));
    }
}
