//! Worker entry point
//!
//! Runs inside the isolation unit. Invokes the target and turns whatever
//! happens into exactly one frame, except for OS/IO failures, which produce
//! none. Nothing here logs: in a forked child the parent's subscriber state
//! is not safe to touch.

use super::r#trait::WorkerExit;
use crate::outcome::{Envelope, FailureKind};
use serde::Serialize;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};

/// Invoke `target(args)` and capture the outcome.
///
/// - `Ok(value)` → ok frame
/// - error that *is* a `std::io::Error` → [`WorkerExit::Fault`], no frame
/// - any other error, or a panic → application error frame with trace
/// - value that fails to encode → transport error frame with its own trace
pub fn run<A, T, F>(target: &F, args: A) -> WorkerExit
where
    F: Fn(A) -> anyhow::Result<T> + ?Sized,
    T: Serialize,
{
    let envelope = match panic::catch_unwind(AssertUnwindSafe(|| target(args))) {
        Ok(Ok(value)) => Envelope::Ok { value },
        Ok(Err(err)) => match err.downcast::<std::io::Error>() {
            Ok(io) => return WorkerExit::Fault(io),
            Err(err) => Envelope::failure(
                FailureKind::Application,
                err.to_string(),
                format_error_trace(&err),
            ),
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let trace = format!(
                "panicked: {}\n\nBacktrace:\n{}",
                message,
                Backtrace::force_capture()
            );
            Envelope::failure(FailureKind::Application, message, trace)
        }
    };

    encode(&envelope)
}

fn encode<T: Serialize>(envelope: &Envelope<T>) -> WorkerExit {
    match envelope.encode() {
        Ok(frame) => WorkerExit::Frame(frame),
        Err(e) => {
            let fallback = Envelope::<()>::failure(
                FailureKind::Transport,
                format!("failed to encode outcome: {}", e),
                format!("{:?}\n\nBacktrace:\n{}", e, Backtrace::force_capture()),
            );
            // strings only; cannot fail
            WorkerExit::Frame(fallback.encode().unwrap_or_default())
        }
    }
}

fn format_error_trace(err: &anyhow::Error) -> String {
    let mut trace = String::from("Error chain:\n");
    for (depth, cause) in err.chain().enumerate() {
        let _ = writeln!(trace, "  {}: {}", depth, cause);
    }
    let _ = write!(trace, "\nBacktrace:\n{}", Backtrace::force_capture());
    trace
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
