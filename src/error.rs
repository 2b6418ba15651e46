//! Error taxonomy for the controller.
//!
//! Every failure that reaches the control thread is one of these variants.
//! None of them are fatal to the session: the controller turns each into a
//! log entry plus (except for cancellation) a system message.
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// Backend unreachable, misconfigured, or returned garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request deadline expired before the backend answered.
    #[error("timed out after {}", fmt_elapsed(*elapsed))]
    Timeout { elapsed: Duration },

    /// User-initiated cancellation. Never shown as a failure.
    #[error("cancelled")]
    Cancelled,

    /// A workflow phase failed. `agent` names the agent that was running, if known.
    #[error("workflow error{}: {message}", agent.as_deref().map(|a| format!(" ({a})")).unwrap_or_default())]
    Workflow {
        agent: Option<String>,
        message: String,
    },

    #[error("file system error: {0}")]
    FileSystem(String),

    #[error("clipboard error: {0}")]
    Clipboard(String),
}

impl ControllerError {
    pub fn workflow(agent: Option<&str>, message: impl Into<String>) -> Self {
        Self::Workflow {
            agent: agent.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short label used as the log source / message prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Workflow { .. } => "workflow",
            Self::FileSystem(_) => "filesystem",
            Self::Clipboard(_) => "clipboard",
        }
    }
}

/// Map an arbitrary error onto the taxonomy.
///
/// A `ControllerError` anywhere in the chain wins; otherwise `reqwest`
/// timeouts become `Timeout` (with the caller's measured elapsed time) and
/// everything else is a `Transport` failure.
pub fn classify(err: &anyhow::Error, elapsed: Duration) -> ControllerError {
    for cause in err.chain() {
        if let Some(ce) = cause.downcast_ref::<ControllerError>() {
            return ce.clone();
        }
        if let Some(re) = cause.downcast_ref::<reqwest::Error>() {
            if re.is_timeout() {
                return ControllerError::Timeout { elapsed };
            }
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return ControllerError::Timeout { elapsed };
            }
        }
    }
    ControllerError::Transport(format!("{err:#}"))
}

pub fn fmt_elapsed(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m {}s", d.as_secs() / 60, d.as_secs() % 60)
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_passes_through_controller_errors() {
        let err = anyhow::Error::new(ControllerError::Cancelled).context("agent call");
        assert!(classify(&err, Duration::ZERO).is_cancelled());
    }

    #[test]
    fn test_classify_io_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = anyhow::Error::new(io);
        match classify(&err, Duration::from_secs(3)) {
            ControllerError::Timeout { elapsed } => assert_eq!(elapsed, Duration::from_secs(3)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_defaults_to_transport() {
        let err = anyhow::anyhow!("connection refused");
        let ce = classify(&err, Duration::ZERO);
        assert_eq!(ce.kind(), "transport");
        assert!(ce.to_string().contains("connection refused"));
    }

    #[test]
    fn test_display_messages() {
        let t = ControllerError::Timeout { elapsed: Duration::from_millis(2500) };
        assert_eq!(t.to_string(), "timed out after 2.5s");
        let w = ControllerError::workflow(Some("claude"), "plan rejected");
        assert_eq!(w.to_string(), "workflow error (claude): plan rejected");
        let w = ControllerError::workflow(None, "boom");
        assert_eq!(w.to_string(), "workflow error: boom");
    }
}
