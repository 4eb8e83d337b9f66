use std::time::Duration;

use crate::prompt::{is_rate_limit_message, parse_retry_after};

/// Tagged result of a single call to an external collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    /// The collaborator produced a value.
    Success(T),

    /// The collaborator is throttling us. Transient: the caller may retry.
    RateLimited {
        /// Server-suggested wait, when the collaborator provided one.
        retry_after: Option<Duration>,
        message: String,
    },

    /// Any other failure. Not retried.
    Fatal(String),
}

impl<T> CallOutcome<T> {
    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::RateLimited {
            retry_after,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Classify a raw collaborator error message.
    ///
    /// Quota / resource-exhausted messages become `RateLimited` (with the
    /// embedded retry hint, if any); everything else is `Fatal`.
    pub fn from_error_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            let retry_after = parse_retry_after(&message);
            Self::RateLimited {
                retry_after,
                message,
            }
        } else {
            Self::Fatal(message)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            CallOutcome::Success(v) => CallOutcome::Success(f(v)),
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => CallOutcome::RateLimited {
                retry_after,
                message,
            },
            CallOutcome::Fatal(msg) => CallOutcome::Fatal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_messages_are_rate_limits() {
        let outcome: CallOutcome<()> = CallOutcome::from_error_message(
            "429 RESOURCE_EXHAUSTED. Please retry in 12.5s.",
        );
        assert_eq!(
            outcome,
            CallOutcome::RateLimited {
                retry_after: Some(Duration::from_millis(12_500)),
                message: "429 RESOURCE_EXHAUSTED. Please retry in 12.5s.".to_string(),
            }
        );
    }

    #[test]
    fn other_messages_are_fatal() {
        let outcome: CallOutcome<()> = CallOutcome::from_error_message("item not found");
        assert_eq!(outcome, CallOutcome::Fatal("item not found".to_string()));
    }

    #[test]
    fn map_preserves_failures() {
        let ok: CallOutcome<u32> = CallOutcome::Success(2);
        assert_eq!(ok.map(|v| v * 2), CallOutcome::Success(4));

        let limited: CallOutcome<u32> = CallOutcome::rate_limited(None, "slow down");
        assert!(matches!(
            limited.map(|v| v.to_string()),
            CallOutcome::RateLimited { retry_after: None, .. }
        ));
    }
}
