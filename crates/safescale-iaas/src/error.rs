//! Error taxonomy shared by the provider stacks, the metadata layer and the
//! lifecycle orchestrators.

use std::time::Duration;
use thiserror::Error;

/// Flat classification of an [`Error`], used by callers to decide between
/// retrying, creating on miss, or reporting to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    AlreadyReserved,
    NotReserved,
    NotAvailable,
    InvalidRequest,
    InvalidParameter,
    Logic,
    Timeout,
    Aborted,
    Inconsistent,
    Infra,
}

impl ErrorKind {
    /// Errors caused by what the caller asked for, as opposed to what the
    /// infrastructure did.
    pub fn is_user_error(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound
                | ErrorKind::Duplicate
                | ErrorKind::InvalidRequest
                | ErrorKind::InvalidParameter
                | ErrorKind::Logic
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::AlreadyReserved => "already reserved",
            ErrorKind::NotReserved => "not reserved",
            ErrorKind::NotAvailable => "not available",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::Logic => "logic error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Inconsistent => "inconsistent",
            ErrorKind::Infra => "infrastructure error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    AlreadyReserved(String),

    #[error("{0}")]
    NotReserved(String),

    #[error("{0}")]
    NotAvailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{0}")]
    Logic(String),

    #[error("{message} (after {after:?})")]
    Timeout {
        message: String,
        after: Duration,
        #[source]
        cause: Option<Box<Error>>,
    },

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("{message}")]
    Infra {
        message: String,
        /// HTTP-equivalent status reported by the provider, when known.
        status: Option<u16>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A primary error together with failures of the compensating actions
    /// that ran because of it.
    #[error("{error}{}", render_consequences(.consequences))]
    WithConsequences {
        #[source]
        error: Box<Error>,
        consequences: Vec<Error>,
    },
}

fn render_consequences(consequences: &[Error]) -> String {
    let mut out = String::new();
    for c in consequences {
        out.push_str("\n  + ");
        out.push_str(&c.to_string());
    }
    out
}

impl Error {
    pub fn not_found(kind: &str, reference: &str) -> Self {
        Error::NotFound(format!("failed to find {} '{}'", kind, reference))
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Error::Duplicate(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Error::Logic(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("inconsistency detected: {}", msg);
        Error::Inconsistent(msg)
    }

    pub fn infra(msg: impl Into<String>) -> Self {
        Error::Infra {
            message: msg.into(),
            status: None,
            source: None,
        }
    }

    pub fn infra_status(msg: impl Into<String>, status: u16) -> Self {
        Error::Infra {
            message: msg.into(),
            status: Some(status),
            source: None,
        }
    }

    pub fn timeout(msg: impl Into<String>, after: Duration, cause: Option<Error>) -> Self {
        Error::Timeout {
            message: msg.into(),
            after,
            cause: cause.map(Box::new),
        }
    }

    pub fn aborted() -> Self {
        Error::Aborted("operation cancelled".to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Duplicate(_) => ErrorKind::Duplicate,
            Error::AlreadyReserved(_) => ErrorKind::AlreadyReserved,
            Error::NotReserved(_) => ErrorKind::NotReserved,
            Error::NotAvailable(_) => ErrorKind::NotAvailable,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::Logic(_) => ErrorKind::Logic,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Aborted(_) => ErrorKind::Aborted,
            Error::Inconsistent(_) => ErrorKind::Inconsistent,
            Error::Infra { .. } | Error::Io(_) | Error::Json(_) => ErrorKind::Infra,
            Error::WithConsequences { error, .. } => error.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Provider-side status attached to an infrastructure error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Infra { status, .. } => *status,
            Error::WithConsequences { error, .. } => error.status(),
            _ => None,
        }
    }

    /// Attaches the failure of a compensating action, keeping `self` as the
    /// error reported to the caller.
    pub fn add_consequence(self, consequence: Error) -> Self {
        match self {
            Error::WithConsequences {
                error,
                mut consequences,
            } => {
                consequences.push(consequence);
                Error::WithConsequences {
                    error,
                    consequences,
                }
            }
            other => Error::WithConsequences {
                error: Box::new(other),
                consequences: vec![consequence],
            },
        }
    }

    pub fn consequences(&self) -> &[Error] {
        match self {
            Error::WithConsequences { consequences, .. } => consequences,
            _ => &[],
        }
    }

    /// Prefixes the message with `context` without changing the kind.
    pub fn annotate(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::NotFound(m) => Error::NotFound(format!("{}: {}", context, m)),
            Error::Duplicate(m) => Error::Duplicate(format!("{}: {}", context, m)),
            Error::NotAvailable(m) => Error::NotAvailable(format!("{}: {}", context, m)),
            Error::InvalidRequest(m) => Error::InvalidRequest(format!("{}: {}", context, m)),
            Error::Logic(m) => Error::Logic(format!("{}: {}", context, m)),
            Error::Aborted(m) => Error::Aborted(format!("{}: {}", context, m)),
            Error::Timeout {
                message,
                after,
                cause,
            } => Error::Timeout {
                message: format!("{}: {}", context, message),
                after,
                cause,
            },
            Error::Infra {
                message,
                status,
                source,
            } => Error::Infra {
                message: format!("{}: {}", context, message),
                status,
                source,
            },
            err @ (Error::Io(_) | Error::Json(_)) => Error::Infra {
                message: format!("{}: {}", context, err),
                status: None,
                source: Some(Box::new(err)),
            },
            Error::WithConsequences {
                error,
                consequences,
            } => Error::WithConsequences {
                error: Box::new(error.annotate(context)),
                consequences,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consequences_keep_primary_kind() {
        let err = Error::timeout("waiting for ssh", Duration::from_secs(5), None)
            .add_consequence(Error::infra("failed to delete host"))
            .add_consequence(Error::infra("failed to delete metadata"));

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.consequences().len(), 2);
        let rendered = err.to_string();
        assert!(rendered.starts_with("waiting for ssh"));
        assert!(rendered.contains("failed to delete metadata"));
    }

    #[test]
    fn test_annotate_preserves_kind() {
        let err = Error::not_found("host", "web").annotate("cannot delete host");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "cannot delete host: failed to find host 'web'"
        );

        let io = Error::from(std::io::Error::other("disk gone")).annotate("writing metadata");
        assert_eq!(io.kind(), ErrorKind::Infra);
    }

    #[test]
    fn test_user_error_classification() {
        assert!(ErrorKind::Logic.is_user_error());
        assert!(ErrorKind::Duplicate.is_user_error());
        assert!(!ErrorKind::Timeout.is_user_error());
        assert!(!ErrorKind::Infra.is_user_error());
    }
}
