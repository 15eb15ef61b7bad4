//! Error taxonomy.
//!
//! Every fallible call in the crate returns [`Result`]. Variants are coarse "kinds";
//! the message carries the context accumulated while the error travelled up the stack.

use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Tensor kernel shape mismatch.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// Construction-time invariant violation.
    #[error("create: {0}")]
    Create(String),
    /// A builder is missing required inputs or failed to build a dependency.
    #[error("builder: {0}")]
    Builder(String),
    /// Runtime misuse or failure (call order, shapes, optimizer results).
    #[error("exec: {0}")]
    Exec(String),
    /// Missing or invalid trainer configuration.
    #[error("invalid parameters: {0}")]
    Parameters(String),
    /// Failure while preparing a training attempt (provider errors).
    #[error("pre-train: {0}")]
    PreTrain(String),
    /// Unknown discriminator passed to a by-name factory.
    #[error("unknown {kind} {name:?}")]
    Fabric { kind: &'static str, name: String },
    /// Invalid dataset contents or split configuration.
    #[error("invalid data: {0}")]
    Data(String),
    /// The run observed a cancellation request.
    #[error("cancelled: {0}")]
    Cancelled(String),
    /// Filesystem failure (checkpoint files).
    #[error("io: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Prefix the message with `ctx`, keeping the kind.
    pub fn context(self, ctx: impl fmt::Display) -> Self {
        match self {
            Error::Shape(msg) => Error::Shape(format!("{ctx}: {msg}")),
            Error::Create(msg) => Error::Create(format!("{ctx}: {msg}")),
            Error::Builder(msg) => Error::Builder(format!("{ctx}: {msg}")),
            Error::Exec(msg) => Error::Exec(format!("{ctx}: {msg}")),
            Error::Parameters(msg) => Error::Parameters(format!("{ctx}: {msg}")),
            Error::PreTrain(msg) => Error::PreTrain(format!("{ctx}: {msg}")),
            Error::Data(msg) => Error::Data(format!("{ctx}: {msg}")),
            Error::Cancelled(msg) => Error::Cancelled(format!("{ctx}: {msg}")),
            Error::Io(msg) => Error::Io(format!("{ctx}: {msg}")),
            fabric @ Error::Fabric { .. } => fabric,
        }
    }

    /// Re-kind as [`Error::Exec`]. Exec and cancellation errors only gain context.
    pub fn into_exec(self, ctx: impl fmt::Display) -> Self {
        match self {
            Error::Exec(_) | Error::Cancelled(_) => self.context(ctx),
            other => Error::Exec(format!("{ctx}: {other}")),
        }
    }

    /// Re-kind as [`Error::Create`].
    pub fn into_create(self, ctx: impl fmt::Display) -> Self {
        match self {
            Error::Create(_) => self.context(ctx),
            other => Error::Create(format!("{ctx}: {other}")),
        }
    }

    /// Re-kind as [`Error::Builder`].
    pub fn into_builder(self, ctx: impl fmt::Display) -> Self {
        match self {
            Error::Builder(_) => self.context(ctx),
            other => Error::Builder(format!("{ctx}: {other}")),
        }
    }

    /// Re-kind as [`Error::PreTrain`].
    pub fn into_pre_train(self, ctx: impl fmt::Display) -> Self {
        match self {
            Error::PreTrain(_) => self.context(ctx),
            other => Error::PreTrain(format!("{ctx}: {other}")),
        }
    }

    pub(crate) fn fabric(kind: &'static str, name: &str) -> Self {
        Error::Fabric {
            kind,
            name: name.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = Error::Exec("backward before forward".to_owned()).context("operation 2");
        assert_eq!(
            err,
            Error::Exec("operation 2: backward before forward".to_owned())
        );
    }

    #[test]
    fn into_exec_rekinds_lower_level_errors() {
        let err = Error::Shape("2x3 vs 3x2".to_owned()).into_exec("weight backward");
        assert!(matches!(err, Error::Exec(_)));
        assert!(err.to_string().contains("2x3 vs 3x2"));

        let cancelled = Error::Cancelled("stop".to_owned()).into_exec("epoch 4");
        assert!(matches!(cancelled, Error::Cancelled(_)));
    }

    #[test]
    fn fabric_names_the_unknown_value() {
        let err = Error::fabric("activation", "softplus");
        assert_eq!(err.to_string(), "unknown activation \"softplus\"");
    }
}
