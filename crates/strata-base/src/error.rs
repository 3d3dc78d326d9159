use std::fmt;
use std::io;

use thiserror::Error;

/// Classification of a [`Status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller misuse, e.g. operating on a closed stream.
    FailedPrecondition,
    /// An argument or option is invalid, or data does not match expectations.
    InvalidArgument,
    /// A position or size would exceed [`Position::MAX`](crate::Position).
    Overflow,
    /// A position would fall before the base position of a shifted stream.
    Underflow,
    /// The bound backend does not provide the requested capability.
    Unsupported,
    /// The underlying OS, codec, or digest call failed.
    Backend,
    /// Data ended before an expected or declared length.
    DataLoss,
    /// A backend engine could not be initialized.
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name, used when rendering a [`Status`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailedPrecondition => "failed precondition",
            Self::InvalidArgument => "invalid argument",
            Self::Overflow => "overflow",
            Self::Underflow => "underflow",
            Self::Unsupported => "unsupported",
            Self::Backend => "backend failure",
            Self::DataLoss => "data loss",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure value carried by every stream.
///
/// A status has a kind, a message describing the original failure, and an
/// ordered chain of annotations. Each layer the failure passes through adds
/// one line of context (`"reading data.bin"`, `"at byte 8202"`), innermost
/// first. Rendering is deterministic:
///
/// ```text
/// data loss: truncated Zstd-compressed stream; at byte 10; at uncompressed byte 512
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}{}", render_annotations(.annotations))]
pub struct Status {
    kind: ErrorKind,
    message: String,
    annotations: Vec<String>,
}

fn render_annotations(annotations: &[String]) -> String {
    annotations.iter().map(|a| format!("; {a}")).collect()
}

impl Status {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            annotations: Vec::new(),
        }
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overflow, message)
    }

    pub fn underflow(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Underflow, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataLoss, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The status reported for any operation on a closed stream.
    pub fn closed() -> Self {
        Self::failed_precondition("object closed")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Context lines, innermost first.
    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    /// Adds one line of context from an enclosing layer.
    pub fn annotate(mut self, context: impl Into<String>) -> Self {
        self.annotations.push(context.into());
        self
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof => ErrorKind::DataLoss,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            _ => ErrorKind::Backend,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result alias used by every strata crate.
pub type Result<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_kind_message_and_annotations_in_order() {
        let status = Status::data_loss("truncated stream")
            .annotate("reading data.bin")
            .annotate("at byte 42");
        assert_eq!(
            status.to_string(),
            "data loss: truncated stream; reading data.bin; at byte 42"
        );
        assert_eq!(status.annotations().len(), 2);
    }

    #[test]
    fn renders_without_annotations() {
        let status = Status::overflow("Writer position overflow");
        assert_eq!(status.to_string(), "overflow: Writer position overflow");
    }

    #[test]
    fn equality_includes_annotations() {
        let a = Status::backend("boom");
        let b = Status::backend("boom").annotate("at byte 1");
        assert_ne!(a, b);
        assert_eq!(a, Status::backend("boom"));
    }

    #[test]
    fn io_error_maps_kind() {
        let eof: Status = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(eof.kind(), ErrorKind::DataLoss);
        let other: Status = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(other.kind(), ErrorKind::Backend);
    }
}
