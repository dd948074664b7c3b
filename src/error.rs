//! Error type shared by every public operation.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use core::fmt;

use crate::encoder::EncodingError;
use crate::reader::{DecodingError, DecodingFormatError};

/// Broad category of a failed operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Empty buffers, zero dimensions or out-of-range options.
    InvalidInput,
    /// The input is not the container type the operation expects.
    UnsupportedFormat,
    /// The input is structurally malformed or its pixel data is corrupt.
    DecodeFailed,
    /// A frame or the final container could not be produced.
    EncodeFailed,
    /// An allocation failed or exceeded the configured limit.
    OutOfMemory,
}

impl fmt::Display for ErrorKind {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::InvalidInput => "invalid input",
            Self::UnsupportedFormat => "unsupported format",
            Self::DecodeFailed => "decode failed",
            Self::EncodeFailed => "encode failed",
            Self::OutOfMemory => "out of memory",
        })
    }
}

/// Error returned by the transcoding operations.
///
/// Carries one [`ErrorKind`] and a message describing where the operation
/// stopped. Nothing is written to the output when an error is returned.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    source: Option<Box<dyn core::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates an error of the given kind.
    #[cold]
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[cold]
    pub(crate) fn with_source<E>(
        kind: ErrorKind,
        message: impl Into<Cow<'static, str>>,
        source: E,
    ) -> Self
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[cold]
    pub(crate) fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    #[cold]
    pub(crate) fn out_of_memory(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::OutOfMemory, message)
    }

    /// The category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(fmt, " ({source})")?;
        }
        Ok(())
    }
}

impl core::error::Error for Error {
    #[cold]
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(&**source),
            None => None,
        }
    }
}

impl From<DecodingError> for Error {
    #[cold]
    fn from(err: DecodingError) -> Self {
        match err {
            DecodingError::OutOfMemory => Self::out_of_memory("while decoding GIF data"),
            err => Self::with_source(ErrorKind::DecodeFailed, "malformed GIF stream", err),
        }
    }
}

impl From<DecodingFormatError> for Error {
    #[cold]
    fn from(err: DecodingFormatError) -> Self {
        Self::from(DecodingError::Format(err))
    }
}

impl From<EncodingError> for Error {
    #[cold]
    fn from(err: EncodingError) -> Self {
        match err {
            EncodingError::OutOfMemory => Self::out_of_memory("while writing GIF data"),
            err => Self::with_source(ErrorKind::EncodeFailed, "could not write GIF", err),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoding_errors_map_to_decode_failed() {
        let err = Error::from(DecodingError::Format(DecodingFormatError::Truncated));
        assert_eq!(err.kind(), ErrorKind::DecodeFailed);
        assert!(core::error::Error::source(&err).is_some());
        let err = Error::from(DecodingError::OutOfMemory);
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::invalid_input("quality must be within 0..=100");
        assert_eq!(
            alloc::string::ToString::to_string(&err),
            "invalid input: quality must be within 0..=100"
        );
    }

    #[test]
    fn error_cast() {
        let _: Box<dyn core::error::Error + Send + Sync> = Error::out_of_memory("test").into();
    }
}
