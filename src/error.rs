use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad classes of failure. Callers that need to react to a failure
/// should branch on this rather than on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong command line.
    Usage,
    /// The file, archive or archive member couldn't be found or opened.
    Locator,
    /// The pickle stream can't be interpreted any further.
    MalformedStream,
    /// A string opcode held bytes that aren't valid text.
    Encoding,
    /// Writing the dump failed.
    Output,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("member '{member}' not found in '{archive}'")]
    MemberNotFound { archive: PathBuf, member: String },

    #[error("could not find member matching '{pattern}' in '{archive}'")]
    NoMatchingMember { archive: PathBuf, pattern: String },

    #[error("bad member pattern '{pattern}': {details}")]
    BadPattern { pattern: String, details: String },

    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { offset: usize, opcode: u8 },

    #[error("pickle data truncated at offset {offset} ({opcode})")]
    Truncated { offset: usize, opcode: &'static str },

    #[error("ran out of input at offset {offset} before STOP")]
    MissingStop { offset: usize },

    #[error("malformed pickle at offset {offset}: {details}")]
    Malformed { offset: usize, details: String },

    #[error("string too long at offset {offset}: {len} bytes")]
    StringTooLong { offset: usize, len: u64 },

    #[error("value nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("invalid string at offset {offset}: {message}")]
    Encoding { offset: usize, message: String },

    #[error("cannot render {class}: instance has both constructor arguments and state")]
    UnsupportedRendering { class: String },

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl Error {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            details: details.into(),
        }
    }

    pub fn encoding(offset: usize, message: impl Into<String>) -> Self {
        Self::Encoding {
            offset,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Usage,
            Self::Open { .. }
            | Self::Archive { .. }
            | Self::MemberNotFound { .. }
            | Self::NoMatchingMember { .. }
            | Self::BadPattern { .. } => ErrorKind::Locator,
            Self::UnknownOpcode { .. }
            | Self::Truncated { .. }
            | Self::MissingStop { .. }
            | Self::Malformed { .. }
            | Self::StringTooLong { .. }
            | Self::TooDeep { .. }
            | Self::UnsupportedRendering { .. } => ErrorKind::MalformedStream,
            Self::Encoding { .. } => ErrorKind::Encoding,
            Self::Output(_) => ErrorKind::Output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownOpcode {
            offset: 7,
            opcode: 0xff,
        };
        assert_eq!(err.to_string(), "unknown opcode 0xff at offset 7");

        let err = Error::MemberNotFound {
            archive: "model.zip".into(),
            member: "data.pkl".into(),
        };
        assert!(err.to_string().contains("data.pkl"));
        assert!(err.to_string().contains("model.zip"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::usage("x").kind(), ErrorKind::Usage);
        assert_eq!(Error::malformed(0, "x").kind(), ErrorKind::MalformedStream);
        assert_eq!(
            Error::StringTooLong { offset: 0, len: 1 }.kind(),
            ErrorKind::MalformedStream
        );
        assert_eq!(Error::encoding(0, "x").kind(), ErrorKind::Encoding);
        assert_eq!(
            Error::NoMatchingMember {
                archive: "a.zip".into(),
                pattern: "*.pkl".into()
            }
            .kind(),
            ErrorKind::Locator
        );
    }
}
