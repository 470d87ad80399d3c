use std::error;
use std::fmt;

use tailsync_config::shared::ValidationError;

/// Result type used by every fallible tailsync operation.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type of the synchronization engine.
///
/// A [`SyncError`] is either a single error made of an [`ErrorKind`], a static description and
/// an optional dynamic detail, or a list of aggregated errors.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<SyncError>),
}

/// Categories of errors raised while replicating a table.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    SourceQueryFailed,

    // Data errors
    ConversionError,
    InvalidData,

    // State errors
    InvalidResumptionState,
    InvalidState,
    UnknownShard,

    // Checkpointing errors
    CheckpointFailed,

    // Configuration errors
    ConfigError,

    // IO and serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    // Coordination errors
    QueueClosed,

    Unknown,
}

impl SyncError {
    /// Creates a [`SyncError`] aggregating multiple errors.
    pub fn many(errors: Vec<SyncError>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of their first error, or [`ErrorKind::Unknown`] when
    /// empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregated errors.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the dynamic detail of this error, if any.
    ///
    /// Aggregated errors report the first detail found.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => errors_a == errors_b,
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [error] => error.fmt(f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }

                    Ok(())
                }
            },
        }
    }
}

impl error::Error for SyncError {}

impl From<(ErrorKind, &'static str)> for SyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for SyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    fn from(errors: Vec<E>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps syntax and data failures to [`ErrorKind::DeserializationError`], the only failures
/// serializing plain data types can produce being I/O ones.
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<bigdecimal::ParseBigDecimalError> for SyncError {
    fn from(err: bigdecimal::ParseBigDecimalError) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::InvalidData,
                "Sequence number parsing failed",
                err.to_string(),
            ),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid configuration",
                err.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, sync_error};

    #[test]
    fn test_simple_error_creation() {
        let err = SyncError::from((ErrorKind::SourceQueryFailed, "Scan failed"));

        assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
        assert_eq!(err.kinds(), vec![ErrorKind::SourceQueryFailed]);
        assert_eq!(err.detail(), None);
    }

    #[test]
    fn test_error_with_detail() {
        let err = SyncError::from((
            ErrorKind::InvalidResumptionState,
            "Stored offset is invalid",
            "missing init_sync_end".to_string(),
        ));

        assert_eq!(err.kind(), ErrorKind::InvalidResumptionState);
        assert_eq!(err.detail(), Some("missing init_sync_end"));
    }

    #[test]
    fn test_multiple_errors() {
        let err = SyncError::many(vec![
            SyncError::from((ErrorKind::CheckpointFailed, "Checkpoint failed")),
            SyncError::from((
                ErrorKind::IoError,
                "Write failed",
                "disk full".to_string(),
            )),
        ]);

        assert_eq!(err.kind(), ErrorKind::CheckpointFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::CheckpointFailed, ErrorKind::IoError]
        );
        assert_eq!(err.detail(), Some("disk full"));
    }

    #[test]
    fn test_empty_multiple_errors() {
        let err = SyncError::many(vec![]);

        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.kinds().is_empty());
        assert_eq!(err.detail(), None);
    }

    #[test]
    fn test_error_equality() {
        let err1 = SyncError::from((ErrorKind::UnknownShard, "Shard is not registered"));
        let err2 = SyncError::from((ErrorKind::UnknownShard, "Shard is not registered"));
        let err3 = SyncError::from((ErrorKind::QueueClosed, "Queue closed"));

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::from((
            ErrorKind::SourceQueryFailed,
            "Table scan failed",
            "throttled".to_string(),
        ));
        let display_str = format!("{err}");

        assert!(display_str.contains("SourceQueryFailed"));
        assert!(display_str.contains("Table scan failed"));
        assert!(display_str.contains("throttled"));

        let multi_err = SyncError::many(vec![
            SyncError::from((ErrorKind::ConversionError, "Unsupported key")),
            SyncError::from((ErrorKind::InvalidData, "Bad sequence number")),
        ]);
        let display_str = format!("{multi_err}");

        assert!(display_str.contains("2 total"));
    }

    #[test]
    fn test_macros() {
        fn failing() -> SyncResult<()> {
            bail!(
                ErrorKind::InvalidState,
                "Snapshot progress applied while tailing",
                "phase: tailing"
            );
        }

        let err = sync_error!(ErrorKind::ConversionError, "Unsupported event name");
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert_eq!(err.detail(), None);

        let err = failing().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.detail(), Some("phase: tailing"));
    }

    #[test]
    fn test_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        assert_eq!(
            SyncError::from(json_err).kind(),
            ErrorKind::DeserializationError
        );

        let validation_err = SyncError::from(ValidationError::EmptyTableName);
        assert_eq!(validation_err.kind(), ErrorKind::ConfigError);
    }
}
