//! Error types and result definitions for the apply layer.
//!
//! [`LoaderError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source error and the callsite where it was created. Failures of
//! concurrently applied batches or tables are aggregated into a single error holding all of them.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use sqlx::mysql::MySqlDatabaseError;

/// Result type used by every fallible operation of the apply layer.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// MySQL error number reported for duplicate entries on a unique index.
const ER_DUP_ENTRY: u16 = 1062;
/// MySQL error number reported when a table does not exist.
const ER_NO_SUCH_TABLE: u16 = 1146;
/// MySQL error number reported when a lock wait times out.
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
/// MySQL error number reported when a deadlock is detected.
const ER_LOCK_DEADLOCK: u16 = 1213;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the apply layer.
#[derive(Debug, Clone)]
pub struct LoaderError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload.
    Single(ErrorPayload),
    /// Multiple aggregated errors, in the order they were observed.
    Many {
        errors: Vec<LoaderError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised while applying changes.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Destination errors
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationConstraintViolation,
    DestinationTransactionFailed,
    DestinationTableMissing,

    // Data errors
    KeyResolutionFailed,
    ConversionError,
    InvalidData,

    // Configuration errors
    ConfigError,

    // IO and serialization errors
    IoError,
    DeserializationError,

    // State errors
    ApplyTaskPanic,
    InvalidState,

    Unknown,
}

impl LoaderError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of their first error, or [`ErrorKind::Unknown`] when
    /// empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    ///
    /// Aggregated errors report the description of their first error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.description.as_ref(),
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("no inner errors"),
        }
    }

    /// Returns the dynamic detail if available.
    ///
    /// Aggregated errors return the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, or an empty slice for a single error.
    pub fn errors(&self) -> &[LoaderError] {
        match self.repr {
            ErrorRepr::Single(_) => &[],
            ErrorRepr::Many { ref errors, .. } => errors,
        }
    }

    /// Returns the captured backtrace of a single error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the callsite where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        LoaderError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for LoaderError {
    fn eq(&self, other: &LoaderError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        if line.is_empty() {
                            write!(f, "\n     ")?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        if line.trim().is_empty() {
            write!(f, "\n  ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered = backtrace.to_string();
    if rendered.trim().is_empty() {
        return Ok(());
    }

    write!(f, "\n  Backtrace:")?;
    for line in rendered.lines() {
        if line.trim().is_empty() {
            write!(f, "\n  ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for LoaderError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> LoaderError {
        LoaderError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for LoaderError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> LoaderError {
        LoaderError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors, unwrapping a single-element list into that element.
impl<E> From<Vec<E>> for LoaderError
where
    E: Into<LoaderError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> LoaderError {
        let location = Location::caller();

        let mut errors: Vec<LoaderError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        LoaderError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for LoaderError {
    #[track_caller]
    fn from(err: std::io::Error) -> LoaderError {
        let detail = err.to_string();
        LoaderError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for LoaderError {
    #[track_caller]
    fn from(err: serde_json::Error) -> LoaderError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        LoaderError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] into [`LoaderError`], classifying MySQL error numbers.
impl From<sqlx::Error> for LoaderError {
    #[track_caller]
    fn from(err: sqlx::Error) -> LoaderError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => {
                let number = db_err
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map(|mysql_err| mysql_err.number());

                match number {
                    Some(ER_DUP_ENTRY) => (
                        ErrorKind::DestinationConstraintViolation,
                        "MySQL duplicate entry",
                    ),
                    Some(ER_NO_SUCH_TABLE) => {
                        (ErrorKind::DestinationTableMissing, "MySQL table missing")
                    }
                    Some(ER_LOCK_WAIT_TIMEOUT) | Some(ER_LOCK_DEADLOCK) => (
                        ErrorKind::DestinationTransactionFailed,
                        "MySQL transaction aborted",
                    ),
                    _ => (ErrorKind::DestinationQueryFailed, "MySQL query failed"),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => (
                ErrorKind::DestinationConnectionFailed,
                "MySQL connection failed",
            ),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "MySQL connection misconfigured")
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::Encode(_) => {
                (ErrorKind::ConversionError, "MySQL value conversion failed")
            }
            _ => (ErrorKind::DestinationQueryFailed, "MySQL operation failed"),
        };

        let detail = err.to_string();
        LoaderError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::{bail, loader_error};

    #[test]
    fn single_error_reports_kind_and_detail() {
        let err = loader_error!(
            ErrorKind::InvalidData,
            "Batch mixes tables",
            "`a`.`b` and `a`.`c`"
        );

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(err.description(), "Batch mixes tables");
        assert_eq!(err.detail(), Some("`a`.`b` and `a`.`c`"));
        assert!(err.errors().is_empty());
        assert!(err.to_string().starts_with("[InvalidData] Batch mixes tables"));
    }

    #[test]
    fn aggregate_of_one_error_is_that_error() {
        let err: LoaderError = vec![loader_error!(ErrorKind::IoError, "io")].into();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(err.errors().is_empty());
    }

    #[test]
    fn aggregate_keeps_observation_order() {
        let err: LoaderError = vec![
            loader_error!(ErrorKind::DestinationQueryFailed, "first"),
            loader_error!(ErrorKind::DestinationConstraintViolation, "second"),
        ]
        .into();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(
            err.kinds(),
            vec![
                ErrorKind::DestinationQueryFailed,
                ErrorKind::DestinationConstraintViolation
            ]
        );
        assert_eq!(err.errors().len(), 2);

        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated"));
        assert!(rendered.contains("1. [DestinationQueryFailed] first"));
        assert!(rendered.contains("2. [DestinationConstraintViolation] second"));
    }

    #[test]
    fn source_is_preserved() {
        let io_err = std::io::Error::other("disk gone");
        let err = loader_error!(ErrorKind::IoError, "Read failed", source: io_err);

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "disk gone");
    }

    #[test]
    fn bail_returns_error() {
        fn fails() -> LoaderResult<()> {
            bail!(ErrorKind::ConfigError, "Bad configuration", detail = "x".to_string());
        }

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert_eq!(err.detail(), Some("x"));
    }

    #[test]
    fn serde_json_errors_are_deserialization_errors() {
        let err: LoaderError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[test]
    fn pool_timeout_is_a_connection_failure() {
        let err: LoaderError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
    }
}
