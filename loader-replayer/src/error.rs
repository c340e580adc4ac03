use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use loader::error::LoaderError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type ReplayerResult<T> = Result<T, ReplayerError>;

/// Captured backtrace wrapper rendering the trace itself in `Debug` output.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the replayer binary.
///
/// Wraps [`LoaderError`] for replay failures and adds variants for startup errors.
#[derive(Debug)]
pub enum ReplayerError {
    /// Reading or applying the change stream failed.
    Loader(LoaderError),
    /// Configuration, tracing or metrics setup failed.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
}

impl ReplayerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ReplayerError::Loader(_) => "replay error",
            ReplayerError::Config(_, _) => "configuration error",
            ReplayerError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ReplayerError::Loader(err) => err.backtrace(),
            ReplayerError::Config(_, cb) => Some(&cb.0),
            ReplayerError::Io(_, cb) => Some(&cb.0),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplayerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report for terminal output listing the cause chain.
    ///
    /// Aggregated loader errors already list every inner error in their display form, so their
    /// causes are not repeated.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("replayer failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let aggregated = matches!(self, ReplayerError::Loader(err) if !err.errors().is_empty());
        if !aggregated {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace() {
            if let Some(backtrace) = self.backtrace() {
                out.push_str("backtrace:\n");
                out.push_str(&backtrace.to_string());
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }

        out
    }
}

impl fmt::Display for ReplayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayerError::Loader(err) => write!(f, "{err}"),
            ReplayerError::Config(source, _) => write!(f, "configuration error: {source}"),
            ReplayerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ReplayerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplayerError::Loader(err) => err.source(),
            ReplayerError::Config(source, _) => Some(source.as_ref()),
            ReplayerError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for ReplayerError {
    fn from(err: std::io::Error) -> Self {
        ReplayerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<LoaderError> for ReplayerError {
    fn from(err: LoaderError) -> Self {
        ReplayerError::Loader(err)
    }
}

#[cfg(test)]
mod tests {
    use loader::error::ErrorKind;

    use super::*;

    #[test]
    fn report_lists_the_cause_chain() {
        let report = ReplayerError::from(LoaderError::from((
            ErrorKind::IoError,
            "Reading change stream failed",
        )))
        .render_report();
        assert!(report.starts_with("replayer failed\ncategory: replay error\n"));

        let report = ReplayerError::from(std::io::Error::other("disk unplugged")).render_report();
        assert!(report.contains("category: i/o error"));
        assert!(report.contains("error: i/o error: disk unplugged"));
    }

    #[test]
    fn config_errors_keep_their_source() {
        let err = ReplayerError::config(std::io::Error::other("bad yaml"));
        assert_eq!(err.category(), "configuration error");
        assert_eq!(err.source().map(|source| source.to_string()), Some("bad yaml".to_string()));
    }
}
