use std::fmt;

use color_eyre::Report;

/// Which lookup a resolution failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionTarget {
    #[error("handle")]
    Handle,
    #[error("endpoint")]
    Endpoint,
}

/// What was wrong with a backup file
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatProblem {
    #[error("file_type")]
    FileType,
    #[error("json")]
    Json,
    #[error("schema")]
    Schema,
    #[error("empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("ResolutionError({0})")]
    Resolution(ResolutionTarget),
    #[error("AuthError")]
    Auth,
    #[error("FormatError({0})")]
    Format(FormatProblem),
    #[error("RemoteWriteError")]
    RemoteWrite,
    #[error("TimeoutError")]
    Timeout,
}

/// The only two things the pipeline ever does after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Go back to handle entry and start over
    RestartFromHandleEntry,
    /// Stay on the file picker and let the user choose another backup
    ReselectFile,
}

/// A failed pipeline step: the underlying report plus the kind of failure it
/// is tagged with at the stage boundary.
pub struct FlowError {
    pub(crate) report: Report,
    pub(crate) kind: ErrorKind,
}

pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    pub fn new(kind: ErrorKind, report: Report) -> Self {
        Self { report, kind }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn recovery(&self) -> Recovery {
        match self.kind {
            ErrorKind::Format(_) => Recovery::ReselectFile,
            ErrorKind::Resolution(_)
            | ErrorKind::Auth
            | ErrorKind::RemoteWrite
            | ErrorKind::Timeout => Recovery::RestartFromHandleEntry,
        }
    }

    /// The message shown to the user for this class of failure.
    ///
    /// Resolution and login failures share one message on purpose: the
    /// recovery is the same and the cause is not told apart.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Format(FormatProblem::FileType) => {
                "Invalid file type! It should be a readable .json file."
            }
            ErrorKind::Format(FormatProblem::Json) => "Invalid file! It is not valid JSON.",
            ErrorKind::Format(FormatProblem::Schema) => "Invalid json file! No posts found!",
            ErrorKind::Format(FormatProblem::Empty) => {
                "No valid posts found in the backup file, nothing to import."
            }
            ErrorKind::Resolution(_) | ErrorKind::Auth => {
                "Could not login! Are the handle and app password valid?"
            }
            ErrorKind::RemoteWrite => "Could not import bookmarks! Check the log for more info.",
            ErrorKind::Timeout => "The server took too long to answer, please try again.",
        }
    }
}

impl fmt::Debug for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.kind, self.report)
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.report)
    }
}

impl std::error::Error for FlowError {}

fn is_timeout(report: &Report) -> bool {
    report.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout())
            || cause.is::<tokio::time::error::Elapsed>()
    })
}

pub(crate) trait WithKind<T> {
    fn with_kind(self, kind: ErrorKind) -> FlowResult<T>;
}

impl<T> WithKind<T> for Result<T, Report> {
    fn with_kind(self, kind: ErrorKind) -> FlowResult<T> {
        match self {
            Ok(val) => Ok(val),
            Err(err) if is_timeout(&err) => Err(FlowError::new(ErrorKind::Timeout, err)),
            Err(err) => Err(FlowError::new(kind, err)),
        }
    }
}
