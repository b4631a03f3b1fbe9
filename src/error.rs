//! User-visible failures of the installer and batch workflows.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a failure; drives the CLI exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Forbidden,
    NotFound,
    Validation,
    ExternalCommand,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Disabled(&'static str),

    #[error("No such app: {0}")]
    UnknownApp(String),

    #[error("No such platform: {0}")]
    UnknownPlatform(String),

    #[error("File {0} is not in your sandbox")]
    NotInSandbox(String),

    #[error("no such batch: {0}")]
    NoSuchBatch(i64),

    #[error("batch {0} is not your batch")]
    NotYourBatch(i64),

    #[error("batch {0} already submitted")]
    AlreadySubmitted(i64),

    #[error("batch {0} is already being submitted")]
    SubmitInFlight(i64),

    #[error("App version dir already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Validation(ValidationIssues),

    #[error("{command} failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SubmitError::Disabled(_) | SubmitError::NotYourBatch(_) => ErrorClass::Forbidden,
            SubmitError::UnknownApp(_)
            | SubmitError::UnknownPlatform(_)
            | SubmitError::NotInSandbox(_)
            | SubmitError::NoSuchBatch(_) => ErrorClass::NotFound,
            SubmitError::InvalidRequest(_) | SubmitError::Validation(_) => ErrorClass::Validation,
            SubmitError::CommandFailed { .. } => ErrorClass::ExternalCommand,
            SubmitError::AlreadyExists(_)
            | SubmitError::AlreadySubmitted(_)
            | SubmitError::SubmitInFlight(_) => ErrorClass::Conflict,
            SubmitError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Internal => 1,
            ErrorClass::Forbidden => 2,
            ErrorClass::NotFound => 3,
            ErrorClass::Validation => 4,
            ErrorClass::ExternalCommand => 5,
            ErrorClass::Conflict => 6,
        }
    }

    pub(crate) fn io(what: impl fmt::Display, err: std::io::Error) -> Self {
        SubmitError::Internal(anyhow::Error::new(err).context(what.to_string()))
    }
}

/// One problem found while validating a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingInputFile(String),
    NotRegularFile(String),
    Malformed { file: String, detail: String, excerpt: String },
    BadFileName(String),
    QuoteInCommandLine { line: usize },
    NoJobs,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingInputFile(name) => write!(f, "Missing input file {}", name),
            ValidationIssue::NotRegularFile(name) => {
                write!(f, "Input file {} is not a regular file", name)
            }
            ValidationIssue::Malformed {
                file,
                detail,
                excerpt,
            } => write!(f, "JSON parse error in {}: {}\n{}", file, detail, excerpt),
            ValidationIssue::BadFileName(name) => write!(f, "Invalid input file name {:?}", name),
            ValidationIssue::QuoteInCommandLine { line } => write!(
                f,
                "Job description line {}: command line may not contain '\"'",
                line
            ),
            ValidationIssue::NoJobs => write!(f, "Job description file has no jobs"),
        }
    }
}

/// Every problem found in a batch, reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationIssues(pub Vec<ValidationIssue>);

impl ValidationIssues {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.0.iter()
    }
}

impl fmt::Display for ValidationIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch validation failed:")?;
        for issue in &self.0 {
            write!(f, "\n  {}", issue)?;
        }
        Ok(())
    }
}
