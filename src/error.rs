use thiserror::Error;

#[derive(Error, Debug)]
pub enum GradingError {
    #[error("quiz not found: {0}")]
    QuizNotFound(String),

    #[error("maximum grade must be a finite number >= 0, got {0}")]
    InvalidMaxGrade(f64),

    /// A persisted grade method code with no matching policy. This is a
    /// defect in whatever wrote the quiz row, never a runtime condition.
    #[error("unknown grade method code: {0}")]
    UnknownGradeMethod(i64),

    #[error("unknown attempt state: {0}")]
    UnknownAttemptState(String),

    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl GradingError {
    /// Stable error code used in sidecar responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuizNotFound(_) => "not_found",
            Self::InvalidMaxGrade(_) => "bad_params",
            Self::UnknownGradeMethod(_) | Self::UnknownAttemptState(_) => "internal_error",
            Self::Collaborator { .. } => "collaborator_failed",
            Self::Db(_) => "db_query_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, GradingError>;
