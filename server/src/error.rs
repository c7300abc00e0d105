#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("an active focus period already exists")]
    AlreadyActive,
    #[error("there is no active focus period")]
    NoActivePeriod,
    #[error("goal #{0} does not exist")]
    GoalNotFound(u32),
    #[error("goal #{0} is already completed")]
    AlreadyCompleted(u32),
    #[error("already checked in today")]
    DuplicateCheckIn,
    #[error("challenge not found")]
    ChallengeNotFound,
    #[error("not a participant of this challenge")]
    NotParticipant,
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("members cannot validate their own completion")]
    SelfValidation,
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    /// Domain outcomes the member should see as-is. Everything else is
    /// reported as a generic "try again".
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Error::Storage(_))
    }

    pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
        matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
