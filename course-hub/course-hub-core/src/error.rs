//! Typed failures surfaced by the chain, the snapshot repository and the
//! course service.

/// Boundary category an error maps to when it leaves the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Missing,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("chain already initialized")]
    AlreadyInitialized,
    #[error("no root document in chain directory")]
    MissingRoot,
    #[error("the root document cannot be deleted")]
    RootDeletionForbidden,
    #[error("no node codes left in chain")]
    CodeSpaceExhausted,
    #[error("inconsistent chain: {0}")]
    InconsistentChain(String),
    #[error("title already in use: {0}")]
    TitleConflict(String),
    #[error("invalid title: {0:?}")]
    InvalidTitle(String),
    #[error("storage failure")]
    Io(#[from] std::io::Error),
    #[error("version control failure")]
    Vcs(#[from] git2::Error),
    #[error("revert failed: {0}")]
    RevertFailure(String),
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::NotFound(_) => ErrorClass::Missing,
            ChainError::AlreadyInitialized
            | ChainError::TitleConflict(_)
            | ChainError::InvalidTitle(_)
            | ChainError::RootDeletionForbidden => ErrorClass::Conflict,
            ChainError::MissingRoot
            | ChainError::CodeSpaceExhausted
            | ChainError::InconsistentChain(_)
            | ChainError::Io(_)
            | ChainError::Vcs(_)
            | ChainError::RevertFailure(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
