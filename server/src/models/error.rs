use thiserror::Error;

/// Failures reported by the persistence layer and the ticket services built on it.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("document could not be found")]
    NotFound,

    #[error("document already exists when it should be unique")]
    AlreadyExists,

    #[error("no documents were modified/deleted")]
    NoDocumentModified,

    #[error("cannot update forbidden / unknown attribute '{0}'")]
    EditNotAllowed(String),

    /// A stored document references another document that no longer exists.
    #[error("referential integrity violated: {0}")]
    Integrity(String),

    #[error("stored document is malformed: {0}")]
    Malformed(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ModelError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound)
    }
}
