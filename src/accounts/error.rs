use axum::http::StatusCode;
use thiserror::Error;

use crate::accounts::repo_types::{StoreError, UniqueField};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account not found")]
    NotFound,
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("account rejected: {0}")]
    InvalidRecord(String),
    #[error("username already exists")]
    DuplicateUsername,
    #[error("email already exists")]
    DuplicateEmail,
    #[error("current password is incorrect")]
    InvalidCredentials,
    #[error("new password and confirmation do not match")]
    PasswordMismatch,
    #[error("storage unavailable")]
    StorageUnavailable(#[source] sqlx::Error),
    #[error("credential hashing failed: {0}")]
    Hashing(anyhow::Error),
}

impl AccountError {
    /// Only transient storage faults are worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccountError::StorageUnavailable(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AccountError::NotFound => StatusCode::NOT_FOUND,
            AccountError::DuplicateUsername | AccountError::DuplicateEmail => StatusCode::CONFLICT,
            AccountError::EmptyUsername
            | AccountError::InvalidRecord(_)
            | AccountError::InvalidCredentials
            | AccountError::PasswordMismatch => StatusCode::BAD_REQUEST,
            AccountError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AccountError::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(UniqueField::Username) => AccountError::DuplicateUsername,
            StoreError::Conflict(UniqueField::Email) => AccountError::DuplicateEmail,
            StoreError::NotFound => AccountError::NotFound,
            StoreError::Rejected(constraint) => AccountError::InvalidRecord(constraint),
            StoreError::Unavailable(e) => AccountError::StorageUnavailable(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_map_to_duplicates() {
        assert!(matches!(
            AccountError::from(StoreError::Conflict(UniqueField::Username)),
            AccountError::DuplicateUsername
        ));
        assert!(matches!(
            AccountError::from(StoreError::Conflict(UniqueField::Email)),
            AccountError::DuplicateEmail
        ));
        assert!(matches!(AccountError::from(StoreError::NotFound), AccountError::NotFound));
    }

    #[test]
    fn only_storage_faults_are_retryable() {
        let unavailable = AccountError::from(StoreError::Unavailable(sqlx::Error::PoolTimedOut));
        assert!(unavailable.is_retryable());
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!AccountError::DuplicateEmail.is_retryable());
        assert!(!AccountError::InvalidCredentials.is_retryable());
    }

    #[test]
    fn rejected_rows_are_client_errors() {
        let rejected = AccountError::from(StoreError::Rejected("accounts_username_check".into()));
        assert!(matches!(&rejected, AccountError::InvalidRecord(c) if c == "accounts_username_check"));
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert!(!AccountError::EmptyUsername.is_retryable());
        assert_eq!(AccountError::EmptyUsername.status(), StatusCode::BAD_REQUEST);
    }
}
