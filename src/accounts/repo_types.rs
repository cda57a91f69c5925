use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Account record as persisted by an [`AccountStore`](super::repo::AccountStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // PHC string, never exposed in JSON
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Bump `updated_at`, never letting it fall behind `created_at`.
    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc().max(self.created_at);
    }

    pub fn set_profile(&mut self, profile: ProfileFields) {
        self.first_name = profile.first_name;
        self.last_name = profile.last_name;
        self.phone_number = profile.phone_number;
    }

    pub(crate) fn matches_term(&self, needle_lower: &str) -> bool {
        let hit = |field: &str| field.to_lowercase().contains(needle_lower);
        hit(&self.username)
            || hit(&self.email)
            || self.first_name.as_deref().is_some_and(hit)
            || self.last_name.as_deref().is_some_and(hit)
    }
}

/// Everything but the id; the store assigns that on insert.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile: ProfileFields,
    pub active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl NewAccount {
    pub(crate) fn into_account(self, id: Uuid) -> Account {
        Account {
            id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.profile.first_name,
            last_name: self.profile.last_name,
            phone_number: self.profile.phone_number,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Optional display metadata attached to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Full replacement of an account's mutable, non-credential fields.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub username: String,
    pub email: String,
    pub profile: ProfileFields,
    /// `None` leaves the lifecycle flag as stored.
    pub active: Option<bool>,
}

/// Secondary index that a write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already taken")]
    Conflict(UniqueField),
    #[error("account not found")]
    NotFound,
    /// A schema CHECK constraint refused the row.
    #[error("record rejected by {0}")]
    Rejected(String),
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}
