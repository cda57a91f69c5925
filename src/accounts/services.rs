use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::accounts::{
    dto::PublicAccount,
    error::AccountError,
    password::CredentialHasher,
    repo::AccountStore,
    repo_types::{Account, AccountUpdate, NewAccount, ProfileFields},
};

pub type AccountResult<T> = Result<T, AccountError>;

/// Account lifecycle and credential rules layered over an [`AccountStore`].
///
/// Holds no account state of its own: every call re-reads from the store, and the
/// store's unique indexes are the final word on username and email collisions.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    hasher: Arc<dyn CredentialHasher>,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountStore>, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { store, hasher }
    }

    #[instrument(skip(self, password, profile))]
    pub async fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        profile: ProfileFields,
    ) -> AccountResult<PublicAccount> {
        if username.trim().is_empty() {
            return Err(AccountError::EmptyUsername);
        }
        if self.store.exists_by_username(username).await? {
            warn!("username already exists");
            return Err(AccountError::DuplicateUsername);
        }
        if self.store.exists_by_email(email).await? {
            warn!("email already exists");
            return Err(AccountError::DuplicateEmail);
        }

        let password_hash = self.hasher.hash(password).map_err(AccountError::Hashing)?;
        let now = OffsetDateTime::now_utc();
        let new = NewAccount {
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash,
            profile,
            active: true,
            created_at: now,
            updated_at: now,
        };

        // a concurrent creator can slip past the checks above; the store's
        // Conflict converts into the same duplicate error
        let account = self.store.insert(new).await.map_err(|e| {
            let err = AccountError::from(e);
            warn!(error = %err, "account insert rejected");
            err
        })?;

        info!(account_id = %account.id, "account created");
        Ok(account.into())
    }

    pub async fn get_account(&self, id: Uuid) -> AccountResult<Option<PublicAccount>> {
        Ok(self.store.get_by_id(id).await?.map(Into::into))
    }

    pub async fn get_account_by_username(
        &self,
        username: &str,
    ) -> AccountResult<Option<PublicAccount>> {
        Ok(self.store.get_by_username(username).await?.map(Into::into))
    }

    pub async fn get_account_by_email(&self, email: &str) -> AccountResult<Option<PublicAccount>> {
        Ok(self.store.get_by_email(email).await?.map(Into::into))
    }

    #[instrument(skip(self, update), fields(username = %update.username))]
    pub async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
    ) -> AccountResult<PublicAccount> {
        if update.username.trim().is_empty() {
            return Err(AccountError::EmptyUsername);
        }
        let mut account = self.load(id).await?;

        if account.username != update.username
            && self.store.exists_by_username(&update.username).await?
        {
            warn!("username already exists");
            return Err(AccountError::DuplicateUsername);
        }
        if account.email != update.email && self.store.exists_by_email(&update.email).await? {
            warn!("email already exists");
            return Err(AccountError::DuplicateEmail);
        }

        account.username = update.username;
        account.email = update.email;
        account.set_profile(update.profile);
        if let Some(active) = update.active {
            account.active = active;
        }
        account.touch();

        let saved = self.store.update(&account).await?;
        info!(account_id = %saved.id, "account updated");
        Ok(saved.into())
    }

    #[instrument(skip(self, current_password, new_password, confirm_password))]
    pub async fn change_password(
        &self,
        id: Uuid,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> AccountResult<()> {
        let account = self.load(id).await?;

        let ok = self
            .hasher
            .verify(current_password, &account.password_hash)
            .map_err(AccountError::Hashing)?;
        if !ok {
            warn!("current password did not verify");
            return Err(AccountError::InvalidCredentials);
        }
        if new_password != confirm_password {
            return Err(AccountError::PasswordMismatch);
        }

        let password_hash = self.hasher.hash(new_password).map_err(AccountError::Hashing)?;
        self.store
            .set_password(id, &password_hash, OffsetDateTime::now_utc())
            .await?;
        info!(account_id = %id, "password changed");
        Ok(())
    }

    /// Login check. Every failure, including storage faults, is reported as `false`
    /// so callers cannot tell an unknown username from a wrong password.
    #[instrument(skip(self, password))]
    pub async fn validate_credentials(&self, username: &str, password: &str) -> bool {
        let account = match self.store.get_by_username(username).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "credential lookup failed");
                None
            }
        };

        let Some(account) = account else {
            self.hasher.verify_decoy(password);
            return false;
        };

        let matched = match self.hasher.verify(password, &account.password_hash) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, account_id = %account.id, "stored hash unreadable");
                false
            }
        };
        matched && account.active
    }

    #[instrument(skip(self))]
    pub async fn deactivate_account(&self, id: Uuid) -> AccountResult<PublicAccount> {
        self.set_active(id, false).await
    }

    #[instrument(skip(self))]
    pub async fn activate_account(&self, id: Uuid) -> AccountResult<PublicAccount> {
        self.set_active(id, true).await
    }

    #[instrument(skip(self))]
    pub async fn delete_account(&self, id: Uuid) -> AccountResult<()> {
        self.store.delete(id).await?;
        info!(account_id = %id, "account deleted");
        Ok(())
    }

    pub async fn list_all(&self) -> AccountResult<Vec<PublicAccount>> {
        Ok(public(self.store.list_all().await?))
    }

    pub async fn list_active(&self) -> AccountResult<Vec<PublicAccount>> {
        Ok(public(self.store.list_active().await?))
    }

    pub async fn list_inactive(&self) -> AccountResult<Vec<PublicAccount>> {
        Ok(public(self.store.list_inactive().await?))
    }

    pub async fn search_accounts(&self, term: &str) -> AccountResult<Vec<PublicAccount>> {
        Ok(public(self.store.search(term).await?))
    }

    pub async fn count_active(&self) -> AccountResult<i64> {
        Ok(self.store.count_active().await?)
    }

    pub async fn account_exists(&self, id: Uuid) -> AccountResult<bool> {
        Ok(self.store.exists_by_id(id).await?)
    }

    async fn load(&self, id: Uuid) -> AccountResult<Account> {
        self.store.get_by_id(id).await?.ok_or(AccountError::NotFound)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> AccountResult<PublicAccount> {
        let mut account = self.load(id).await?;
        account.active = active;
        account.touch();
        let saved = self.store.update(&account).await?;
        info!(account_id = %id, active, "account lifecycle changed");
        Ok(saved.into())
    }
}

fn public(rows: Vec<Account>) -> Vec<PublicAccount> {
    rows.into_iter().map(Into::into).collect()
}
