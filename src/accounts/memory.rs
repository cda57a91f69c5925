use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::accounts::repo::{AccountStore, StoreResult};
use crate::accounts::repo_types::{Account, NewAccount, StoreError, UniqueField};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    by_username: HashMap<String, Uuid>,
    by_email: HashMap<String, Uuid>,
}

/// Same rule as the table's `length(username) > 0` CHECK.
fn check_row(username: &str) -> StoreResult<()> {
    if username.is_empty() {
        return Err(StoreError::Rejected("accounts_username_check".into()));
    }
    Ok(())
}

impl Tables {
    /// `owner` is the account allowed to already hold the key.
    fn check_unique(&self, username: &str, email: &str, owner: Option<Uuid>) -> StoreResult<()> {
        let taken = |index: &HashMap<String, Uuid>, key: &str| {
            index.get(key).is_some_and(|id| Some(*id) != owner)
        };
        if taken(&self.by_username, username) {
            return Err(StoreError::Conflict(UniqueField::Username));
        }
        if taken(&self.by_email, email) {
            return Err(StoreError::Conflict(UniqueField::Email));
        }
        Ok(())
    }

    fn collect<F>(&self, keep: F) -> Vec<Account>
    where
        F: Fn(&Account) -> bool,
    {
        let mut rows: Vec<Account> = self.accounts.values().filter(|&a| keep(a)).cloned().collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        rows
    }
}

/// Process-local store. Every write takes the single write guard, so the
/// uniqueness check and the mutation happen as one step.
#[derive(Default)]
pub struct InMemoryAccountStore {
    tables: RwLock<Tables>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: NewAccount) -> StoreResult<Account> {
        check_row(&account.username)?;
        let mut t = self.tables.write().await;
        t.check_unique(&account.username, &account.email, None)?;

        let id = Uuid::new_v4();
        let account = account.into_account(id);
        t.by_username.insert(account.username.clone(), id);
        t.by_email.insert(account.email.clone(), id);
        t.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let t = self.tables.read().await;
        Ok(t.by_username.get(username).and_then(|id| t.accounts.get(id)).cloned())
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let t = self.tables.read().await;
        Ok(t.by_email.get(email).and_then(|id| t.accounts.get(id)).cloned())
    }

    async fn exists_by_id(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.read().await.accounts.contains_key(&id))
    }

    async fn exists_by_username(&self, username: &str) -> StoreResult<bool> {
        Ok(self.tables.read().await.by_username.contains_key(username))
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        Ok(self.tables.read().await.by_email.contains_key(email))
    }

    async fn update(&self, account: &Account) -> StoreResult<Account> {
        check_row(&account.username)?;
        let mut t = self.tables.write().await;
        let current = t.accounts.get(&account.id).ok_or(StoreError::NotFound)?;
        let (old_username, old_email) = (current.username.clone(), current.email.clone());
        let (password_hash, created_at) = (current.password_hash.clone(), current.created_at);
        t.check_unique(&account.username, &account.email, Some(account.id))?;

        let mut stored = account.clone();
        stored.password_hash = password_hash;
        stored.created_at = created_at;
        if old_username != stored.username {
            t.by_username.remove(&old_username);
            t.by_username.insert(stored.username.clone(), stored.id);
        }
        if old_email != stored.email {
            t.by_email.remove(&old_email);
            t.by_email.insert(stored.email.clone(), stored.id);
        }
        t.accounts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: OffsetDateTime,
    ) -> StoreResult<Account> {
        let mut t = self.tables.write().await;
        let stored = t.accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.password_hash = password_hash.to_owned();
        stored.updated_at = updated_at.max(stored.created_at);
        Ok(stored.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let removed = t.accounts.remove(&id).ok_or(StoreError::NotFound)?;
        t.by_username.remove(&removed.username);
        t.by_email.remove(&removed.email);
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<Account>> {
        Ok(self.tables.read().await.collect(|_| true))
    }

    async fn list_active(&self) -> StoreResult<Vec<Account>> {
        Ok(self.tables.read().await.collect(|a| a.active))
    }

    async fn list_inactive(&self) -> StoreResult<Vec<Account>> {
        Ok(self.tables.read().await.collect(|a| !a.active))
    }

    async fn search(&self, term: &str) -> StoreResult<Vec<Account>> {
        let needle = term.to_lowercase();
        Ok(self.tables.read().await.collect(|a| a.matches_term(&needle)))
    }

    async fn count_active(&self) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.accounts.values().filter(|a| a.active).count() as i64)
    }
}
