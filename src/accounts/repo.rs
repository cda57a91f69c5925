use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::accounts::repo_types::{Account, NewAccount, StoreError, UniqueField};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for account records.
///
/// Implementations own the username and email unique indexes and must check them
/// in the same indivisible step as the write.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Assign an id and persist. Fails with [`StoreError::Conflict`] if the username
    /// or email is already taken.
    async fn insert(&self, account: NewAccount) -> StoreResult<Account>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;
    async fn get_by_username(&self, username: &str) -> StoreResult<Option<Account>>;
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn exists_by_id(&self, id: Uuid) -> StoreResult<bool>;
    async fn exists_by_username(&self, username: &str) -> StoreResult<bool>;
    async fn exists_by_email(&self, email: &str) -> StoreResult<bool>;

    /// Replace identity, profile and lifecycle fields by id. `created_at` and
    /// `password_hash` are never rewritten here.
    async fn update(&self, account: &Account) -> StoreResult<Account>;

    /// Swap the stored credential hash alone, so it cannot race a field update.
    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: OffsetDateTime,
    ) -> StoreResult<Account>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    async fn list_all(&self) -> StoreResult<Vec<Account>>;
    async fn list_active(&self) -> StoreResult<Vec<Account>>;
    async fn list_inactive(&self) -> StoreResult<Vec<Account>>;

    /// Case-insensitive substring match on username, email, first or last name.
    async fn search(&self, term: &str) -> StoreResult<Vec<Account>>;

    async fn count_active(&self) -> StoreResult<i64>;
}

macro_rules! select_accounts {
    ($tail:literal) => {
        concat!(
            "SELECT id, username, email, password_hash, first_name, last_name, phone_number, ",
            "active, created_at, updated_at FROM accounts ",
            $tail
        )
    };
}

macro_rules! returning_account {
    () => {
        " RETURNING id, username, email, password_hash, first_name, last_name, phone_number, \
         active, created_at, updated_at"
    };
}

/// Postgres-backed store; uniqueness rides on the table's UNIQUE constraints.
#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Map the name of a violated unique constraint back to the index it guards.
/// Names outside the migration's two secondary indexes map to `None`.
pub(crate) fn conflict_field(constraint: Option<&str>) -> Option<UniqueField> {
    match constraint? {
        "accounts_username_key" => Some(UniqueField::Username),
        "accounts_email_key" => Some(UniqueField::Email),
        _ => None,
    }
}

fn write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if let Some(field) = conflict_field(db_err.constraint()) {
                return StoreError::Conflict(field);
            }
        } else if db_err.is_check_violation() {
            let constraint = db_err.constraint().unwrap_or("check constraint").to_owned();
            return StoreError::Rejected(constraint);
        }
    }
    error!(error = %err, "account write failed");
    StoreError::Unavailable(err)
}

fn read_error(err: sqlx::Error) -> StoreError {
    error!(error = %err, "account read failed");
    StoreError::Unavailable(err)
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn insert(&self, account: NewAccount) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(concat!(
            r#"
            INSERT INTO accounts (id, username, email, password_hash, first_name, last_name,
                                  phone_number, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            returning_account!()
        ))
        .bind(Uuid::new_v4())
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.profile.first_name)
        .bind(&account.profile.last_name)
        .bind(&account.profile.phone_number)
        .bind(account.active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(write_error)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        sqlx::query_as::<_, Account>(select_accounts!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(read_error)
    }

    async fn get_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        sqlx::query_as::<_, Account>(select_accounts!("WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.db)
            .await
            .map_err(read_error)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        sqlx::query_as::<_, Account>(select_accounts!("WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(read_error)
    }

    async fn exists_by_id(&self, id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.db)
            .await
            .map_err(read_error)
    }

    async fn exists_by_username(&self, username: &str) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.db)
        .await
        .map_err(read_error)
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.db)
            .await
            .map_err(read_error)
    }

    async fn update(&self, account: &Account) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(concat!(
            r#"
            UPDATE accounts
               SET username = $2,
                   email = $3,
                   first_name = $4,
                   last_name = $5,
                   phone_number = $6,
                   active = $7,
                   updated_at = $8
             WHERE id = $1
            "#,
            returning_account!()
        ))
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.phone_number)
        .bind(account.active)
        .bind(account.updated_at)
        .fetch_optional(&self.db)
        .await
        .map_err(write_error)?
        .ok_or(StoreError::NotFound)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: OffsetDateTime,
    ) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(concat!(
            r#"
            UPDATE accounts
               SET password_hash = $2,
                   updated_at = GREATEST($3, created_at)
             WHERE id = $1
            "#,
            returning_account!()
        ))
        .bind(id)
        .bind(password_hash)
        .bind(updated_at)
        .fetch_optional(&self.db)
        .await
        .map_err(write_error)?
        .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(write_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(select_accounts!("ORDER BY created_at, id"))
            .fetch_all(&self.db)
            .await
            .map_err(read_error)
    }

    async fn list_active(&self) -> StoreResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(select_accounts!("WHERE active ORDER BY created_at, id"))
            .fetch_all(&self.db)
            .await
            .map_err(read_error)
    }

    async fn list_inactive(&self) -> StoreResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(select_accounts!(
            "WHERE NOT active ORDER BY created_at, id"
        ))
        .fetch_all(&self.db)
        .await
        .map_err(read_error)
    }

    async fn search(&self, term: &str) -> StoreResult<Vec<Account>> {
        // strpos keeps `%` and `_` in the term literal
        sqlx::query_as::<_, Account>(select_accounts!(
            r#"
            WHERE strpos(lower(username), lower($1)) > 0
               OR strpos(lower(email), lower($1)) > 0
               OR strpos(lower(first_name), lower($1)) > 0
               OR strpos(lower(last_name), lower($1)) > 0
            ORDER BY created_at, id
            "#
        ))
        .bind(term)
        .fetch_all(&self.db)
        .await
        .map_err(read_error)
    }

    async fn count_active(&self) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts WHERE active")
            .fetch_one(&self.db)
            .await
            .map_err(read_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_field_reads_constraint_name() {
        assert_eq!(conflict_field(Some("accounts_email_key")), Some(UniqueField::Email));
        assert_eq!(
            conflict_field(Some("accounts_username_key")),
            Some(UniqueField::Username)
        );
    }

    #[test]
    fn unknown_constraints_are_not_attributed() {
        assert_eq!(conflict_field(Some("accounts_pkey")), None);
        assert_eq!(conflict_field(Some("accounts_email_lower_idx")), None);
        assert_eq!(conflict_field(None), None);
    }

    fn new_account(username: &str, email: &str) -> NewAccount {
        let now = time::OffsetDateTime::now_utc();
        NewAccount {
            username: username.into(),
            email: email.into(),
            password_hash: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA".into(),
            profile: Default::default(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable database"]
    async fn pg_store_enforces_unique_indexes() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect(&url)
            .await
            .expect("connect");
        sqlx::migrate!("./migrations").run(&db).await.expect("migrate");
        let store = PgAccountStore::new(db);

        let tag = Uuid::new_v4().simple().to_string();
        let (user, mail) = (format!("u_{tag}"), format!("{tag}@x.com"));
        let first = store.insert(new_account(&user, &mail)).await.unwrap();

        let err = store
            .insert(new_account(&user, &format!("other_{mail}")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::Username)));
        let err = store
            .insert(new_account(&format!("other_{user}"), &mail))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::Email)));

        let hits = store.search(&tag[..8].to_uppercase()).await.unwrap();
        assert!(hits.iter().any(|a| a.id == first.id));
        // LIKE wildcards in the term are matched literally
        assert!(!store.search("%").await.unwrap().iter().any(|a| a.id == first.id));

        let err = store.insert(new_account("", &format!("blank_{mail}"))).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        // a stale record handed to update never carries its hash back
        let rotated = "$argon2id$v=19$m=8,t=1,p=1$c2FsdDI$aGFzaDI";
        let stale = first.clone();
        store
            .set_password(first.id, rotated, time::OffsetDateTime::now_utc())
            .await
            .unwrap();
        let mut changed = stale;
        changed.active = false;
        let saved = store.update(&changed).await.unwrap();
        assert!(!saved.active);
        assert_eq!(saved.created_at, first.created_at);
        assert_eq!(saved.password_hash, rotated);

        store.delete(first.id).await.unwrap();
        assert!(matches!(store.delete(first.id).await, Err(StoreError::NotFound)));
        assert!(matches!(store.update(&changed).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.set_password(first.id, rotated, time::OffsetDateTime::now_utc()).await,
            Err(StoreError::NotFound)
        ));
    }
}
