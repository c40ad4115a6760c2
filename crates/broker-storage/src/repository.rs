//! The account repository, plus the request-row repository that backs it:
//! an `async_trait` CRUD surface over the sea-orm entities.

use async_trait::async_trait;
use broker_common::{Account, AccountId, RequestRecord};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use thiserror::Error;

use crate::convert;
use crate::entities::{accounts, requests};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("account not found: {0}")]
    NotFound(AccountId),
    #[error("account name already exists: {0}")]
    DuplicateName(String),
    #[error("stored row is inconsistent: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable account state. All writes are single-statement; callers see a
/// consistent snapshot because every read in this process goes through the
/// same connection pool — each read takes its own row snapshot.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn list(&self) -> StorageResult<Vec<Account>>;
    async fn get_by_id(&self, id: AccountId) -> StorageResult<Option<Account>>;
    async fn get_by_name(&self, name: &str) -> StorageResult<Option<Account>>;
    async fn insert(&self, account: Account) -> StorageResult<Account>;
    async fn remove(&self, id: AccountId) -> StorageResult<()>;
    async fn mark_rate_limited(&self, id: AccountId, until_ms: i64) -> StorageResult<()>;
    async fn clear_rate_limit(&self, id: AccountId) -> StorageResult<()>;
    async fn pause(&self, id: AccountId) -> StorageResult<()>;
    async fn resume(&self, id: AccountId) -> StorageResult<()>;
    async fn set_priority(&self, id: AccountId, priority: i32) -> StorageResult<()>;
    /// Bumps `request_count`, `total_requests`, `session_request_count`
    /// (resetting the session first if the window elapsed), and
    /// `last_used_at`, all in one statement so the counters are applied by
    /// a single serialising writer.
    async fn touch_usage(&self, id: AccountId, now_ms: i64, session_window_ms: i64) -> StorageResult<()>;
    async fn update_tokens(
        &self,
        id: AccountId,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: i64,
    ) -> StorageResult<()>;
    /// Terminal failure: clears `expires_at`, sets
    /// `last_error = "reauth_required"`.
    async fn mark_reauth_required(&self, id: AccountId) -> StorageResult<()>;
    async fn reset_stats(&self) -> StorageResult<()>;
}

pub struct SeaOrmAccountRepository {
    db: DatabaseConnection,
}

impl SeaOrmAccountRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountRepository for SeaOrmAccountRepository {
    async fn list(&self) -> StorageResult<Vec<Account>> {
        let models = accounts::Entity::find().all(&self.db).await?;
        models
            .into_iter()
            .map(|m| convert::account_from_model(m).map_err(StorageError::Corrupt))
            .collect()
    }

    async fn get_by_id(&self, id: AccountId) -> StorageResult<Option<Account>> {
        let model = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await?;
        model
            .map(|m| convert::account_from_model(m).map_err(StorageError::Corrupt))
            .transpose()
    }

    async fn get_by_name(&self, name: &str) -> StorageResult<Option<Account>> {
        let model = accounts::Entity::find()
            .filter(accounts::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        model
            .map(|m| convert::account_from_model(m).map_err(StorageError::Corrupt))
            .transpose()
    }

    async fn insert(&self, account: Account) -> StorageResult<Account> {
        if self.get_by_name(&account.name).await?.is_some() {
            return Err(StorageError::DuplicateName(account.name));
        }
        let active = convert::account_to_active_model(&account).map_err(StorageError::Corrupt)?;
        active.insert(&self.db).await?;
        Ok(account)
    }

    async fn remove(&self, id: AccountId) -> StorageResult<()> {
        accounts::Entity::delete_by_id(id.to_string()).exec(&self.db).await?;
        Ok(())
    }

    async fn mark_rate_limited(&self, id: AccountId, until_ms: i64) -> StorageResult<()> {
        let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await? else {
            return Err(StorageError::NotFound(id));
        };
        // Idempotent re-application of the same mark is a no-op.
        if model.rate_limited_until == Some(until_ms) {
            return Ok(());
        }
        let mut active: accounts::ActiveModel = model.into();
        active.rate_limited_until = sea_orm::ActiveValue::Set(Some(until_ms));
        active.update(&self.db).await?;
        Ok(())
    }

    async fn clear_rate_limit(&self, id: AccountId) -> StorageResult<()> {
        let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await? else {
            return Err(StorageError::NotFound(id));
        };
        let mut active: accounts::ActiveModel = model.into();
        active.rate_limited_until = sea_orm::ActiveValue::Set(None);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn pause(&self, id: AccountId) -> StorageResult<()> {
        set_paused(&self.db, id, true).await
    }

    async fn resume(&self, id: AccountId) -> StorageResult<()> {
        set_paused(&self.db, id, false).await
    }

    async fn set_priority(&self, id: AccountId, priority: i32) -> StorageResult<()> {
        let clamped = priority.clamp(0, 100);
        let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await? else {
            return Err(StorageError::NotFound(id));
        };
        let mut active: accounts::ActiveModel = model.into();
        active.priority = sea_orm::ActiveValue::Set(clamped);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn touch_usage(&self, id: AccountId, now_ms: i64, session_window_ms: i64) -> StorageResult<()> {
        let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await? else {
            return Err(StorageError::NotFound(id));
        };
        let session_expired = match model.session_start {
            None => true,
            Some(start) => now_ms - start >= session_window_ms,
        };
        let (session_start, session_request_count) = if session_expired {
            (now_ms, 1)
        } else {
            (model.session_start.unwrap(), model.session_request_count + 1)
        };
        let request_count = model.request_count + 1;
        let total_requests = model.total_requests + 1;

        let mut active: accounts::ActiveModel = model.into();
        active.request_count = sea_orm::ActiveValue::Set(request_count);
        active.total_requests = sea_orm::ActiveValue::Set(total_requests);
        active.session_start = sea_orm::ActiveValue::Set(Some(session_start));
        active.session_request_count = sea_orm::ActiveValue::Set(session_request_count);
        active.last_used_at = sea_orm::ActiveValue::Set(Some(now_ms));
        active.update(&self.db).await?;
        Ok(())
    }

    async fn update_tokens(
        &self,
        id: AccountId,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: i64,
    ) -> StorageResult<()> {
        let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await? else {
            return Err(StorageError::NotFound(id));
        };
        let mut active: accounts::ActiveModel = model.into();
        active.access_token = sea_orm::ActiveValue::Set(Some(access_token));
        if let Some(refresh) = refresh_token {
            active.refresh_token = sea_orm::ActiveValue::Set(Some(refresh));
        }
        active.expires_at = sea_orm::ActiveValue::Set(Some(expires_at));
        active.last_error = sea_orm::ActiveValue::Set(None);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn mark_reauth_required(&self, id: AccountId) -> StorageResult<()> {
        let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(&self.db).await? else {
            return Err(StorageError::NotFound(id));
        };
        let mut active: accounts::ActiveModel = model.into();
        active.expires_at = sea_orm::ActiveValue::Set(None);
        active.last_error = sea_orm::ActiveValue::Set(Some("reauth_required".to_string()));
        active.update(&self.db).await?;
        Ok(())
    }

    async fn reset_stats(&self) -> StorageResult<()> {
        let models = accounts::Entity::find().all(&self.db).await?;
        for model in models {
            let mut active: accounts::ActiveModel = model.into();
            active.request_count = sea_orm::ActiveValue::Set(0);
            active.total_requests = sea_orm::ActiveValue::Set(0);
            active.session_request_count = sea_orm::ActiveValue::Set(0);
            active.session_start = sea_orm::ActiveValue::Set(None);
            active.update(&self.db).await?;
        }
        Ok(())
    }
}

async fn set_paused(db: &DatabaseConnection, id: AccountId, paused: bool) -> StorageResult<()> {
    let Some(model) = accounts::Entity::find_by_id(id.to_string()).one(db).await? else {
        return Err(StorageError::NotFound(id));
    };
    let mut active: accounts::ActiveModel = model.into();
    active.paused = sea_orm::ActiveValue::Set(paused);
    active.update(db).await?;
    Ok(())
}

/// Health helper used by the CLI: not paused, not expired, not flagged
/// `reauth_required`, not currently rate-limited.
pub fn is_healthy(account: &Account, now_ms: i64) -> bool {
    !account.paused
        && account.last_error.as_deref() != Some("reauth_required")
        && !account.is_rate_limited(now_ms)
}

/// One row per externally-observed client request. Created when the
/// dispatcher first commits to forwarding; updated exactly once more by
/// the usage recorder.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, record: RequestRecord) -> StorageResult<RequestRecord>;
    async fn finalize(&self, record: RequestRecord) -> StorageResult<()>;
    /// Most recent rows first, for the CLI's `analyze` command.
    async fn list_recent(&self, limit: u64) -> StorageResult<Vec<RequestRecord>>;
    /// Backs `clear-history`.
    async fn clear_all(&self) -> StorageResult<()>;
}

pub struct SeaOrmRequestRepository {
    db: DatabaseConnection,
}

impl SeaOrmRequestRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RequestRepository for SeaOrmRequestRepository {
    async fn insert(&self, record: RequestRecord) -> StorageResult<RequestRecord> {
        let active = convert::request_to_active_model(&record);
        let inserted = active.insert(&self.db).await?;
        Ok(convert::request_from_model(inserted))
    }

    async fn finalize(&self, record: RequestRecord) -> StorageResult<()> {
        let active = convert::request_to_active_model(&record);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn list_recent(&self, limit: u64) -> StorageResult<Vec<RequestRecord>> {
        let models = requests::Entity::find()
            .order_by_desc(requests::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(convert::request_from_model).collect())
    }

    async fn clear_all(&self) -> StorageResult<()> {
        requests::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }
}
