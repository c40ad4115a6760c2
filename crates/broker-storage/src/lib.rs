pub mod convert;
pub mod db;
pub mod entities;
pub mod repository;

pub use repository::{
    AccountRepository, RequestRepository, SeaOrmAccountRepository, SeaOrmRequestRepository,
    StorageError, StorageResult, is_healthy,
};

#[cfg(test)]
mod tests {
    use super::*;
    use broker_common::{Account, AccountId, CredentialShape};
    use sea_orm::Database;

    async fn test_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db::sync_schema(&db).await.unwrap();
        db
    }

    fn api_key_account(name: &str) -> Account {
        Account {
            id: AccountId::new(),
            name: name.to_string(),
            provider: "zai".to_string(),
            credential: CredentialShape::ApiKey { api_key: "k".into() },
            priority: 50,
            paused: false,
            tier: 1,
            custom_endpoint: None,
            model_mappings: None,
            request_count: 0,
            total_requests: 0,
            session_request_count: 0,
            session_start: None,
            rate_limited_until: None,
            last_used_at: None,
            last_error: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn insert_then_get_by_name_round_trips() {
        let db = test_db().await;
        let repo = SeaOrmAccountRepository::new(db);
        let account = api_key_account("alice");
        repo.insert(account.clone()).await.unwrap();

        let fetched = repo.get_by_name("alice").await.unwrap().unwrap();
        assert_eq!(fetched.id, account.id);
        assert_eq!(fetched.provider, "zai");
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let db = test_db().await;
        let repo = SeaOrmAccountRepository::new(db);
        repo.insert(api_key_account("dup")).await.unwrap();
        let err = repo.insert(api_key_account("dup")).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn mark_rate_limited_is_idempotent() {
        let db = test_db().await;
        let repo = SeaOrmAccountRepository::new(db);
        let account = api_key_account("bob");
        repo.insert(account.clone()).await.unwrap();

        repo.mark_rate_limited(account.id, 5_000).await.unwrap();
        repo.mark_rate_limited(account.id, 5_000).await.unwrap();

        let fetched = repo.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(fetched.rate_limited_until, Some(5_000));
    }

    #[tokio::test]
    async fn touch_usage_resets_session_after_window_elapses() {
        let db = test_db().await;
        let repo = SeaOrmAccountRepository::new(db);
        let account = api_key_account("carol");
        repo.insert(account.clone()).await.unwrap();

        repo.touch_usage(account.id, 0, 1_000).await.unwrap();
        repo.touch_usage(account.id, 500, 1_000).await.unwrap();
        let mid = repo.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(mid.session_request_count, 2);
        assert_eq!(mid.request_count, 2);

        repo.touch_usage(account.id, 2_000, 1_000).await.unwrap();
        let after_reset = repo.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(after_reset.session_request_count, 1);
        assert_eq!(after_reset.request_count, 3);
    }

    #[tokio::test]
    async fn mark_reauth_required_clears_expiry_and_sets_last_error() {
        let db = test_db().await;
        let repo = SeaOrmAccountRepository::new(db);
        let mut account = api_key_account("dana");
        account.credential = CredentialShape::OAuth {
            refresh_token: "r".into(),
            access_token: "a".into(),
            expires_at: 100,
        };
        repo.insert(account.clone()).await.unwrap();

        repo.mark_reauth_required(account.id).await.unwrap();
        let fetched = repo.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_error.as_deref(), Some("reauth_required"));
        assert!(!is_healthy(&fetched, 0));
    }
}
