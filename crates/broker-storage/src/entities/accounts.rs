//! The `accounts` table.
//!
//! Two columns beyond the core account fields — `last_used_at` and
//! `last_error` — are carried here because other operations depend on
//! them: the reauth-required marker needs somewhere to live, and the
//! load balancer's least-recently-used tie-break needs a timestamp to
//! sort on (see DESIGN.md).

use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique_key = "accounts_name")]
    pub name: String,
    pub provider: String,
    pub api_key: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub request_count: i64,
    pub session_start: Option<i64>,
    pub session_request_count: i64,
    pub total_requests: i64,
    pub account_tier: i32,
    pub priority: i32,
    pub paused: bool,
    pub rate_limited_until: Option<i64>,
    pub custom_endpoint: Option<String>,
    /// JSON-encoded `HashMap<String, String>`.
    pub model_mappings: Option<String>,
    pub last_used_at: Option<i64>,
    pub last_error: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
