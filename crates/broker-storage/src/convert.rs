//! Conversions between the sea-orm row shape and the plain `Account`/
//! `RequestRecord` value types the rest of the workspace operates on.

use std::collections::HashMap;

use broker_common::{Account, AccountId, CredentialShape, RequestId, RequestRecord};

use crate::entities::{accounts, requests};

pub fn account_from_model(model: accounts::Model) -> Result<Account, String> {
    let credential = match (model.api_key, model.refresh_token, model.access_token) {
        (Some(api_key), None, None) => CredentialShape::ApiKey { api_key },
        (None, Some(refresh_token), Some(access_token)) => CredentialShape::OAuth {
            refresh_token,
            access_token,
            expires_at: model.expires_at.unwrap_or(0),
        },
        other => {
            return Err(format!(
                "account {} violates exclusive-credential-shape invariant: {other:?}",
                model.id
            ));
        }
    };

    let model_mappings: Option<HashMap<String, String>> = model
        .model_mappings
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| e.to_string())?;

    Ok(Account {
        id: AccountId::parse(&model.id).map_err(|e| e.to_string())?,
        name: model.name,
        provider: model.provider,
        credential,
        priority: model.priority,
        paused: model.paused,
        tier: model.account_tier,
        custom_endpoint: model.custom_endpoint,
        model_mappings,
        request_count: model.request_count,
        total_requests: model.total_requests,
        session_request_count: model.session_request_count,
        session_start: model.session_start,
        rate_limited_until: model.rate_limited_until,
        last_used_at: model.last_used_at,
        last_error: model.last_error,
        created_at: model.created_at,
    })
}

pub fn account_to_active_model(account: &Account) -> Result<accounts::ActiveModel, String> {
    use sea_orm::ActiveValue::Set;

    let (api_key, refresh_token, access_token, expires_at) = match &account.credential {
        CredentialShape::ApiKey { api_key } => (Some(api_key.clone()), None, None, None),
        CredentialShape::OAuth {
            refresh_token,
            access_token,
            expires_at,
        } => (
            None,
            Some(refresh_token.clone()),
            Some(access_token.clone()),
            Some(*expires_at),
        ),
    };

    let model_mappings = account
        .model_mappings
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| e.to_string())?;

    Ok(accounts::ActiveModel {
        id: Set(account.id.to_string()),
        name: Set(account.name.clone()),
        provider: Set(account.provider.clone()),
        api_key: Set(api_key),
        refresh_token: Set(refresh_token),
        access_token: Set(access_token),
        expires_at: Set(expires_at),
        created_at: Set(account.created_at),
        request_count: Set(account.request_count),
        session_start: Set(account.session_start),
        session_request_count: Set(account.session_request_count),
        total_requests: Set(account.total_requests),
        account_tier: Set(account.tier),
        priority: Set(account.priority),
        paused: Set(account.paused),
        rate_limited_until: Set(account.rate_limited_until),
        custom_endpoint: Set(account.custom_endpoint.clone()),
        model_mappings: Set(model_mappings),
        last_used_at: Set(account.last_used_at),
        last_error: Set(account.last_error.clone()),
    })
}

pub fn request_from_model(model: requests::Model) -> RequestRecord {
    RequestRecord {
        id: Some(RequestId(model.id)),
        timestamp: model.timestamp,
        method: model.method,
        path: model.path,
        account_id: model.account_id,
        status_code: model.status_code,
        response_time_ms: model.response_time_ms,
        error: model.error,
        input_tokens: model.input_tokens,
        output_tokens: model.output_tokens,
        cache_read_input_tokens: model.cache_read_input_tokens,
        cache_creation_input_tokens: model.cache_creation_input_tokens,
        total_tokens: model.total_tokens,
        cost_usd: model.cost_usd,
        model: model.model,
    }
}

pub fn request_to_active_model(record: &RequestRecord) -> requests::ActiveModel {
    use sea_orm::ActiveValue::{NotSet, Set};

    requests::ActiveModel {
        id: record.id.map(|id| Set(id.0)).unwrap_or(NotSet),
        timestamp: Set(record.timestamp),
        method: Set(record.method.clone()),
        path: Set(record.path.clone()),
        account_id: Set(record.account_id.clone()),
        status_code: Set(record.status_code),
        response_time_ms: Set(record.response_time_ms),
        error: Set(record.error.clone()),
        input_tokens: Set(record.input_tokens),
        output_tokens: Set(record.output_tokens),
        cache_read_input_tokens: Set(record.cache_read_input_tokens),
        cache_creation_input_tokens: Set(record.cache_creation_input_tokens),
        total_tokens: Set(record.total_tokens),
        cost_usd: Set(record.cost_usd),
        model: Set(record.model.clone()),
    }
}
