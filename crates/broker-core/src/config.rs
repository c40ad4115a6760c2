//! `CoreConfig` — a single structured configuration bag. This type has no
//! knowledge of where its values come from (`clap`, environment variables,
//! a config file); the composition root in `apps/broker` is responsible
//! for populating it. `port`/`data_dir`/`dsn`/`host` are deliberately
//! absent — those are properties of the external listener binary, not the
//! core.

use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub client_id: String,
    pub session_window_ms: i64,
    pub refresh_leeway_ms: i64,
    pub pricing: HashMap<String, ModelPrice>,
}

/// Per-1M-token pricing for one model, all in USD.
#[derive(Clone, Copy, Debug, Default, serde::Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_create: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            session_window_ms: broker_common::DEFAULT_SESSION_WINDOW_MS,
            refresh_leeway_ms: 60_000,
            pricing: default_pricing_table(),
        }
    }
}

/// A small built-in table for well-known Claude model families, so the
/// binary is useful without requiring a pricing file on first run.
fn default_pricing_table() -> HashMap<String, ModelPrice> {
    let mut table = HashMap::new();
    table.insert(
        "claude-opus-4".to_string(),
        ModelPrice {
            input: 15.0,
            output: 75.0,
            cache_read: 1.5,
            cache_create: 18.75,
        },
    );
    table.insert(
        "claude-sonnet-4".to_string(),
        ModelPrice {
            input: 3.0,
            output: 15.0,
            cache_read: 0.3,
            cache_create: 3.75,
        },
    );
    table.insert(
        "claude-haiku-4".to_string(),
        ModelPrice {
            input: 0.8,
            output: 4.0,
            cache_read: 0.08,
            cache_create: 1.0,
        },
    );
    table
}
