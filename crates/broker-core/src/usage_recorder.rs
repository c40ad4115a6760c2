//! C6 — usage accounting. Two entry points: [`SseUsageAccumulator`] tees a
//! streaming Anthropic response's `message_start`/`message_delta` frames
//! without buffering the body, and [`extract_usage_info`] (re-exported from
//! `broker-provider-core`) covers the single-JSON-body path. Both funnel
//! into the same [`UsageInfo`] shape, which `compute_cost` and
//! `tokens_per_second` turn into the numbers the `requests` table stores.

use std::collections::HashMap;

use broker_provider_core::provider::UsageInfo;
use serde_json::Value;

use crate::config::ModelPrice;

/// Accumulates usage fields out of an Anthropic SSE stream as frames arrive,
/// so the dispatcher can tee bytes straight through to the client while
/// still recording usage once the stream ends — the client never waits on
/// accounting.
#[derive(Default)]
pub struct SseUsageAccumulator {
    buffer: String,
    model: Option<String>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    cache_read_input_tokens: Option<i64>,
    cache_creation_input_tokens: Option<i64>,
}

impl SseUsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds another chunk of raw stream bytes. Frames are delimited by a
    /// blank line per the SSE wire format; a frame split across two chunks
    /// is held in `buffer` until the delimiter arrives.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..pos + 2).collect();
            self.handle_event(&event);
        }
    }

    fn handle_event(&mut self, event: &str) {
        for line in event.lines() {
            let Some(data) = line.strip_prefix("data: ") else { continue };
            let Ok(value) = serde_json::from_str::<Value>(data) else { continue };
            match value.get("type").and_then(Value::as_str) {
                Some("message_start") => self.apply_message_start(&value),
                Some("message_delta") => self.apply_message_delta(&value),
                _ => {}
            }
        }
    }

    fn apply_message_start(&mut self, value: &Value) {
        let Some(message) = value.get("message") else { return };
        self.model = message.get("model").and_then(Value::as_str).map(str::to_string);
        let Some(usage) = message.get("usage") else { return };
        self.input_tokens = usage.get("input_tokens").and_then(Value::as_i64);
        self.cache_read_input_tokens = usage.get("cache_read_input_tokens").and_then(Value::as_i64);
        self.cache_creation_input_tokens = usage.get("cache_creation_input_tokens").and_then(Value::as_i64);
        self.output_tokens = usage.get("output_tokens").and_then(Value::as_i64);
    }

    /// `message_delta.usage.output_tokens` is the running total, not a
    /// per-delta increment, so later frames overwrite rather than add.
    fn apply_message_delta(&mut self, value: &Value) {
        let Some(usage) = value.get("usage") else { return };
        if let Some(output_tokens) = usage.get("output_tokens").and_then(Value::as_i64) {
            self.output_tokens = Some(output_tokens);
        }
    }

    pub fn finish(self) -> UsageInfo {
        UsageInfo {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens,
            model: self.model,
        }
    }
}

/// USD cost for one request, matched against `pricing` by the longest key
/// that is a prefix of `usage.model` (model ids commonly carry a dated
/// suffix, e.g. `claude-opus-4-20250514`, that pricing tables don't list).
pub fn compute_cost(usage: &UsageInfo, pricing: &HashMap<String, ModelPrice>) -> Option<f64> {
    let model = usage.model.as_deref()?;
    let price = pricing
        .iter()
        .filter(|(key, _)| model.starts_with(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, price)| *price)?;

    let input = usage.input_tokens.unwrap_or(0) as f64;
    let output = usage.output_tokens.unwrap_or(0) as f64;
    let cache_read = usage.cache_read_input_tokens.unwrap_or(0) as f64;
    let cache_create = usage.cache_creation_input_tokens.unwrap_or(0) as f64;

    Some(
        (input * price.input + output * price.output + cache_read * price.cache_read + cache_create * price.cache_create)
            / 1_000_000.0,
    )
}

/// Output tokens produced per wall-clock second, for the per-request rate
/// the CLI's `analyze` command reports. `None` when there's nothing to
/// divide by.
pub fn tokens_per_second(usage: &UsageInfo, elapsed_ms: i64) -> Option<f64> {
    let output = usage.output_tokens? as f64;
    if elapsed_ms <= 0 {
        return None;
    }
    Some(output / (elapsed_ms as f64 / 1000.0))
}

pub fn total_tokens(usage: &UsageInfo) -> Option<i64> {
    let values = [
        usage.input_tokens,
        usage.output_tokens,
        usage.cache_read_input_tokens,
        usage.cache_creation_input_tokens,
    ];
    if values.iter().all(Option::is_none) {
        return None;
    }
    Some(values.into_iter().flatten().sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> HashMap<String, ModelPrice> {
        let mut table = HashMap::new();
        table.insert(
            "claude-opus-4".to_string(),
            ModelPrice { input: 15.0, output: 75.0, cache_read: 1.5, cache_create: 18.75 },
        );
        table
    }

    #[test]
    fn accumulates_across_split_frames() {
        let mut acc = SseUsageAccumulator::new();
        acc.push(b"event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-opus-4-20250514\",\"usage\":{\"input_tokens\":100,\"output_tokens\":0,\"cache_read_input_tokens\":10,\"cache_creation_input_tokens\":0}}}\n\n");
        acc.push(b"data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":5}}\n\n");
        acc.push(b"data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":42}}\n\n");
        let usage = acc.finish();
        assert_eq!(usage.input_tokens, Some(100));
        assert_eq!(usage.output_tokens, Some(42));
        assert_eq!(usage.cache_read_input_tokens, Some(10));
        assert_eq!(usage.model.as_deref(), Some("claude-opus-4-20250514"));
    }

    #[test]
    fn frame_split_across_two_chunks_is_still_parsed() {
        let mut acc = SseUsageAccumulator::new();
        acc.push(b"data: {\"type\":\"message_start\",\"message\":{\"model\":\"x\",\"usage\":{\"input_tokens\":1,\"output_tokens\":0}}}");
        acc.push(b"\n\n");
        assert_eq!(acc.finish().input_tokens, Some(1));
    }

    #[test]
    fn compute_cost_matches_by_longest_prefix() {
        let usage = UsageInfo {
            input_tokens: Some(1_000_000),
            output_tokens: Some(1_000_000),
            cache_read_input_tokens: Some(0),
            cache_creation_input_tokens: Some(0),
            model: Some("claude-opus-4-20250514".to_string()),
        };
        let cost = compute_cost(&usage, &pricing()).unwrap();
        assert!((cost - 90.0).abs() < 1e-9);
    }

    #[test]
    fn compute_cost_is_none_for_unknown_model() {
        let usage = UsageInfo {
            model: Some("unknown-model".to_string()),
            ..Default::default()
        };
        assert!(compute_cost(&usage, &pricing()).is_none());
    }

    #[test]
    fn tokens_per_second_divides_by_elapsed_seconds() {
        let usage = UsageInfo { output_tokens: Some(100), ..Default::default() };
        assert_eq!(tokens_per_second(&usage, 2000), Some(50.0));
    }
}
