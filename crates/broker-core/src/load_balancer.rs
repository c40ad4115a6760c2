//! Candidate ordering. A pure function over an in-memory snapshot; no I/O,
//! no locking. The dispatcher calls this once per incoming request and
//! walks the returned order until one candidate succeeds.

use broker_common::Account;

/// Ranks healthy candidates by a four-key order: `priority` ascending,
/// `tier` descending, effective `session_request_count` ascending,
/// `last_used_at` ascending with unused accounts (`None`) first.
///
/// `provider` restricts the pool to one provider tag; `None` ranks across
/// every provider's accounts together, which is what the dispatcher uses
/// since a single Anthropic-shaped wire path can be served by any
/// registered account regardless of which back-end it belongs to.
///
/// `session_window_ms` resets the session window's effect on ordering: an
/// account whose session started more than `session_window_ms` ago is
/// ranked as if its session count were zero, even though the persisted
/// counter itself is only reset lazily, on next use, by storage.
pub fn rank_candidates(accounts: &[Account], provider: Option<&str>, now_ms: i64, session_window_ms: i64) -> Vec<Account> {
    let mut candidates: Vec<Account> = accounts
        .iter()
        .filter(|a| match provider {
            Some(p) => a.provider == p,
            None => true,
        })
        .filter(|a| a.is_healthy(now_ms))
        .cloned()
        .collect();

    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.tier.cmp(&a.tier))
            .then_with(|| effective_session_count(a, now_ms, session_window_ms).cmp(&effective_session_count(b, now_ms, session_window_ms)))
            .then_with(|| last_used_key(a).cmp(&last_used_key(b)))
    });
    candidates
}

fn effective_session_count(account: &Account, now_ms: i64, session_window_ms: i64) -> i64 {
    match account.session_start {
        Some(start) if now_ms - start < session_window_ms => account.session_request_count,
        _ => 0,
    }
}

/// `None` (never used) sorts before any `Some(ms)`.
fn last_used_key(account: &Account) -> (u8, i64) {
    match account.last_used_at {
        None => (0, 0),
        Some(ms) => (1, ms),
    }
}
