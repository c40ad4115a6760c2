//! Small header-list helpers shared by every adapter. Headers are carried
//! as a plain `Vec<(String, String)>` rather than `http::HeaderMap`
//! end-to-end, for a byte-transparent, case-preserving passthrough of
//! everything except the handful of headers an adapter actively rewrites.

pub type Headers = Vec<(String, String)>;

/// Headers that are never forwarded upstream: they are either
/// connection-scoped (hop-by-hop) or identify the *client's* credential,
/// which the adapter replaces with the account's own.
const STRIPPED_INBOUND: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-goog-api-key",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_set(headers: &mut Headers, name: &str, value: impl Into<String>) {
    header_remove(headers, name);
    headers.push((name.to_string(), value.into()));
}

pub fn header_remove(headers: &mut Headers, name: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
}

/// Strip hop-by-hop and client-credential headers from an inbound request
/// before an adapter builds the outgoing one. Everything else is forwarded
/// byte-transparent except the `Authorization` header, which is replaced.
pub fn strip_inbound(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(k, _)| !STRIPPED_INBOUND.iter().any(|s| k.eq_ignore_ascii_case(s)))
        .cloned()
        .collect()
}
