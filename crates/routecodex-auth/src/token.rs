use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One credential on disk. `expires_at` is always normalized to epoch
/// milliseconds by `sanitize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Provider-specific stable key; when `access_token` is empty this is
    /// what the runtime sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// User-managed token: refresh and interactive flows are disabled.
    #[serde(default, skip_serializing_if = "is_false")]
    pub norefresh: bool,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Keys some providers leak into token files that must never round-trip.
const STRIP_KEYS: &[&str] = &["client_secret", "session_cookie", "code_verifier"];

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

impl StoredToken {
    /// Effective secret for the Authorization header: a stable api_key wins
    /// over the (possibly rotating) access token only when the access token
    /// is absent.
    pub fn effective_secret(&self) -> Option<&str> {
        if !self.access_token.is_empty() {
            return Some(&self.access_token);
        }
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn is_expired(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms() + skew.as_millis() as i64 >= expires_at,
            None => false,
        }
    }

    pub fn has_usable_secret(&self) -> bool {
        self.effective_secret().is_some()
    }
}

/// Normalize a raw token value read from disk.
///
/// Accepts the gemini-cli wrapping envelope `{ "token": { ... } }`,
/// `expires_at` in seconds, milliseconds, relative seconds, or ISO-8601,
/// and strips known-bad keys.
pub fn sanitize(raw: JsonValue) -> Option<StoredToken> {
    let mut value = match raw {
        JsonValue::Object(mut object) => {
            if let Some(inner) = object.remove("token") {
                // Envelope: inner token wins, top-level duplicates ignored.
                match inner {
                    JsonValue::Object(inner) => inner,
                    _ => object,
                }
            } else {
                object
            }
        }
        _ => return None,
    };

    for key in STRIP_KEYS {
        value.remove(*key);
    }

    if let Some(expires) = value.remove("expires_at") {
        if let Some(normalized) = normalize_expiry(&expires) {
            value.insert("expires_at".to_string(), JsonValue::from(normalized));
        }
    } else if let Some(expires_in) = value.get("expires_in").and_then(|v| v.as_i64()) {
        value.insert(
            "expires_at".to_string(),
            JsonValue::from(now_ms() + expires_in * 1000),
        );
    }
    value.remove("expires_in");

    serde_json::from_value(JsonValue::Object(value)).ok()
}

fn normalize_expiry(value: &JsonValue) -> Option<i64> {
    if let Some(number) = value.as_i64() {
        return Some(normalize_epoch_number(number));
    }
    if let Some(number) = value.as_f64() {
        return Some(normalize_epoch_number(number as i64));
    }
    let text = value.as_str()?;
    if let Ok(number) = text.trim().parse::<i64>() {
        return Some(normalize_epoch_number(number));
    }
    let parsed = time::OffsetDateTime::parse(
        text.trim(),
        &time::format_description::well_known::Rfc3339,
    )
    .ok()?;
    Some((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

/// < 1e9 is a relative offset in seconds, < 1e12 absolute seconds,
/// otherwise already milliseconds.
fn normalize_epoch_number(number: i64) -> i64 {
    if number <= 0 {
        return 0;
    }
    if number < 1_000_000_000 {
        now_ms() + number * 1000
    } else if number < 1_000_000_000_000 {
        number * 1000
    } else {
        number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seconds_normalize_to_millis() {
        let token = sanitize(json!({
            "access_token": "a",
            "expires_at": 1_900_000_000u64
        }))
        .unwrap();
        assert_eq!(token.expires_at, Some(1_900_000_000_000));
    }

    #[test]
    fn millis_pass_through() {
        let token = sanitize(json!({
            "access_token": "a",
            "expires_at": 1_900_000_000_000u64
        }))
        .unwrap();
        assert_eq!(token.expires_at, Some(1_900_000_000_000));
    }

    #[test]
    fn relative_seconds_are_anchored_to_now() {
        let before = now_ms();
        let token = sanitize(json!({"access_token": "a", "expires_at": 3600})).unwrap();
        let expires = token.expires_at.unwrap();
        assert!(expires >= before + 3_599_000);
        assert!(expires <= now_ms() + 3_601_000);
    }

    #[test]
    fn iso_string_parses() {
        let token = sanitize(json!({
            "access_token": "a",
            "expires_at": "2030-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(token.expires_at, Some(1_893_456_000_000));
    }

    #[test]
    fn envelope_unwraps() {
        let token = sanitize(json!({
            "access_token": "stale-copy",
            "token": {"access_token": "fresh", "refresh_token": "r"}
        }))
        .unwrap();
        assert_eq!(token.access_token, "fresh");
        assert_eq!(token.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn bad_keys_are_stripped() {
        let token = sanitize(json!({
            "access_token": "a",
            "client_secret": "oops"
        }))
        .unwrap();
        assert!(!token.extra.contains_key("client_secret"));
    }

    #[test]
    fn api_key_used_when_access_token_empty() {
        let token = StoredToken {
            api_key: Some("sk-stable".to_string()),
            ..Default::default()
        };
        assert_eq!(token.effective_secret(), Some("sk-stable"));

        let token = StoredToken {
            access_token: "at".to_string(),
            api_key: Some("sk-stable".to_string()),
            ..Default::default()
        };
        assert_eq!(token.effective_secret(), Some("at"));
    }

    #[test]
    fn expires_in_becomes_expires_at() {
        let token = sanitize(json!({"access_token": "a", "expires_in": 7200})).unwrap();
        assert!(token.expires_at.unwrap() > now_ms() + 7_000_000);
        assert!(!token.extra.contains_key("expires_in"));
    }
}
