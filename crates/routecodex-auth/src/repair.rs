use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::token::now_ms;

/// How an upstream-invalid-token repair runs relative to the failing
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// Start the repair in the background; fail the current request so the
    /// router can rotate.
    NonBlocking,
    /// The current request awaits the repair.
    Blocking,
}

const COOLDOWN_WINDOW_MS: i64 = 5 * 60 * 1000;
const MAX_ATTEMPTS_PER_WINDOW: u32 = 2;

/// Signals that mean the credential itself is invalid and a repair may
/// help. `service_disabled`-class errors are server-side project
/// configuration, not credentials, and must not enter the repair loop.
pub fn should_trigger_interactive_repair(provider_type: &str, message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();

    if lowered.contains("service_disabled")
        || lowered.contains("service disabled")
        || lowered.contains("has not been used in project")
        || lowered.contains("it is disabled")
    {
        return false;
    }

    if lowered.contains("invalid_token")
        || lowered.contains("invalid_grant")
        || lowered.contains("unauthenticated")
        || lowered.contains("401")
        || lowered.contains("token expired")
        || lowered.contains("access token")
    {
        return true;
    }

    match provider_type {
        "iflow" => lowered.contains("406") || lowered.contains("40308"),
        "gemini-cli" | "antigravity" | "gemini" => {
            lowered.contains("verification required") || lowered.contains("verify your account")
        }
        _ => false,
    }
}

/// Google's account-verification 403 variant; handled by opening the
/// verification URL, never by a new grant.
pub fn is_account_verification_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("account verification") || lowered.contains("verify your account")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CooldownFile {
    #[serde(default)]
    entries: HashMap<String, CooldownEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CooldownEntry {
    attempts: u32,
    window_started_at: i64,
}

/// Repair attempt counter per `providerType+tokenFile`, persisted so a
/// restart cannot circumvent the cooldown.
#[derive(Debug, Clone)]
pub struct RepairCooldown {
    path: PathBuf,
}

impl RepairCooldown {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record one repair attempt; returns false when the key is cooling
    /// down and the repair should be skipped.
    pub fn try_begin(&self, cache_key: &str) -> bool {
        self.try_begin_with_limit(cache_key, MAX_ATTEMPTS_PER_WINDOW)
    }

    /// Same, with a caller-chosen ceiling (iFlow reads its own env knob).
    pub fn try_begin_with_limit(&self, cache_key: &str, limit: u32) -> bool {
        let mut file = self.read();
        let now = now_ms();
        let entry = file.entries.entry(cache_key.to_string()).or_default();

        if now - entry.window_started_at > COOLDOWN_WINDOW_MS {
            entry.attempts = 0;
            entry.window_started_at = now;
        }
        if entry.attempts >= limit {
            return false;
        }
        entry.attempts += 1;
        self.write(&file);
        true
    }

    /// Explicit backoff (e.g. iFlow refresh endpoint 5xx) that saturates
    /// the window immediately.
    pub fn impose(&self, cache_key: &str) {
        let mut file = self.read();
        file.entries.insert(
            cache_key.to_string(),
            CooldownEntry {
                attempts: MAX_ATTEMPTS_PER_WINDOW,
                window_started_at: now_ms(),
            },
        );
        self.write(&file);
    }

    pub fn clear(&self, cache_key: &str) {
        let mut file = self.read();
        if file.entries.remove(cache_key).is_some() {
            self.write(&file);
        }
    }

    fn read(&self) -> CooldownFile {
        std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn write(&self, file: &CooldownFile) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(body) = serde_json::to_vec(file) {
            let _ = write_atomic(&self.path, &body);
        }
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_disabled_never_triggers_repair() {
        assert!(!should_trigger_interactive_repair(
            "gemini",
            "service_disabled: Cloud AI Companion API has not been used in project 12345"
        ));
        assert!(!should_trigger_interactive_repair(
            "gemini-cli",
            "API has not been used in project 99 or it is disabled"
        ));
    }

    #[test]
    fn invalid_token_triggers_repair() {
        assert!(should_trigger_interactive_repair("qwen", "401 invalid_token"));
        assert!(should_trigger_interactive_repair("openai", "invalid_grant"));
        assert!(should_trigger_interactive_repair("iflow", "upstream said 40308"));
    }

    #[test]
    fn verification_detection() {
        assert!(is_account_verification_message(
            "Please verify your account before continuing"
        ));
        assert!(!is_account_verification_message("rate limited"));
    }

    #[test]
    fn cooldown_limits_attempts_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooldown.json");
        let cooldown = RepairCooldown::new(&path);

        assert!(cooldown.try_begin("qwen:/tmp/t.json"));
        assert!(cooldown.try_begin("qwen:/tmp/t.json"));
        assert!(!cooldown.try_begin("qwen:/tmp/t.json"));

        // A fresh handle over the same file still sees the saturation.
        let reloaded = RepairCooldown::new(&path);
        assert!(!reloaded.try_begin("qwen:/tmp/t.json"));
        assert!(reloaded.try_begin("iflow:/tmp/other.json"));
    }

    #[test]
    fn impose_saturates_window() {
        let dir = tempfile::tempdir().unwrap();
        let cooldown = RepairCooldown::new(dir.path().join("cooldown.json"));
        cooldown.impose("iflow:/tmp/t.json");
        assert!(!cooldown.try_begin("iflow:/tmp/t.json"));
        cooldown.clear("iflow:/tmp/t.json");
        assert!(cooldown.try_begin("iflow:/tmp/t.json"));
    }
}
