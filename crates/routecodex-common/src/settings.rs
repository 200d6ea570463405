use std::time::Duration;

/// Environment-derived knobs consumed by the pipeline.
///
/// Invalid values fall back to the defaults rather than failing startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Ceiling for one pipeline attempt, `ROUTECODEX_PIPELINE_MAX_WAIT_MS`.
    pub pipeline_max_wait: Duration,
    /// SSE comment heartbeat interval, `ROUTECODEX_STREAM_HEARTBEAT_MS`.
    pub stream_heartbeat: Duration,
    /// Emit one usage log line per completed request.
    pub usage_log: bool,
    /// Include upstream codes and attempt traces in error bodies.
    pub error_verbose: bool,
    /// Force interactive reauthorization on the next ensure-valid call.
    pub oauth_force_reauth: bool,
    /// Ask the callback page to close the browser tab after consent.
    pub oauth_auto_close_browser: bool,
    /// iFlow automatic reauthorization attempt ceiling.
    pub iflow_auto_max_attempts: u32,
    /// Opt-in server-side execution of whitelisted tools.
    pub tool_server_exec: bool,
    /// Mock provider: enforce OpenAI tool-name charset checks.
    pub mock_validate_names: bool,
    /// Mock provider: fixture directory override.
    pub mock_samples_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline_max_wait: Duration::from_millis(300_000),
            stream_heartbeat: Duration::from_millis(15_000),
            usage_log: false,
            error_verbose: false,
            oauth_force_reauth: false,
            oauth_auto_close_browser: false,
            iflow_auto_max_attempts: 3,
            tool_server_exec: false,
            mock_validate_names: false,
            mock_samples_dir: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pipeline_max_wait: env_millis("ROUTECODEX_PIPELINE_MAX_WAIT_MS")
                .unwrap_or(defaults.pipeline_max_wait),
            stream_heartbeat: env_millis("ROUTECODEX_STREAM_HEARTBEAT_MS")
                .unwrap_or(defaults.stream_heartbeat),
            usage_log: env_flag("ROUTECODEX_USAGE_LOG"),
            error_verbose: env_flag("ROUTECODEX_ERROR_VERBOSE"),
            oauth_force_reauth: env_flag("ROUTECODEX_OAUTH_FORCE_REAUTH"),
            oauth_auto_close_browser: env_flag("ROUTECODEX_OAUTH_AUTO_CLOSE_BROWSER"),
            iflow_auto_max_attempts: env_u32("ROUTECODEX_IFLOW_AUTO_MAX_ATTEMPTS")
                .unwrap_or(defaults.iflow_auto_max_attempts),
            tool_server_exec: env_flag("ROUTECODEX_TOOL_SERVER_EXEC"),
            mock_validate_names: env_flag("ROUTECODEX_MOCK_VALIDATE_NAMES"),
            mock_samples_dir: std::env::var("ROUTECODEX_MOCK_SAMPLES_DIR")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    let millis: u64 = raw.trim().parse().ok()?;
    Some(Duration::from_millis(millis))
}

fn env_u32(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;
    raw.trim().parse().ok()
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => {
            let value = value.trim().to_ascii_lowercase();
            !value.is_empty() && value != "0" && value != "false" && value != "off"
        }
        Err(_) => false,
    }
}
