use std::time::Duration;

use clap::Args;
use tracing::warn;

#[derive(Clone, Debug, Args)]
pub struct Config {
    #[arg(long, env = "OPSDESK_API_BASE", default_value = "http://localhost:8000")]
    pub api_base: String,

    /// Serve every resource from embedded fixtures instead of the backend.
    #[arg(long, env = "OPSDESK_MOCK_DATA")]
    pub mock_data: bool,

    #[arg(long, env = "OPSDESK_ID_TOKEN", hide_env_values = true)]
    pub id_token: Option<String>,

    #[arg(long, env = "OPSDESK_USER_ID", default_value = "me")]
    pub user_id: String,

    #[arg(long, env = "OPSDESK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "OPSDESK_CHAT_POLL_INTERVAL_MS", default_value_t = 5000)]
    pub chat_poll_interval_ms: u64,

    #[arg(long, env = "OPSDESK_MOCK_LATENCY_MS", default_value_t = 800)]
    pub mock_latency_ms: u64,

    #[arg(long, env = "OPSDESK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn has_token(&self) -> bool {
        self.id_token
            .as_ref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    pub fn chat_poll_interval(&self) -> Duration {
        Duration::from_millis(self.chat_poll_interval_ms)
    }

    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_startup_warnings(&self) {
        if self.mock_data {
            warn!("OPSDESK_MOCK_DATA is set, no backend requests will be made");
        } else if !self.has_token() {
            warn!("OPSDESK_ID_TOKEN is unset, requests are unauthenticated and queries stay idle");
        }
    }

    pub fn validate(&self) {
        assert_non_zero("OPSDESK_CHAT_POLL_INTERVAL_MS", self.chat_poll_interval_ms);
        assert_non_zero("OPSDESK_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
        assert!(
            !self.api_base.trim().is_empty(),
            "OPSDESK_API_BASE must not be empty"
        );
    }
}

fn assert_non_zero(key: &'static str, value: u64) {
    assert!(value > 0, "{key} must be greater than 0");
}
