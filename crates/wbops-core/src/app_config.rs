use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    /// Bearer token required by the HTTP surface; `None` disables auth
    /// (development only).
    pub api_bearer_token: Option<String>,
    /// Operator-wide WB token used only when a project has no connection row.
    pub wb_token_fallback: Option<String>,

    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,

    pub http_timeout_secs: u64,
    pub http_user_agent: String,

    pub wb_min_interval_ms: u64,
    pub wb_max_retries: u32,
    pub wb_backoff_base_secs: u64,
    pub wb_page_size: u32,

    pub storefront_page_size: u32,
    pub storefront_sleep_base_ms: u64,
    pub storefront_sleep_jitter_ms: u64,
    pub storefront_max_total_retry_wait_secs: u64,
    pub storefront_max_runtime_secs: u64,
    pub storefront_rate_limit_backoff_mins: i64,

    pub scheduler_tick_secs: u64,
    pub sweeper_interval_secs: u64,
    pub stuck_ttl_secs: u64,
    pub worker_max_concurrent_runs: usize,
    pub worker_poll_interval_secs: u64,

    pub internal_data_dir: PathBuf,
    pub internal_download_max_bytes: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field(
                "api_bearer_token",
                &self.api_bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "wb_token_fallback",
                &self.wb_token_fallback.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("http_user_agent", &self.http_user_agent)
            .field("wb_min_interval_ms", &self.wb_min_interval_ms)
            .field("wb_max_retries", &self.wb_max_retries)
            .field("wb_backoff_base_secs", &self.wb_backoff_base_secs)
            .field("wb_page_size", &self.wb_page_size)
            .field("storefront_page_size", &self.storefront_page_size)
            .field("storefront_sleep_base_ms", &self.storefront_sleep_base_ms)
            .field(
                "storefront_sleep_jitter_ms",
                &self.storefront_sleep_jitter_ms,
            )
            .field(
                "storefront_max_total_retry_wait_secs",
                &self.storefront_max_total_retry_wait_secs,
            )
            .field(
                "storefront_max_runtime_secs",
                &self.storefront_max_runtime_secs,
            )
            .field(
                "storefront_rate_limit_backoff_mins",
                &self.storefront_rate_limit_backoff_mins,
            )
            .field("scheduler_tick_secs", &self.scheduler_tick_secs)
            .field("sweeper_interval_secs", &self.sweeper_interval_secs)
            .field("stuck_ttl_secs", &self.stuck_ttl_secs)
            .field(
                "worker_max_concurrent_runs",
                &self.worker_max_concurrent_runs,
            )
            .field("worker_poll_interval_secs", &self.worker_poll_interval_secs)
            .field("internal_data_dir", &self.internal_data_dir)
            .field(
                "internal_download_max_bytes",
                &self.internal_download_max_bytes,
            )
            .finish()
    }
}
