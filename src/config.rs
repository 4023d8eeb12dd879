use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::monitor::MonitorConfig;

/// Goal alerts for followed teams, delivered over Telegram
#[derive(Parser, Debug, Clone)]
#[command(name = "goal-alerts", version, about)]
pub struct Config {
    /// Log notifications instead of sending them
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// Telegram bot token from BotFather (required unless --dry-run)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram Bot API base URL
    #[arg(
        long,
        env = "TELEGRAM_API_URL",
        default_value = "https://api.telegram.org"
    )]
    pub telegram_api_url: String,

    /// API-Football base URL
    #[arg(
        long,
        env = "API_FOOTBALL_URL",
        default_value = "https://v3.football.api-sports.io"
    )]
    pub api_football_url: String,

    /// API-Football key
    #[arg(long, env = "API_FOOTBALL_KEY", hide_env_values = true)]
    pub api_football_key: String,

    /// Live scores polling interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,

    /// Upper bound on one live scores fetch, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "10")]
    pub fetch_timeout_secs: u64,

    /// Forget fixtures not seen for this many seconds
    #[arg(long, env = "STALE_FIXTURE_SECS", default_value = "21600")]
    pub stale_fixture_secs: u64,

    /// Most alert sends in flight at once for one score change
    #[arg(long, env = "MAX_CONCURRENT_SENDS", default_value = "8")]
    pub max_concurrent_sends: usize,

    /// Status API listen address (it lists subscriber chat ids, keep it private)
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "127.0.0.1:8080")]
    pub dashboard_addr: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.dry_run
            && self
                .telegram_bot_token
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
        {
            anyhow::bail!(
                "TELEGRAM_BOT_TOKEN is required to deliver alerts. Use --dry-run to only log them."
            );
        }
        if self.api_football_key.trim().is_empty() {
            anyhow::bail!("API_FOOTBALL_KEY must not be empty");
        }
        for (name, value) in [
            ("telegram_api_url", &self.telegram_api_url),
            ("api_football_url", &self.api_football_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| anyhow::anyhow!("{} is not a valid URL ({}): {}", name, value, e))?;
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs > self.poll_interval_secs {
            anyhow::bail!("fetch_timeout_secs must be between 1 and poll_interval_secs");
        }
        if self.stale_fixture_secs == 0 {
            anyhow::bail!("stale_fixture_secs must be positive");
        }
        if self.max_concurrent_sends == 0 {
            anyhow::bail!("max_concurrent_sends must be positive");
        }
        self.dashboard_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("dashboard_addr '{}': {}", self.dashboard_addr, e))?;
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            stale_after: Duration::from_secs(self.stale_fixture_secs),
        }
    }
}
