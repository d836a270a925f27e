//! Command line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rollcall_core::{MatchMode, TargetRegistry, TargetSpec};
use rollcall_ops::PollerConfig;
use serde::Deserialize;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "rollcalld", version, about = "Push-to-deploy relay: registry webhooks in, image updates and rollout notices out")]
pub struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "ROLLCALL_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Kubeconfig file (default: $KUBECONFIG / ~/.kube/config, then in-cluster config)
    #[arg(long, env = "ROLLCALL_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Telegram bot token; notifications are disabled without it
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    /// Telegram chat to post to (group and channel ids are negative)
    #[arg(long, env = "TELEGRAM_CHAT_ID", allow_hyphen_values = true)]
    pub telegram_chat: Option<String>,

    /// YAML alias table (list of {alias, namespace, workload}); built-in table when unset
    #[arg(long, env = "ROLLCALL_TARGETS")]
    pub targets: Option<PathBuf>,

    /// Alias matching: substring or strict
    #[arg(long = "match-mode", env = "ROLLCALL_MATCH", default_value = "substring")]
    pub match_mode: MatchMode,

    /// Seconds between health poll cycles
    #[arg(long, env = "ROLLCALL_POLL_SECS", default_value_t = 30)]
    pub poll_secs: u64,

    /// Timeout in seconds for each cluster or notification call
    #[arg(long, env = "ROLLCALL_CALL_TIMEOUT_SECS", default_value_t = 10)]
    pub call_timeout_secs: u64,

    /// Drop pending updates older than this many seconds with a "did not converge" notice
    #[arg(long, env = "ROLLCALL_PENDING_TIMEOUT_SECS")]
    pub pending_timeout_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, env = "ROLLCALL_LOG_JSON")]
    pub log_json: bool,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub kubeconfig: Option<PathBuf>,
    /// `(bot token, chat id)`
    pub telegram: Option<(String, String)>,
    pub targets: Option<PathBuf>,
    pub match_mode: MatchMode,
    pub poll_interval: Duration,
    pub call_timeout: Duration,
    pub pending_timeout: Option<Duration>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.poll_secs == 0 {
            bail!("poll interval must be at least one second");
        }
        if cli.call_timeout_secs == 0 {
            bail!("call timeout must be at least one second");
        }
        let token = cli.telegram_token.filter(|s| !s.trim().is_empty());
        let chat = cli.telegram_chat.filter(|s| !s.trim().is_empty());
        let telegram = match (token, chat) {
            (Some(token), Some(chat)) => Some((token, chat)),
            (None, None) => None,
            _ => {
                warn!("only one of TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID is set; notifications disabled");
                None
            }
        };
        Ok(Self {
            listen: SocketAddr::new(cli.bind, cli.port),
            kubeconfig: cli.kubeconfig,
            telegram,
            targets: cli.targets,
            match_mode: cli.match_mode,
            poll_interval: Duration::from_secs(cli.poll_secs),
            call_timeout: Duration::from_secs(cli.call_timeout_secs),
            pending_timeout: cli.pending_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            call_timeout: self.call_timeout,
            pending_timeout: self.pending_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetsFile {
    List(Vec<TargetSpec>),
    Wrapped { targets: Vec<TargetSpec> },
}

/// Parse a YAML alias table: a bare list or `targets: [...]`.
pub fn parse_targets(yaml: &str) -> Result<Vec<TargetSpec>> {
    let file: TargetsFile = serde_yaml::from_str(yaml).context("parsing target table")?;
    let specs = match file {
        TargetsFile::List(specs) | TargetsFile::Wrapped { targets: specs } => specs,
    };
    if specs.is_empty() {
        bail!("target table is empty");
    }
    Ok(specs)
}

pub fn load_registry(path: Option<&Path>, mode: MatchMode) -> Result<TargetRegistry> {
    let specs = match path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path).with_context(|| format!("reading target table {}", path.display()))?;
            parse_targets(&yaml).with_context(|| format!("loading target table {}", path.display()))?
        }
        None => default_targets(),
    };
    Ok(TargetRegistry::new(specs, mode)?)
}

/// Built-in table: short and long aliases per service.
pub fn default_targets() -> Vec<TargetSpec> {
    vec![
        TargetSpec::new("auth-service", "backend", "auth-service"),
        TargetSpec::new("auth", "backend", "auth-service"),
        TargetSpec::new("user-service", "backend", "user-service"),
        TargetSpec::new("users", "backend", "user-service"),
        TargetSpec::new("api-gateway", "backend", "api-gateway"),
        TargetSpec::new("gateway", "backend", "api-gateway"),
        TargetSpec::new("web-frontend", "frontend", "web-frontend"),
        TargetSpec::new("frontend", "frontend", "web-frontend"),
    ]
}
