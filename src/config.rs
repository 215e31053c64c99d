use dotenvy::dotenv;
use std::{env, path::PathBuf, time::Duration};
use tracing::info;

use crate::error::ConfigError;
use crate::pool::OverflowPolicy;
use crate::watchlist::Watchlist;

/// Which loops this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Ingest,
    Storage,
    Analyze,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Ingest => "ingest",
            Role::Storage => "storage",
            Role::Analyze => "analyze",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub storage_group: String,
    pub executor_group: String,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub fetch_workers: usize,
    pub tx_workers: usize,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub shutdown_grace: Duration,
}

/// Immutable process configuration, built once and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub roles: Vec<Role>,
    pub rpc_ws_url: Option<String>,
    pub rpc_http_url: Option<String>,
    pub watchlist: Watchlist,
    pub event_log_path: Option<PathBuf>,
    pub kafka: Option<KafkaConfig>,
    pub classifier_url: String,
    pub classifier_timeout: Duration,
    pub db_path: String,
    pub port: Option<u16>,
    pub reconnect_delay: Duration,
    pub pool: PoolConfig,
}

impl Config {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Builds the config from any key lookup. `load` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| -> u64 {
            get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        let roles = parse_roles(&get("ROLES").unwrap_or_else(|| "ingest".to_string()))?;

        let rpc_ws_url = get("RPC_WS_URL").or_else(|| get("ALCHEMY_WSS_URL"));
        let rpc_http_url = get("RPC_HTTP_URL").or_else(|| get("ALCHEMY_HTTPS_URL"));

        let watchlist = match get("WATCHLIST") {
            Some(raw) => Watchlist::parse(&raw)?,
            None => Watchlist::default_routers(),
        };

        let kafka = get("KAFKA_BROKER").map(|brokers| KafkaConfig {
            brokers,
            topic: get("KAFKA_TOPIC").unwrap_or_else(|| "mempool-transactions".to_string()),
            storage_group: get("KAFKA_STORAGE_GROUP")
                .unwrap_or_else(|| "local-storage-group".to_string()),
            executor_group: get("KAFKA_EXECUTOR_GROUP")
                .unwrap_or_else(|| "executor-group".to_string()),
        });

        let overflow = match get("POOL_OVERFLOW").as_deref().map(str::trim) {
            None | Some("block") => OverflowPolicy::Block,
            Some("drop") => OverflowPolicy::Drop,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "POOL_OVERFLOW",
                    reason: format!("expected `block` or `drop`, got `{other}`"),
                })
            }
        };

        let cfg = Config {
            roles,
            rpc_ws_url,
            rpc_http_url,
            watchlist,
            event_log_path: get("EVENT_LOG_PATH").map(PathBuf::from),
            kafka,
            classifier_url: get("CLASSIFIER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5000/predict".to_string()),
            classifier_timeout: Duration::from_millis(number("CLASSIFIER_TIMEOUT_MS", 3000)),
            db_path: get("DATABASE_URL").unwrap_or_else(|| "mempool_data.db".to_string()),
            port: get("PORT").and_then(|p| p.trim().parse().ok()),
            reconnect_delay: Duration::from_secs(number("RECONNECT_DELAY_SECS", 5).max(1)), // 0 would spin
            pool: PoolConfig {
                fetch_workers: number("FETCH_WORKERS", 4).max(1) as usize,
                tx_workers: number("TX_WORKERS", 16).max(1) as usize,
                queue_capacity: number("POOL_QUEUE_CAPACITY", 1024).max(1) as usize,
                overflow,
                shutdown_grace: Duration::from_secs(number("SHUTDOWN_GRACE_SECS", 10)),
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for role in &self.roles {
            let name = role.name();
            match role {
                Role::Ingest => {
                    require(self.rpc_ws_url.is_some(), "RPC_WS_URL", name)?;
                    require(self.rpc_http_url.is_some(), "RPC_HTTP_URL", name)?;
                }
                Role::Storage => {
                    require(self.kafka.is_some(), "KAFKA_BROKER", name)?;
                }
                Role::Analyze => {
                    require(self.kafka.is_some(), "KAFKA_BROKER", name)?;
                    require(self.rpc_http_url.is_some(), "RPC_HTTP_URL", name)?;
                }
            }
        }
        if self.has_role(Role::Ingest) && self.watchlist.is_empty() {
            return Err(ConfigError::Invalid {
                key: "WATCHLIST",
                reason: "no addresses to watch".to_string(),
            });
        }
        Ok(())
    }
}

fn require(present: bool, key: &'static str, role: &'static str) -> Result<(), ConfigError> {
    if present {
        Ok(())
    } else {
        Err(ConfigError::Missing { key, role })
    }
}

fn parse_roles(raw: &str) -> Result<Vec<Role>, ConfigError> {
    let mut roles = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()) {
        let role = match name.as_str() {
            "ingest" => Role::Ingest,
            "storage" => Role::Storage,
            "analyze" | "executor" => Role::Analyze,
            other => {
                return Err(ConfigError::Invalid {
                    key: "ROLES",
                    reason: format!("unknown role `{other}`"),
                })
            }
        };
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    if roles.is_empty() {
        return Err(ConfigError::Invalid {
            key: "ROLES",
            reason: "no roles enabled".to_string(),
        });
    }
    Ok(roles)
}

/// Loads `.env` (if present) and then reads the process environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenv().ok();

    let cfg = Config::from_lookup(|key| env::var(key).ok())?;

    info!(
        roles = ?cfg.roles,
        watched = cfg.watchlist.len(),
        queue = cfg.kafka.is_some(),
        event_log = ?cfg.event_log_path,
        "Loaded config"
    );

    Ok(cfg)
}
