use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{error, info};

use crate::correlator::DuplicatePolicy;

#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, after loading `env_file` into it.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(err) => error!("could not parse .env at {}: {}", env_file.display(), err),
            }
        } else {
            info!("no .env at {}, using process environment", env_file.display());
        }
        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// Fixed key/value configuration, e.g. for tests or embedding.
#[derive(Debug, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new<I, K, V>(pairs: I) -> Box<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Box::new(Self { map })
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

pub const HUB_URL: &str = "PLAYER_HUB_URL";
pub const HUB_TOKEN: &str = "PLAYER_HUB_TOKEN";
pub const SLOTS: &str = "PLAYER_SLOTS";
pub const READY_TIMEOUT_MS: &str = "PLAYER_READY_TIMEOUT_MS";
pub const RESULT_TIMEOUT_MS: &str = "PLAYER_RESULT_TIMEOUT_MS";
pub const DUPLICATE_POLICY: &str = "PLAYER_DUPLICATE_POLICY";
pub const SURFACE_CMD: &str = "PLAYER_SURFACE_CMD";

/// Everything the player needs to run a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub hub_url: String,
    pub hub_token: Option<String>,
    pub slots: usize,
    pub ready_timeout: Duration,
    pub result_timeout: Duration,
    pub duplicate_policy: DuplicatePolicy,
    pub surface_cmd: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:8080/".to_string(),
            hub_token: None,
            slots: 1,
            ready_timeout: player_channel::DEFAULT_READY_TIMEOUT,
            result_timeout: Duration::from_secs(30),
            duplicate_policy: DuplicatePolicy::Overwrite,
            surface_cmd: None,
        }
    }
}

impl PlayerConfig {
    /// Build from `PLAYER_*` keys; anything missing keeps its default.
    pub async fn from_manager(config: &ConfigManager) -> Result<Self> {
        let mut cfg = Self::default();
        let src = &config.0;

        if let Some(url) = src.get(HUB_URL).await {
            cfg.hub_url = url;
        }
        cfg.hub_token = src.get(HUB_TOKEN).await.filter(|t| !t.is_empty());
        if let Some(slots) = src.get(SLOTS).await {
            cfg.slots = slots
                .parse()
                .with_context(|| format!("{SLOTS} must be a number, got `{slots}`"))?;
        }
        if let Some(ms) = src.get(READY_TIMEOUT_MS).await {
            cfg.ready_timeout = parse_millis(READY_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = src.get(RESULT_TIMEOUT_MS).await {
            cfg.result_timeout = parse_millis(RESULT_TIMEOUT_MS, &ms)?;
        }
        if let Some(policy) = src.get(DUPLICATE_POLICY).await {
            cfg.duplicate_policy = policy.parse().with_context(|| {
                format!("{DUPLICATE_POLICY} must be `overwrite` or `reject`, got `{policy}`")
            })?;
        }
        if let Some(cmd) = src.get(SURFACE_CMD).await {
            cfg.surface_cmd = Some(PathBuf::from(cmd));
        }

        if cfg.slots == 0 {
            anyhow::bail!("{SLOTS} must be at least 1");
        }
        Ok(cfg)
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    let ms: u64 = raw
        .parse()
        .with_context(|| format!("{key} must be milliseconds, got `{raw}`"))?;
    Ok(Duration::from_millis(ms))
}
