use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::pod::PodSettings;
use crate::types::PodUrl;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: SocketAddr,
    /// URL other pods use to reach us; derived from `listen` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub seed_peers: Vec<String>,
    pub make_friends_on_start: bool,
    pub data_dir: PathBuf,
    pub max_peers: usize,
    pub request_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,
    pub fanout_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9000)),
            public_url: None,
            seed_peers: Vec::new(),
            make_friends_on_start: false,
            data_dir: PathBuf::from("podmesh-data"),
            max_peers: 64,
            request_timeout_secs: 10,
            fetch_timeout_secs: None,
            fanout_concurrency: 16,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("podmesh.toml"))
                .merge(Json::file("podmesh.json"))
                .merge(Env::prefixed("PODMESH_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // One seed URL per line, for deployments that mount the list as a file
        if let Ok(seed_file) = std::env::var("PODMESH_SEED_PEERS_FILE") {
            config.seed_peers = std::fs::read_to_string(seed_file)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect();
        }

        if config.max_peers == 0 {
            anyhow::bail!("max_peers must be at least 1");
        }
        Ok(config)
    }

    pub fn public_url(&self) -> anyhow::Result<PodUrl> {
        let raw = match &self.public_url {
            Some(url) => url.clone(),
            None => format!("http://{}", self.listen),
        };
        PodUrl::parse(&raw).map_err(|e| anyhow::anyhow!("Invalid public_url: {}", e))
    }

    pub fn pod_settings(&self) -> anyhow::Result<PodSettings> {
        let mut seed_peers = Vec::with_capacity(self.seed_peers.len());
        for raw in &self.seed_peers {
            seed_peers.push(
                PodUrl::parse(raw).map_err(|e| anyhow::anyhow!("Invalid seed peer: {}", e))?,
            );
        }

        let mut settings = PodSettings::new(self.public_url()?);
        settings.seed_peers = seed_peers;
        settings.max_peers = self.max_peers;
        settings.request_timeout = Duration::from_secs(self.request_timeout_secs);
        settings.fetch_timeout = self.fetch_timeout_secs.map(Duration::from_secs);
        settings.fanout_concurrency = self.fanout_concurrency;
        Ok(settings)
    }
}
