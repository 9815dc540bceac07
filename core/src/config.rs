use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Where a feed's room comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRef {
    Id(String),
    Alias(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub id: String,
    pub room: RoomRef,
    pub max_entries: usize,
    pub homepage: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub exec: String,
    pub args: Vec<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct CloudflareConfig {
    pub zone_id: String,
    pub token: String,
}

impl std::fmt::Debug for CloudflareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareConfig")
            .field("zone_id", &self.zone_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub listen_address: String,
    /// Public base URL feeds are served under, without trailing slash.
    pub public_url: String,
    /// Base URL media downloads are served from.
    pub media_url: String,
    pub homeserver_url: String,
    /// Account the service acts as, `@name:domain`.
    pub user_id: String,
    pub bridge: BridgeConfig,
    /// Cache purging; `None` when zone or token is missing.
    pub cloudflare: Option<CloudflareConfig>,
    pub logging_enabled: bool,
    /// Feeds ordered by id.
    pub feeds: Vec<FeedConfig>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    listen_address: Option<String>,
    public_url: Option<String>,
    media_url: Option<String>,
    homeserver_url: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    bridge: FileBridge,
    #[serde(default)]
    cloudflare: FileCloudflare,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    feeds: BTreeMap<String, FileFeed>,
}

#[derive(Deserialize, Default)]
struct FileBridge {
    exec: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Deserialize, Default)]
struct FileCloudflare {
    zone_id: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileFeed {
    room_id: Option<String>,
    room_alias: Option<String>,
    #[serde(default = "default_max_entries")]
    max_entries: usize,
    homepage: Option<String>,
    language: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}

fn default_logging() -> bool {
    true
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_bridge() -> String {
    "feedserv-bridge".into()
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("FEEDSERV_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.toml"));

        let file_cfg: FileConfig = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut listen_address = file_cfg.listen_address.unwrap_or_else(default_listen);
        let mut public_url = file_cfg.public_url;
        let mut logging = file_cfg.logging.enabled;
        let mut token = file_cfg.cloudflare.token;

        // environment overrides
        if let Ok(l) = std::env::var("FEEDSERV_LISTEN") {
            listen_address = l;
        }
        if let Ok(u) = std::env::var("FEEDSERV_PUBLIC_URL") {
            public_url = Some(u);
        }
        if let Ok(l) = std::env::var("FEEDSERV_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(t) = std::env::var("FEEDSERV_CLOUDFLARE_TOKEN") {
            token = Some(t);
        }

        // CLI overrides
        if let Some(l) = &cli.listen {
            listen_address = l.clone();
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        let public_url = public_url
            .filter(|u| !u.is_empty())
            .context("public_url is required")?
            .trim_end_matches('/')
            .to_string();
        let user_id = file_cfg.user_id.context("user_id is required")?;
        user_domain(&user_id)?;
        let homeserver_url = file_cfg
            .homeserver_url
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let media_url = file_cfg
            .media_url
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| homeserver_url.clone());

        let cloudflare = match (file_cfg.cloudflare.zone_id, token) {
            (Some(zone_id), Some(token)) if !zone_id.is_empty() && !token.is_empty() => {
                Some(CloudflareConfig { zone_id, token })
            }
            _ => None,
        };

        if file_cfg.feeds.is_empty() {
            anyhow::bail!("no feeds configured");
        }
        let feeds = file_cfg
            .feeds
            .into_iter()
            .map(|(id, feed)| resolve_feed(id, feed))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            listen_address,
            public_url,
            media_url,
            homeserver_url,
            user_id,
            bridge: BridgeConfig {
                exec: file_cfg.bridge.exec.unwrap_or_else(default_bridge),
                args: file_cfg.bridge.args,
            },
            cloudflare,
            logging_enabled: logging,
            feeds,
        })
    }

    /// Server name part of the service's user id, used for permalinks.
    pub fn homeserver_domain(&self) -> &str {
        user_domain(&self.user_id).unwrap_or_default()
    }
}

fn resolve_feed(id: String, feed: FileFeed) -> Result<FeedConfig> {
    let room = match (feed.room_id, feed.room_alias) {
        (Some(room_id), _) if !room_id.is_empty() => RoomRef::Id(room_id),
        (_, Some(alias)) if !alias.is_empty() => RoomRef::Alias(alias),
        _ => anyhow::bail!("feed {id} needs a room_id or room_alias"),
    };
    if feed.max_entries == 0 {
        anyhow::bail!("feed {id}: max_entries must be at least 1");
    }
    Ok(FeedConfig {
        id: id.to_lowercase(),
        room,
        max_entries: feed.max_entries,
        homepage: feed.homepage.filter(|h| !h.is_empty()),
        language: feed.language.filter(|l| !l.is_empty()),
    })
}

fn user_domain(user_id: &str) -> Result<&str> {
    match user_id.strip_prefix('@').and_then(|rest| rest.split_once(':')) {
        Some((name, domain)) if !name.is_empty() && !domain.is_empty() => Ok(domain),
        _ => anyhow::bail!("invalid user_id {user_id}, expected @name:domain"),
    }
}
