use anyhow::{Context, Result};
use realtime_link::{WebSocketConfig, WebSocketConfigOverrides};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [link]
//                    heartbeat_interval_ms = 10000
//
//   env var:         ADMIN_LINK__HEARTBEAT_INTERVAL_MS=10000   (double underscore = nesting)
//
//   (single underscore stays within field names: ADMIN_API__UNREAD_COUNT_PATH)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// frame logging on
    Development,
    /// frame logging off
    Production,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub link: LinkFileConfig,
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Realtime link tunables (lives under `[link]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkFileConfig {
    /// Explicit endpoint; derived from `api.base_url` when absent.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for LinkFileConfig {
    fn default() -> Self {
        Self {
            url: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            debug: false,
        }
    }
}

/// REST endpoints used by the session collaborators (`[api]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_unread_count_path")]
    pub unread_count_path: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            refresh_path: default_refresh_path(),
            unread_count_path: default_unread_count_path(),
            client_id: default_client_id(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Credentials to start with (`[session]`). Usually supplied through env
/// vars rather than written to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub visit_tenant_id: Option<i64>,
    /// Route restored after a forced re-login.
    #[serde(default = "default_route")]
    pub route: String,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            tenant_id: None,
            visit_tenant_id: None,
            route: default_route(),
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_interval_ms() -> u64 {
    3_000
}
fn default_api_base_url() -> String {
    "http://localhost:48080/admin-api".to_string()
}
fn default_refresh_path() -> String {
    "/system/auth/refresh-token".to_string()
}
fn default_unread_count_path() -> String {
    "/system/notify-message/get-unread-count".to_string()
}
fn default_client_id() -> String {
    "default".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_route() -> String {
    "/".to_string()
}

/// Build a figment that layers: defaults → profile defaults → config.toml → ADMIN_* env vars.
///
/// The CLI profile takes priority over the config file profile.
///
/// Env vars use double-underscore for nesting into sections:
///   `ADMIN_LINK__DEBUG=true`  →  `link.debug = true`
///   `ADMIN_SESSION__ACCESS_TOKEN=…`  →  `session.access_token = …`
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("ADMIN_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: profile defaults sit between struct defaults and config.toml
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_to_file_config(profile.as_ref())))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("ADMIN_").split("__"))
}

fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    match profile {
        Some(Profile::Development) => FileConfig {
            profile: Some(Profile::Development),
            link: LinkFileConfig {
                debug: true,
                ..Default::default()
            },
            ..Default::default()
        },
        Some(Profile::Production) => FileConfig {
            profile: Some(Profile::Production),
            link: LinkFileConfig {
                debug: false,
                ..Default::default()
            },
            ..Default::default()
        },
        None => FileConfig::default(),
    }
}

impl LinkFileConfig {
    /// Runtime link config: defaults derived from the API base, then the
    /// file's values on top.
    pub fn websocket_config(&self, api: &ApiFileConfig) -> WebSocketConfig {
        WebSocketConfig::from_http_base(&api.base_url).with_overrides(WebSocketConfigOverrides {
            base_url: self.url.clone(),
            heartbeat_interval: Some(Duration::from_millis(self.heartbeat_interval_ms)),
            max_reconnect_attempts: Some(self.max_reconnect_attempts),
            reconnect_interval: Some(Duration::from_millis(self.reconnect_interval_ms)),
            debug: Some(self.debug),
        })
    }
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ConsoleDirs {
    pub data_dir: PathBuf,
}

impl ConsoleDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not find a configuration directory")?
                .join("admin-console"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Write a starter config with every default spelled out. Refuses to
    /// overwrite an existing file.
    pub fn write_default_config(&self) -> Result<PathBuf> {
        let path = self.config_toml_path();
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        let text = toml::to_string_pretty(&FileConfig::default())
            .context("Failed to render default config")?;
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
