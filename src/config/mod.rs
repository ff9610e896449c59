use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::filter::{CategoryFilter, StatusFilter};
use crate::model::{Coordinate, Scope, UserId};
use crate::staging::DEFAULT_MAX_IMAGE_BYTES;
use crate::storage::http::parse_base_url;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "PinTraveler";
const APP_NAME: &str = "pintrav";

pub const CONFIG_ENV: &str = "PINTRAV_CONFIG";
pub const SERVER_ENV: &str = "PINTRAV_SERVER";
pub const SESSION_ENV: &str = "PINTRAV_SESSION";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let default_cfg = AppConfig::default();
            self.write_default_config(&default_cfg)?;
            let mut cfg = default_cfg;
            cfg.post_load()?;
            return Ok(cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load()?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_dirs.data_dir().join("state"));

        Ok(Self::rooted(config_dir, config_file, state_dir))
    }

    /// Lays out every path beneath the given config file and state directory.
    pub fn rooted(config_dir: PathBuf, config_file: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config_dir,
            config_file,
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.log_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerOptions,
    pub browse: BrowseOptions,
    pub map: MapOptions,
    pub staging: StagingOptions,
}

impl AppConfig {
    fn post_load(&mut self) -> Result<()> {
        self.apply_env();
        self.server.validate()?;
        self.map.clamp();
        if self.staging.max_image_bytes == 0 {
            tracing::warn!("max_image_bytes of 0 would reject every image, using default");
            self.staging.max_image_bytes = DEFAULT_MAX_IMAGE_BYTES;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(server) = env::var(SERVER_ENV).ok().filter(|v| !v.trim().is_empty()) {
            self.server.base_url = server;
        }
        if let Some(session) = env::var(SESSION_ENV).ok().filter(|v| !v.trim().is_empty()) {
            self.server.session_cookie = Some(session);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub base_url: String,
    /// Value of the `sessionid` cookie issued after logging in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
    /// Your account id, used to decide which pins you may edit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            session_cookie: None,
            user_id: None,
            request_timeout_secs: 15,
        }
    }
}

impl ServerOptions {
    fn validate(&mut self) -> Result<()> {
        parse_base_url(&self.base_url)?;
        if self.request_timeout_secs == 0 {
            tracing::warn!("request_timeout_secs must be positive, using 15");
            self.request_timeout_secs = 15;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn caller(&self) -> Option<UserId> {
        self.user_id.map(UserId)
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseOptions {
    pub default_scope: Scope,
    #[serde_as(as = "DisplayFromStr")]
    pub status_filter: StatusFilter,
    #[serde_as(as = "DisplayFromStr")]
    pub category_filter: CategoryFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    pub center_lat: f64,
    pub center_lon: f64,
    /// Degrees the map cursor moves per key press.
    pub cursor_step: f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            center_lat: 41.7370,
            center_lon: -111.8338,
            cursor_step: 1.0,
        }
    }
}

impl MapOptions {
    fn clamp(&mut self) {
        let center = Coordinate::normalized(self.center_lat, self.center_lon);
        if center.lat() != self.center_lat || center.lon() != self.center_lon {
            tracing::warn!(%center, "map center out of range, normalised");
        }
        self.center_lat = center.lat();
        self.center_lon = center.lon();
        if !(self.cursor_step.is_finite() && self.cursor_step > 0.0) {
            tracing::warn!(step = self.cursor_step, "invalid cursor_step, using 1.0");
            self.cursor_step = 1.0;
        }
        self.cursor_step = self.cursor_step.min(45.0);
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::normalized(self.center_lat, self.center_lon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingOptions {
    pub max_image_bytes: usize,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}
