use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use nirbhay_core::{NirbhayError, Result};

use crate::schema::NirbhayConfig;

/// Loads and optionally hot-reloads the Nirbhay configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<NirbhayConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > NIRBHAY_CONFIG env > ~/.nirbhay/nirbhay.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("NIRBHAY_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nirbhay")
            .join("nirbhay.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            NirbhayConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(NirbhayError::Config(e)),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Wrap an in-memory config (tests, embedded use). Nothing is read from disk.
    pub fn from_config(config: NirbhayConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::from("nirbhay.toml"),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> NirbhayConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<NirbhayConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse(raw: &str, path: &Path) -> Result<NirbhayConfig> {
        toml::from_str::<NirbhayConfig>(raw)
            .map_err(|e| NirbhayError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Apply env var overrides (NIRBHAY_SERVER_LISTEN, NIRBHAY_SAFETY_CODE, etc.)
    fn apply_env_overrides(mut config: NirbhayConfig) -> NirbhayConfig {
        if let Ok(v) = std::env::var("NIRBHAY_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("NIRBHAY_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("NIRBHAY_SAFETY_CODE") {
            config.escalation.safety_code = Some(v);
        }
        if let Ok(v) = std::env::var("NIRBHAY_BACKEND_URL") {
            config.services.backend_url = Some(v);
        }
        // Gateway keys: the config file wins, env fills the gap.
        if config.services.fast2sms_api_key.is_none() {
            if let Ok(v) = std::env::var("FAST2SMS_API_KEY") {
                config.services.fast2sms_api_key = Some(v);
            }
        }
        if config.services.fcm_server_key.is_none() {
            if let Ok(v) = std::env::var("FCM_SERVER_KEY") {
                config.services.fcm_server_key = Some(v);
            }
        }
        if config.services.unwired_labs_api_key.is_none() {
            if let Ok(v) = std::env::var("UNWIRED_LABS_API_KEY") {
                config.services.unwired_labs_api_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk. A file that fails validation leaves the current config in place.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(NirbhayError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate().map_err(NirbhayError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that triggers a reload when the config file changes.
    /// The returned watcher must be kept alive for watching to continue.
    pub fn watch(&self) -> Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<NotifyEvent, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if !event.paths.iter().any(|p| p.file_name() == path_for_event.file_name()) {
                return;
            }

            info!("config file changed, reloading");
            let raw = match std::fs::read_to_string(&path_for_event) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "failed to read config file during hot-reload");
                    return;
                }
            };
            match ConfigLoader::parse(&raw, &path_for_event) {
                Ok(new_config) => {
                    let new_config = ConfigLoader::apply_env_overrides(new_config);
                    if let Err(e) = new_config.validate() {
                        warn!(error = %e, "config file has errors, keeping current config");
                        return;
                    }
                    *config.write() = new_config;
                    info!("configuration hot-reloaded successfully");
                }
                Err(e) => {
                    warn!(error = %e, "config file has errors, keeping current config");
                }
            }
        })
        .map_err(|e| NirbhayError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| NirbhayError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
