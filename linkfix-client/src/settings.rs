use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// `settings.json` is expected to be tiny; anything larger is treated as corrupt.
pub const MAX_SETTINGS_BYTES: u64 = 64 * 1024;

pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:7878/ws";
const DEFAULT_NOTIFICATION_MS: u64 = 3000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const MAX_NOTIFICATION_MS: u64 = 60_000;
const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    pub backend_url: String,
    pub notification_ms: u64,
    pub request_timeout_ms: u64,
    /// Directory of `<CatalogKey>.svg` files. `None` uses the built-in catalog.
    pub icon_dir: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_owned(),
            notification_ms: DEFAULT_NOTIFICATION_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            icon_dir: None,
        }
    }
}

impl ClientSettings {
    pub fn notification_duration(&self) -> Duration {
        Duration::from_millis(self.notification_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_backend_url(&self.backend_url)?;
        if self.notification_ms == 0 || self.notification_ms > MAX_NOTIFICATION_MS {
            return Err(format!(
                "notification_ms must be between 1 and {MAX_NOTIFICATION_MS}"
            ));
        }
        if self.request_timeout_ms < MIN_REQUEST_TIMEOUT_MS {
            return Err(format!(
                "request_timeout_ms must be at least {MIN_REQUEST_TIMEOUT_MS}"
            ));
        }
        Ok(())
    }
}

pub fn validate_backend_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|err| format!("invalid backend URL {raw:?}: {err}"))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(format!("backend URL must use ws or wss, got {other}")),
    }
    if url.host_str().is_none() {
        return Err(format!("backend URL {raw:?} has no host"));
    }
    Ok(url)
}

#[derive(Debug)]
pub enum SettingsLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl SettingsLoadError {
    pub fn is_missing(&self) -> bool {
        matches!(self, SettingsLoadError::Metadata(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl std::fmt::Display for SettingsLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            SettingsLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            SettingsLoadError::Read(e) => write!(f, "read failed: {e}"),
            SettingsLoadError::Parse(e) => write!(f, "parse failed: {e}"),
            SettingsLoadError::Invalid(reason) => write!(f, "invalid settings: {reason}"),
        }
    }
}

impl std::error::Error for SettingsLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsLoadError::Metadata(e) => Some(e),
            SettingsLoadError::Read(e) => Some(e),
            SettingsLoadError::Parse(e) => Some(e),
            SettingsLoadError::TooLarge { .. } | SettingsLoadError::Invalid(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum SettingsSaveError {
    Serialize(serde_json::Error),
    CreateDir(io::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for SettingsSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsSaveError::Serialize(e) => write!(f, "serialize failed: {e}"),
            SettingsSaveError::CreateDir(e) => write!(f, "create dir failed: {e}"),
            SettingsSaveError::WriteTmp(e) => write!(f, "tmp write failed: {e}"),
            SettingsSaveError::Rename(e) => write!(f, "rename failed: {e}"),
        }
    }
}

impl std::error::Error for SettingsSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsSaveError::Serialize(e) => Some(e),
            SettingsSaveError::CreateDir(e) => Some(e),
            SettingsSaveError::WriteTmp(e) => Some(e),
            SettingsSaveError::Rename(e) => Some(e),
        }
    }
}

pub fn settings_path() -> PathBuf {
    let base = std::env::var_os("LOCALAPPDATA")
        .or_else(|| std::env::var_os("XDG_CONFIG_HOME"))
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("LinkFix").join("settings.json")
}

pub fn parse_settings_json(data: &str) -> Result<ClientSettings, SettingsLoadError> {
    let settings =
        serde_json::from_str::<ClientSettings>(data).map_err(SettingsLoadError::Parse)?;
    settings.validate().map_err(SettingsLoadError::Invalid)?;
    Ok(settings)
}

pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings, SettingsLoadError> {
    let meta = fs::metadata(path).map_err(SettingsLoadError::Metadata)?;
    if meta.len() > MAX_SETTINGS_BYTES {
        return Err(SettingsLoadError::TooLarge {
            size: meta.len(),
            max: MAX_SETTINGS_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(SettingsLoadError::Read)?;
    parse_settings_json(&data)
}

/// Never fails: a missing, oversized or invalid file yields the defaults.
pub fn load_settings_or_default(path: &Path) -> ClientSettings {
    match load_settings_from_path(path) {
        Ok(settings) => settings,
        Err(err) if err.is_missing() => ClientSettings::default(),
        Err(err) => {
            debug!(path = %path.display(), "ignoring settings file: {}", err);
            ClientSettings::default()
        }
    }
}

pub fn save_settings_to_path(
    path: &Path,
    settings: &ClientSettings,
) -> Result<(), SettingsSaveError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(SettingsSaveError::CreateDir)?;
    }

    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(settings).map_err(SettingsSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(SettingsSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(SettingsSaveError::Rename)?;
    Ok(())
}
