use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportScheme {
    MonthVendor,
    VendorMonth,
    TypeMonth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Logical root inside the export target, e.g. `/FetchExpense` or `/Tax/2025`.
    pub base_path: String,
    pub scheme: ExportScheme,
    /// Local folder that receives exported files. Empty means `<data_dir>/export`.
    pub target_dir: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            base_path: "/FetchExpense".to_string(),
            scheme: ExportScheme::MonthVendor,
            target_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailSettings {
    pub label_on_decision: bool,
    pub label_on_export: bool,
    pub include_spam: bool,
    pub include_trash: bool,
    /// File holding a bearer access token. Empty means `<data_dir>/tokens/gmail_token`.
    pub token_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkCaptureSettings {
    pub enabled: bool,
    pub render_enabled: bool,
    pub max_per_message: usize,
    pub timeout_ms: u64,
    pub nav_timeout_ms: u64,
    pub max_download_bytes: u64,
    pub user_agent: String,
    pub headless: bool,
    pub blocklist: Vec<String>,
}

impl Default for LinkCaptureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            render_enabled: false,
            max_per_message: 2,
            timeout_ms: 30_000,
            nav_timeout_ms: 15_000,
            max_download_bytes: 25 * 1024 * 1024,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            headless: true,
            blocklist: ["facebook.com", "instagram.com", "tiktok.com", "twitter.com", "youtube.com", "linkedin.com"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub gmail: GmailSettings,
    #[serde(default)]
    pub link_capture: LinkCaptureSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            export: ExportSettings::default(),
            gmail: GmailSettings::default(),
            link_capture: LinkCaptureSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn export_dir(&self) -> PathBuf {
        if self.export.target_dir.is_empty() {
            self.data_path().join("export")
        } else {
            PathBuf::from(shellexpand_path(&self.export.target_dir))
        }
    }

    pub fn gmail_token_path(&self) -> PathBuf {
        if self.gmail.token_path.is_empty() {
            self.data_path().join("tokens").join("gmail_token")
        } else {
            PathBuf::from(shellexpand_path(&self.gmail.token_path))
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("fetchexpense")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("fetchexpense")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| AppError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

/// Deep-merge a partial JSON object into the stored settings and save.
pub fn save_settings_patch(patch: serde_json::Value) -> Result<Settings> {
    let current = serde_json::to_value(load_settings())?;
    let merged = merge_settings_value(current, patch)?;
    save_settings(&merged)?;
    Ok(merged)
}

fn merge_settings_value(mut base: serde_json::Value, patch: serde_json::Value) -> Result<Settings> {
    if !patch.is_object() {
        return Err(AppError::Settings("settings patch must be a JSON object".to_string()));
    }
    merge_json(&mut base, patch);
    serde_json::from_value(base).map_err(|e| AppError::Settings(e.to_string()))
}

fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(b), serde_json::Value::Object(p)) => {
            for (k, v) in p {
                merge_json(b.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (slot, v) => *slot = v,
    }
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
