use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "RECEIPTD_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankInfo {
    #[serde(default)]
    pub bank_name: String,
    #[serde(default)]
    pub account_number: String,
    #[serde(default)]
    pub account_owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrgInfo {
    pub name: String,
    pub contact_lines: Vec<String>,
    pub title: String,
    pub bank: Option<BankInfo>,
    pub qr_image_path: Option<PathBuf>,
    pub logo_path: Option<PathBuf>,
}

impl Default for OrgInfo {
    fn default() -> Self {
        Self {
            name: "TMS English Club".to_string(),
            contact_lines: vec![
                "Địa chỉ: LK0908 - Khu đô thị TMS - Hùng Vương - Phúc Yên".to_string(),
                "Số điện thoại: 0981.802.098".to_string(),
            ],
            title: "Thông Báo Học Phí".to_string(),
            bank: Some(BankInfo {
                bank_name: "Vietinbank".to_string(),
                account_number: "0981802098".to_string(),
                account_owner: "HOANG THU TRANG".to_string(),
            }),
            qr_image_path: Some(PathBuf::from("images/qr1.png")),
            logo_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub org: OrgInfo,
    pub output_dir: PathBuf,
    pub raster_scale: f32,
    pub preview_scale: f32,
    pub batch_interval_ms: u64,
    pub done_ttl_ms: u64,
    pub copied_ttl_ms: u64,
    pub font_dirs: Vec<PathBuf>,
    pub clipboard_command: Option<Vec<String>>,
    /// Directory that relative asset paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            org: OrgInfo::default(),
            output_dir: PathBuf::from("receipts"),
            raster_scale: 2.0,
            preview_scale: 1.0,
            batch_interval_ms: 250,
            done_ttl_ms: 2000,
            copied_ttl_ms: 1400,
            font_dirs: Vec::new(),
            clipboard_command: None,
            base_dir: None,
        }
    }
}

impl Settings {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn done_ttl(&self) -> Duration {
        Duration::from_millis(self.done_ttl_ms)
    }

    pub fn copied_ttl(&self) -> Duration {
        Duration::from_millis(self.copied_ttl_ms)
    }

    /// Organization info with asset paths resolved for rendering.
    pub fn resolved_org(&self) -> OrgInfo {
        let mut org = self.org.clone();
        org.qr_image_path = org.qr_image_path.map(|p| self.resolve(&p));
        org.logo_path = org.logo_path.map(|p| self.resolve(&p));
        org
    }

    /// Resolves a configured path against the config file's directory.
    pub fn resolve(&self, p: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        }
    }
}

pub fn load_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.to_string_lossy()))?;
    let mut settings: Settings = serde_json::from_str(&text)
        .with_context(|| format!("config {} is invalid JSON", path.to_string_lossy()))?;
    settings.base_dir = path.parent().map(Path::to_path_buf);
    if !(settings.raster_scale.is_finite() && settings.raster_scale > 0.0) {
        anyhow::bail!("rasterScale must be a positive number");
    }
    Ok(settings)
}

/// Settings from `RECEIPTD_CONFIG` when set; built-in defaults otherwise. A broken config
/// file is logged and ignored so the sidecar still starts.
pub fn load_settings() -> Settings {
    let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) else {
        return Settings::default();
    };
    match load_settings_file(&path) {
        Ok(s) => {
            log::info!("loaded config from {}", path.to_string_lossy());
            s
        }
        Err(e) => {
            log::warn!("{e:#}; using default settings");
            Settings::default()
        }
    }
}
