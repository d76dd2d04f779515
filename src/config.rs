use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_OUTPUT_DIR: &str = "chat_images";

// Structural/style fingerprint of the scrollable message pane on messenger.com.
pub const DEFAULT_PANE_LOCATOR: &str = "//div[@role='none' and contains(@class, 'x78zum5') \
and contains(@class, 'xdt5ytf') and contains(@class, 'x1iyjqo2') \
and contains(@class, 'x6ikm8r') and contains(@class, 'x1odjw0f')]";

const MAX_SCROLLS_CAP: usize = 5_000;
const MAX_SETTLE_MS: u64 = 30_000;
const MAX_STALL_THRESHOLD: u32 = 10;
const MAX_FETCH_TIMEOUT_SECS: u64 = 120;
const MAX_DOWNLOAD_DELAY_MS: u64 = 5_000;
const MAX_PAGE_LOAD_WAIT_MS: u64 = 60_000;
const MAX_ERROR_LINGER_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Conversation to open; may also come from the CLI.
    pub chat_url: Option<String>,
    pub webdriver_url: String,
    pub output_dir: PathBuf,
    /// XPath matching candidate scrollable panes.
    pub pane_locator: String,
    pub max_scrolls: usize,
    pub settle_ms: u64,
    pub stall_threshold: u32,
    pub min_dimension: i64,
    pub fetch_timeout_secs: u64,
    pub download_delay_ms: u64,
    pub page_load_wait_ms: u64,
    pub harvest_during_scroll: bool,
    /// Stop scrolling once this text (e.g. a rendered timestamp label) is visible.
    pub stop_marker: Option<String>,
    pub error_linger_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chat_url: None,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            pane_locator: DEFAULT_PANE_LOCATOR.to_string(),
            max_scrolls: 100,
            settle_ms: 2_000,
            stall_threshold: 3,
            min_dimension: 50,
            fetch_timeout_secs: 10,
            download_delay_ms: 100,
            page_load_wait_ms: 5_000,
            harvest_during_scroll: true,
            stop_marker: None,
            error_linger_secs: 30,
        }
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        let parsed: Self = serde_json::from_slice(&bytes).map_err(|e| VaultError::ConfigInvalid {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;
        Ok(parsed)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{json}\n"))?;
        Ok(())
    }

    /// Pulls out-of-range values back into sane bounds.
    pub fn clamped(mut self) -> Self {
        self.max_scrolls = self.max_scrolls.clamp(1, MAX_SCROLLS_CAP);
        self.settle_ms = self.settle_ms.min(MAX_SETTLE_MS);
        self.stall_threshold = self.stall_threshold.clamp(1, MAX_STALL_THRESHOLD);
        self.min_dimension = self.min_dimension.max(0);
        self.fetch_timeout_secs = self.fetch_timeout_secs.clamp(1, MAX_FETCH_TIMEOUT_SECS);
        self.download_delay_ms = self.download_delay_ms.min(MAX_DOWNLOAD_DELAY_MS);
        self.page_load_wait_ms = self.page_load_wait_ms.min(MAX_PAGE_LOAD_WAIT_MS);
        self.error_linger_secs = self.error_linger_secs.min(MAX_ERROR_LINGER_SECS);
        if self.pane_locator.trim().is_empty() {
            self.pane_locator = DEFAULT_PANE_LOCATOR.to_string();
        }
        if let Some(marker) = &self.stop_marker {
            if marker.trim().is_empty() {
                self.stop_marker = None;
            }
        }
        self
    }
}
