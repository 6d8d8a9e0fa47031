use anyhow::{Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::session::SessionMode;
use crate::FileMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub quickbooks: QuickBooksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickBooksConfig {
    /// Registered AppID; empty string avoids accidental registration.
    pub application_id: Option<String>,
    pub application_name: Option<String>,
    /// Path to the .qbw company file, or AUTO for whatever file QuickBooks
    /// currently has open.
    pub company_file: String,
    /// single-session | multi-session | per-request
    #[serde(default = "default_session_mode")]
    pub session_mode: String,
    /// do-not-care | single-user | multi-user | online
    pub file_mode: Option<String>,
    #[serde(default = "default_qbxml_major")]
    pub qbxml_version_major: u16,
    #[serde(default)]
    pub qbxml_version_minor: u16,
    /// Watchdog budget for one batch, including connection setup.
    pub request_timeout_secs: Option<u64>,
}

fn default_session_mode() -> String {
    "per-request".to_string()
}

fn default_qbxml_major() -> u16 {
    16
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file not found at: {}. Please create it from config/config.example.toml",
                path.display()
            ));
        }

        let mut config: Config = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .context("Failed to parse configuration")?;

        // Override with environment variables if present
        if let Ok(company_file) = std::env::var("QB_COMPANY_FILE") {
            config.quickbooks.company_file = company_file;
        }

        if let Ok(session_mode) = std::env::var("QB_SESSION_MODE") {
            config.quickbooks.session_mode = session_mode;
        }

        // Post-process Windows paths
        config.normalize_paths();

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.quickbooks.company_file.is_empty() {
            return Err(anyhow::anyhow!("QuickBooks company file path cannot be empty (use AUTO for the open file)"));
        }

        if SessionMode::parse(&self.quickbooks.session_mode).is_none() {
            return Err(anyhow::anyhow!(
                "Unknown session_mode '{}': expected single-session, multi-session or per-request",
                self.quickbooks.session_mode
            ));
        }

        if let Some(file_mode) = &self.quickbooks.file_mode {
            if FileMode::parse(file_mode).is_none() {
                return Err(anyhow::anyhow!(
                    "Unknown file_mode '{}': expected do-not-care, single-user, multi-user or online",
                    file_mode
                ));
            }
        }

        if self.quickbooks.qbxml_version_major == 0 {
            return Err(anyhow::anyhow!("qbxml_version_major cannot be 0"));
        }

        if self.quickbooks.request_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!("request_timeout_secs cannot be 0"));
        }

        Ok(())
    }

    /// Normalize file paths to handle Windows path separators
    fn normalize_paths(&mut self) {
        self.quickbooks.company_file = Self::normalize_windows_path(&self.quickbooks.company_file);
    }

    /// Normalize a Windows file path by converting forward slashes to
    /// backslashes, leaving the AUTO sentinel and non-Windows paths alone.
    fn normalize_windows_path(path: &str) -> String {
        if path == "AUTO" || path.is_empty() {
            return path.to_string();
        }

        if cfg!(windows) && Self::is_windows_path(path) {
            let normalized = path.replace('/', "\\");
            if normalized != path {
                log::info!("Normalized Windows path: '{}' -> '{}'", path, normalized);
            }
            normalized
        } else {
            path.to_string()
        }
    }

    /// Check if a path looks like a Windows path
    fn is_windows_path(path: &str) -> bool {
        // Windows drive letters (C:, D:, etc.) or UNC paths (\\server)
        path.len() >= 3 && path.chars().nth(1) == Some(':')
            || path.starts_with("\\\\")
            || path.contains('\\')
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            quickbooks: QuickBooksConfig {
                application_id: None,
                application_name: Some("QuickBooks Query Service".to_string()),
                company_file: "AUTO".to_string(),
                session_mode: default_session_mode(),
                file_mode: None,
                qbxml_version_major: default_qbxml_major(),
                qbxml_version_minor: 0,
                request_timeout_secs: Some(30),
            },
        }
    }
}
