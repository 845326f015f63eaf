use crate::config::model::{Credentials, ScanSettings};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const ENV_URL: &str = "BUILDSCAN_URL";
pub const ENV_USERNAME: &str = "BUILDSCAN_USERNAME";
pub const ENV_PASSWORD: &str = "BUILDSCAN_PASSWORD";
pub const ENV_API_TOKEN: &str = "BUILDSCAN_API_TOKEN";

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<ScanSettings> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {:?}", path))?;
    let settings = serde_yaml::from_str::<ScanSettings>(&content)
        .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
    Ok(settings)
}

/// Server URL and secrets from the environment take precedence over the file.
pub fn apply_env_overrides(settings: &mut ScanSettings, env: &BTreeMap<String, String>) {
    let value = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(url) = value(ENV_URL) {
        settings.server.url = url.to_string();
    }
    if let Some(username) = value(ENV_USERNAME) {
        settings
            .server
            .credentials
            .get_or_insert_with(Credentials::default)
            .username = username.to_string();
    }
    // 密码允许首尾空格，不做 trim
    if let Some(password) = env.get(ENV_PASSWORD).filter(|v| !v.is_empty()) {
        settings
            .server
            .credentials
            .get_or_insert_with(Credentials::default)
            .password = password.clone();
    }
    if let Some(token) = value(ENV_API_TOKEN) {
        settings.server.api_token = Some(token.to_string());
    }
}
