// 扫描 CLI 命令行构建

use super::ScanRequest;
use crate::error::{CoreError, Result};
use reqwest::Url;

/// Heap size used when the caller passes the disabled sentinel.
pub const DEFAULT_MEMORY_MB: u32 = 256;
pub const MEMORY_DISABLED: u32 = 0;

const MASK: &str = "********";

pub fn effective_memory(memory_mb: u32) -> u32 {
    if memory_mb == MEMORY_DISABLED {
        DEFAULT_MEMORY_MB
    } else {
        memory_mb
    }
}

#[derive(Debug, Clone)]
pub struct ScanCommand {
    argv: Vec<String>,
    password_index: usize,
}

impl ScanCommand {
    /// Builds the argument vector. Fails before anything is launched when
    /// server or credential settings are missing.
    pub fn build(request: &ScanRequest<'_>) -> Result<Self> {
        let server = request.server;
        if server.url.trim().is_empty() {
            return Err(CoreError::Configuration("No server URL was provided.".to_string()));
        }
        let url = Url::parse(server.url.trim()).map_err(|e| {
            CoreError::Configuration(format!(
                "The server URL '{}' is not a valid URL: {}",
                server.url, e
            ))
        })?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                CoreError::Configuration(format!("The server URL '{}' has no host.", server.url))
            })?;
        let credentials = server
            .credentials
            .as_ref()
            .filter(|c| !c.username.is_empty())
            .ok_or_else(|| {
                CoreError::Configuration(
                    "No credentials could be found to connect to the server.".to_string(),
                )
            })?;
        if request.targets.is_empty() {
            return Err(CoreError::Configuration("Could not find any targets to scan.".to_string()));
        }

        let mut argv = vec![
            request.tool.launcher.display().to_string(),
            "-Done-jar.silent=true".to_string(),
            format!("-Xmx{}m", effective_memory(request.memory_mb)),
            "-jar".to_string(),
            request.tool.cli.display().to_string(),
            "--scheme".to_string(),
            url.scheme().to_string(),
            "--host".to_string(),
            host.to_string(),
        ];
        if let Some(port) = written_port(server.url.trim(), &url) {
            argv.push("--port".to_string());
            argv.push(port.to_string());
        }
        argv.push("--username".to_string());
        argv.push(credentials.username.clone());
        argv.push("--password".to_string());
        let password_index = argv.len();
        argv.push(credentials.password.clone());

        if request.dry_run {
            argv.push("--dryRun".to_string());
        }
        if let Some(name) = request.code_location_name.map(str::trim).filter(|n| !n.is_empty()) {
            argv.push("--name".to_string());
            argv.push(name.to_string());
        }
        for pattern in request.exclusions {
            argv.push("--exclude".to_string());
            argv.push(pattern.clone());
        }
        for target in request.targets {
            argv.push(target.absolute_path().display().to_string());
        }

        Ok(Self { argv, password_index })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn into_argv(self) -> Vec<String> {
        self.argv
    }

    /// Command line for logs, with the password replaced.
    pub fn masked(&self) -> String {
        self.argv
            .iter()
            .enumerate()
            .map(|(i, arg)| if i == self.password_index { MASK } else { arg.as_str() })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Port written in the URL text. `Url::port` hides a written scheme default
/// such as `:443`, so the authority is read from the raw string.
fn written_port(raw: &str, url: &Url) -> Option<u16> {
    if let Some(port) = url.port() {
        return Some(port);
    }
    let rest = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    // IPv6 字面量的冒号在方括号内
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    let (_, digits) = after_host.rsplit_once(':')?;
    if digits.is_empty() {
        return None;
    }
    url.port_or_known_default()
}
