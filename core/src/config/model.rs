use crate::catalog::reconciler::NameMatching;
use crate::classify::Outcome;
use crate::error::{CoreError, Result};
use crate::scanner::ScanJob;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_INDEX_GRACE_SECS: u64 = 2;

/// Everything one orchestration run needs, passed in explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub server: ServerSettings,
    pub tool: ToolSettings,
    pub scan: ScanOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_conditions: Option<FailureConditions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            credentials: None,
            api_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            proxy: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// 不在日志里打印密码
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Glob patterns (`*` wildcard) of hosts reached without the proxy.
    #[serde(default)]
    pub no_proxy_hosts: Vec<String>,
}

impl ProxySettings {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub name: String,
    /// Installation directory; the CLI jar lives in `<home>/lib`.
    pub home: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_home: Option<PathBuf>,
    /// Heap limit for the CLI; 0 selects the default.
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub jobs: Vec<ScanJob>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSettings>,
    /// Seconds to wait for the server to index new scans before mapping.
    pub index_grace_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_identifier: Option<String>,
    /// Name the server gives the scan location; defaults to the CLI's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_location_name: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            dry_run: false,
            project: None,
            index_grace_secs: DEFAULT_INDEX_GRACE_SECS,
            host_identifier: None,
            code_location_name: None,
        }
    }
}

impl ScanOptions {
    /// Exclusion patterns of all jobs, trimmed, first occurrence kept.
    pub fn exclusion_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        for pattern in self.jobs.iter().flat_map(|job| job.exclusions.iter()) {
            let pattern = pattern.trim();
            if !pattern.is_empty() && !patterns.iter().any(|p| p == pattern) {
                patterns.push(pattern.to_string());
            }
        }
        patterns
    }

    /// Project settings, only when both the project and version are named.
    pub fn configured_project(&self) -> Option<&ProjectSettings> {
        self.project.as_ref().filter(|p| p.is_configured())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub name: String,
    pub version: String,
    /// Known project id; skips the lookup by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub name_matching: NameMatching,
    /// Remove mappings of the scanned locations to other versions first.
    #[serde(default)]
    pub unmap_previous: bool,
}

impl ProjectSettings {
    pub fn is_configured(&self) -> bool {
        !self.name.trim().is_empty() && !self.version.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureConditions {
    #[serde(default)]
    pub fail_on_policy_violation: bool,
    #[serde(default = "default_violation_outcome")]
    pub outcome_on_violation: Outcome,
}

fn default_violation_outcome() -> Outcome {
    Outcome::Unstable
}

impl ScanSettings {
    /// Checks the settings required before anything runs.
    pub fn validate(&self) -> Result<()> {
        if self.tool.home.as_os_str().is_empty() {
            return Err(CoreError::ToolMissing(
                "Could not find a scan tool installation to use.".to_string(),
            ));
        }
        if self.scan.jobs.is_empty() {
            return Err(CoreError::Configuration("Could not find any targets to scan.".to_string()));
        }
        if self.server.url.trim().is_empty() {
            return Err(CoreError::Configuration("No server URL was provided.".to_string()));
        }
        let has_credentials = self
            .server
            .credentials
            .as_ref()
            .map(|c| !c.username.trim().is_empty())
            .unwrap_or(false);
        if !has_credentials {
            return Err(CoreError::Configuration(
                "No credentials could be found to connect to the server.".to_string(),
            ));
        }
        Ok(())
    }
}
