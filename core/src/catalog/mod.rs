// Catalog module - 远程目录服务
// 定义项目、版本、扫描位置的数据模型和客户端接口

pub mod http;
pub mod reconciler;

use crate::error::Result;
use crate::scanner::ScanTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of a project or version listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    pub name: String,
}

impl CatalogRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    pub name: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionIdentity {
    pub name: String,
    pub id: Option<String>,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLocation {
    pub id: String,
    /// Mapped to the version being reconciled.
    pub already_mapped: bool,
    /// Every version the location is currently mapped to.
    #[serde(default)]
    pub mapped_version_ids: Vec<String>,
}

/// Scan locations associated with a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub version_id: String,
    pub scan_location_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyOverallStatus {
    InViolation,
    InViolationOverridden,
    NotInViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatusCount {
    pub name: PolicyOverallStatus,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    pub overall_status: PolicyOverallStatus,
    #[serde(default)]
    pub component_version_status_counts: Vec<PolicyStatusCount>,
}

impl PolicyStatus {
    pub fn count(&self, status: PolicyOverallStatus) -> u64 {
        self.component_version_status_counts
            .iter()
            .filter(|c| c.name == status)
            .map(|c| c.value)
            .sum()
    }
}

/// Client side of the remote catalog. All calls carry the caller's
/// authentication and proxy settings.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// May return partial name matches; callers filter for the exact name.
    async fn find_projects_by_name(&self, name: &str) -> Result<Vec<CatalogRecord>>;

    async fn find_versions_by_project(&self, project_id: &str) -> Result<Vec<CatalogRecord>>;

    /// Targets without a scan location are absent from the result.
    async fn find_scan_locations(
        &self,
        host: &str,
        targets: &[ScanTarget],
        version_id: &str,
    ) -> Result<BTreeMap<ScanTarget, ScanLocation>>;

    /// Must succeed when the mapping already exists.
    async fn apply_mapping(&self, version_id: &str, scan_location_ids: &[String]) -> Result<()>;

    /// Must succeed when the mapping is already gone.
    async fn remove_mapping(&self, version_id: &str, scan_location_id: &str) -> Result<()>;

    async fn policy_status(&self, version_id: &str) -> Result<Option<PolicyStatus>>;
}
