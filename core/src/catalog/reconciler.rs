// 服务端映射：解析项目和版本，把扫描位置关联到版本

use super::{CatalogClient, CatalogRecord, Mapping, ProjectIdentity, VersionIdentity};
use crate::error::{CoreError, EntityKind, Result};
use crate::scanner::ScanTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How version names are compared. Project names are always exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatching {
    #[default]
    Exact,
    /// Case-insensitive equality, then substring.
    Tolerant,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub grace_period: Duration,
    pub name_matching: NameMatching,
    pub project_id_override: Option<String>,
    /// Remove mappings of the resolved locations to other versions.
    pub unmap_previous: bool,
    /// Host name the scan locations were registered under.
    pub host: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            name_matching: NameMatching::Exact,
            project_id_override: None,
            unmap_previous: false,
            host: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub project: ProjectIdentity,
    pub version: VersionIdentity,
    pub mapping: Mapping,
    /// Ids sent in this run; empty when everything was mapped before.
    pub submitted: Vec<String>,
    pub already_mapped: Vec<String>,
    /// `(version id, scan location id)` pairs removed before mapping.
    pub unmapped: Vec<(String, String)>,
    pub unresolved: Vec<ScanTarget>,
}

pub struct ServerReconciler {
    client: Arc<dyn CatalogClient>,
    options: ReconcileOptions,
}

impl ServerReconciler {
    pub fn new(client: Arc<dyn CatalogClient>, options: ReconcileOptions) -> Self {
        Self { client, options }
    }

    pub async fn reconcile(
        &self,
        project_name: &str,
        version_name: &str,
        targets: &[ScanTarget],
    ) -> Result<ReconcileReport> {
        let project = self.resolve_project(project_name).await?;
        let project_id = non_empty_id(&project.id, EntityKind::Project, &project.name)?;

        let version = self.resolve_version(&project_id, version_name).await?;
        let version_id = non_empty_id(&version.id, EntityKind::Version, &version.name)?;

        // 服务端异步建立索引，只等待一次
        if !self.options.grace_period.is_zero() {
            debug!("Waiting {:?} for the server to index new scans", self.options.grace_period);
            tokio::time::sleep(self.options.grace_period).await;
        }

        let locations = self
            .client
            .find_scan_locations(&self.options.host, targets, &version_id)
            .await?;

        let mut mapping = Mapping {
            version_id: version_id.clone(),
            scan_location_ids: BTreeSet::new(),
        };
        let mut pending: Vec<String> = Vec::new();
        let mut already_mapped: Vec<String> = Vec::new();
        let mut stale: Vec<(String, String)> = Vec::new();
        let mut unresolved = Vec::new();

        for target in targets {
            let Some(location) = locations.get(target) else {
                warn!("Could not find the scan location for target '{}'", target);
                unresolved.push(target.clone());
                continue;
            };
            if !mapping.scan_location_ids.insert(location.id.clone()) {
                continue;
            }
            if self.options.unmap_previous {
                for other in location.mapped_version_ids.iter().filter(|id| **id != version_id) {
                    stale.push((other.clone(), location.id.clone()));
                }
            }
            if location.already_mapped {
                debug!("Scan location {} is already mapped to version {}", location.id, version_id);
                already_mapped.push(location.id.clone());
            } else {
                pending.push(location.id.clone());
            }
        }

        for (other_version, location_id) in &stale {
            info!("Unmapping scan location {} from version {}", location_id, other_version);
            self.client.remove_mapping(other_version, location_id).await?;
        }

        if !pending.is_empty() {
            info!(
                "Mapping {} scan location(s) to project '{}' version '{}'",
                pending.len(),
                project.name,
                version.name
            );
            self.client.apply_mapping(&version_id, &pending).await?;
        } else if !mapping.scan_location_ids.is_empty() {
            info!("All scan locations are already mapped to version '{}'", version.name);
        }

        Ok(ReconcileReport {
            project,
            version,
            mapping,
            submitted: pending,
            already_mapped,
            unmapped: stale,
            unresolved,
        })
    }

    /// Exact name match over distinct ids; the id override skips the lookup.
    pub async fn resolve_project(&self, name: &str) -> Result<ProjectIdentity> {
        if let Some(id) = self.options.project_id_override.as_deref().map(str::trim) {
            if !id.is_empty() {
                debug!("Using configured project id {} for '{}'", id, name);
                return Ok(ProjectIdentity {
                    name: name.to_string(),
                    id: Some(id.to_string()),
                });
            }
        }

        let candidates = self.client.find_projects_by_name(name).await?;
        let exact: Vec<&CatalogRecord> = candidates.iter().filter(|p| p.name == name).collect();
        let record = single_match(exact, EntityKind::Project, name)?;
        Ok(ProjectIdentity {
            name: record.name.clone(),
            id: Some(record.id.clone()),
        })
    }

    pub async fn resolve_version(&self, project_id: &str, name: &str) -> Result<VersionIdentity> {
        let versions = self.client.find_versions_by_project(project_id).await?;

        let mut matches: Vec<&CatalogRecord> = versions.iter().filter(|v| v.name == name).collect();
        if matches.is_empty() && self.options.name_matching == NameMatching::Tolerant {
            let wanted = name.to_lowercase();
            matches = versions.iter().filter(|v| v.name.to_lowercase() == wanted).collect();
            if matches.is_empty() {
                matches = versions
                    .iter()
                    .filter(|v| v.name.to_lowercase().contains(&wanted))
                    .collect();
            }
        }

        let record = single_match(matches, EntityKind::Version, name)?;
        Ok(VersionIdentity {
            name: record.name.clone(),
            id: Some(record.id.clone()),
            project_id: project_id.to_string(),
        })
    }
}

fn single_match<'a>(
    matches: Vec<&'a CatalogRecord>,
    kind: EntityKind,
    name: &str,
) -> Result<&'a CatalogRecord> {
    let ids: BTreeSet<&str> = matches.iter().map(|r| r.id.as_str()).collect();
    match ids.len() {
        0 => Err(CoreError::not_found(kind, name)),
        1 => Ok(matches[0]),
        count => Err(CoreError::AmbiguousMatch {
            kind,
            name: name.to_string(),
            count,
        }),
    }
}

fn non_empty_id(id: &Option<String>, kind: EntityKind, name: &str) -> Result<String> {
    id.as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::not_found(kind, name))
}
