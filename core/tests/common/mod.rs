#![allow(dead_code)]

use async_trait::async_trait;
use buildscan_core::error::Result;
use buildscan_core::{
    CatalogClient, CatalogRecord, Credentials, LocalNode, NodeCapability, PolicyStatus,
    ProcessOutput, ProcessSpec, ProjectSettings, ScanJob, ScanLocation, ScanOptions, ScanSettings,
    ScanTarget, ServerSettings, ToolSettings,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

pub const HOST: &str = "ci-host";
pub const SUCCESS_OUTPUT: &str = "Starting scan\nFinished in 3s with status SUCCESS\n";

/// Real file system, scripted scan CLI.
pub struct ScriptedNode {
    inner: LocalNode,
    output: String,
    launched: Mutex<Vec<Vec<String>>>,
}

impl ScriptedNode {
    pub fn new(output: &str) -> Self {
        Self {
            inner: LocalNode::new(),
            output: output.to_string(),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<Vec<String>> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeCapability for ScriptedNode {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.canonicalize(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }

    async fn list_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list_directory(path).await
    }

    async fn run_process(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput> {
        self.launched.lock().unwrap().push(spec.argv.clone());
        Ok(ProcessOutput {
            exit_code: Some(0),
            output: self.output.clone(),
        })
    }

    fn host_name(&self) -> Option<String> {
        Some("unused-host".to_string())
    }
}

#[derive(Default)]
pub struct CatalogState {
    pub projects: Vec<CatalogRecord>,
    pub versions: BTreeMap<String, Vec<CatalogRecord>>,
    /// target path -> scan location id
    pub locations: BTreeMap<PathBuf, String>,
    /// version id -> mapped scan location ids
    pub mapped: BTreeMap<String, BTreeSet<String>>,
    pub submissions: Vec<(String, Vec<String>)>,
    pub removals: Vec<(String, String)>,
    pub policy: Option<PolicyStatus>,
    pub location_queries: Vec<String>,
}

#[derive(Default)]
pub struct FakeCatalog {
    pub state: Mutex<CatalogState>,
}

impl FakeCatalog {
    /// Project `demo` (p1) with versions `1.0` (v1) and `2.0-SNAPSHOT` (v2).
    pub fn demo() -> Self {
        let catalog = FakeCatalog::default();
        {
            let mut state = catalog.state.lock().unwrap();
            state.projects = vec![
                CatalogRecord::new("p1", "demo"),
                CatalogRecord::new("p9", "demo-tools"),
            ];
            state.versions.insert(
                "p1".to_string(),
                vec![CatalogRecord::new("v1", "1.0"), CatalogRecord::new("v2", "2.0-SNAPSHOT")],
            );
        }
        catalog
    }

    pub fn add_location(&self, path: &Path, id: &str) {
        self.state.lock().unwrap().locations.insert(path.to_path_buf(), id.to_string());
    }

    pub fn submissions(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn map_existing(&self, version_id: &str, scan_location_id: &str) {
        self.state
            .lock()
            .unwrap()
            .mapped
            .entry(version_id.to_string())
            .or_default()
            .insert(scan_location_id.to_string());
    }

    pub fn mapped(&self, version_id: &str) -> BTreeSet<String> {
        self.state.lock().unwrap().mapped.get(version_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn find_projects_by_name(&self, name: &str) -> Result<Vec<CatalogRecord>> {
        // 和服务端一样返回前缀匹配
        let state = self.state.lock().unwrap();
        Ok(state.projects.iter().filter(|p| p.name.starts_with(name)).cloned().collect())
    }

    async fn find_versions_by_project(&self, project_id: &str) -> Result<Vec<CatalogRecord>> {
        Ok(self.state.lock().unwrap().versions.get(project_id).cloned().unwrap_or_default())
    }

    async fn find_scan_locations(
        &self,
        host: &str,
        targets: &[ScanTarget],
        version_id: &str,
    ) -> Result<BTreeMap<ScanTarget, ScanLocation>> {
        let mut state = self.state.lock().unwrap();
        state.location_queries.push(host.to_string());
        Ok(targets
            .iter()
            .filter_map(|target| {
                let id = state.locations.get(target.absolute_path())?;
                let mapped_version_ids: Vec<String> = state
                    .mapped
                    .iter()
                    .filter(|(_, ids)| ids.contains(id))
                    .map(|(version, _)| version.clone())
                    .collect();
                Some((
                    target.clone(),
                    ScanLocation {
                        id: id.clone(),
                        already_mapped: mapped_version_ids.iter().any(|v| v == version_id),
                        mapped_version_ids,
                    },
                ))
            })
            .collect())
    }

    async fn apply_mapping(&self, version_id: &str, scan_location_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push((version_id.to_string(), scan_location_ids.to_vec()));
        state
            .mapped
            .entry(version_id.to_string())
            .or_default()
            .extend(scan_location_ids.iter().cloned());
        Ok(())
    }

    async fn remove_mapping(&self, version_id: &str, scan_location_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.removals.push((version_id.to_string(), scan_location_id.to_string()));
        if let Some(ids) = state.mapped.get_mut(version_id) {
            ids.remove(scan_location_id);
        }
        Ok(())
    }

    async fn policy_status(&self, _version_id: &str) -> Result<Option<PolicyStatus>> {
        Ok(self.state.lock().unwrap().policy.clone())
    }
}

/// Workspace with a `src` directory, a scan tool install with one log per
/// run, and a JDK directory.
pub struct Fixture {
    pub workspace: TempDir,
    pub tool_home: TempDir,
    pub jdk: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        fs::create_dir_all(workspace.path().join("src")).unwrap();
        fs::write(workspace.path().join("src/main.c"), "int main() { return 0; }").unwrap();

        let tool_home = tempfile::tempdir().unwrap();
        fs::create_dir_all(tool_home.path().join("lib/log")).unwrap();
        fs::write(tool_home.path().join("lib/scan.cli-4.2.0.jar"), "").unwrap();

        let jdk = tempfile::tempdir().unwrap();
        fs::create_dir_all(jdk.path().join("bin")).unwrap();

        Self { workspace, tool_home, jdk }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.tool_home.path().join("lib/log")
    }

    pub fn write_log(&self, name: &str) -> PathBuf {
        let path = self.log_dir().join(name);
        fs::write(&path, "log").unwrap();
        path
    }

    /// Canonical path of `src`, as the resolver reports it.
    pub fn src_target(&self) -> PathBuf {
        fs::canonicalize(self.workspace.path().join("src")).unwrap()
    }

    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            server: ServerSettings {
                url: "https://hub.example.com:8443".to_string(),
                credentials: Some(Credentials {
                    username: "builder".to_string(),
                    password: "s3cret".to_string(),
                }),
                ..Default::default()
            },
            tool: ToolSettings {
                name: "default".to_string(),
                home: self.tool_home.path().to_path_buf(),
                java_home: Some(self.jdk.path().to_path_buf()),
                memory_mb: 0,
            },
            scan: ScanOptions {
                jobs: vec![ScanJob::new("/src/").with_exclusions(vec!["/generated/".to_string()])],
                dry_run: false,
                project: Some(ProjectSettings {
                    name: "demo".to_string(),
                    version: "1.0".to_string(),
                    ..Default::default()
                }),
                index_grace_secs: 0,
                host_identifier: Some(HOST.to_string()),
                code_location_name: None,
            },
            failure_conditions: None,
        }
    }
}
