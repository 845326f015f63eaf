use super::logs::LogCorrelator;
use super::tool::ToolLocator;
use super::{ProcessRunner, ScanInvocationResult, ScanRequest, ScanTarget};
use crate::catalog::http::RestCatalogClient;
use crate::catalog::reconciler::{ReconcileOptions, ReconcileReport, ServerReconciler};
use crate::catalog::{CatalogClient, PolicyOverallStatus};
use crate::classify::{ErrorClassifier, Outcome};
use crate::config::model::{FailureConditions, ProjectSettings, ScanSettings};
use crate::error::{CoreError, Result};
use crate::node::NodeCapability;
use crate::resolver::TargetResolver;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Result of one orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub outcome: Outcome,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation: Option<ScanInvocationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconcileReport>,
}

impl ScanReport {
    fn new() -> Self {
        Self {
            outcome: Outcome::Success,
            messages: Vec::new(),
            invocation: None,
            reconciliation: None,
        }
    }

    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.messages.push(message);
    }

    fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.messages.push(message);
    }

    fn degrade(&mut self, outcome: Outcome, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.messages.push(message);
        self.outcome = self.outcome.worst(outcome);
    }

    fn record_error(&mut self, err: &CoreError) {
        let (outcome, message) = ErrorClassifier::classify(err);
        error!("{}", message);
        self.messages.push(message);
        self.outcome = self.outcome.worst(outcome);
    }
}

/// Drives target resolution, the scan CLI, log lookup and the catalog
/// mapping for one build.
pub struct ScanManager {
    settings: ScanSettings,
    node: Arc<dyn NodeCapability>,
    catalog: Option<Arc<dyn CatalogClient>>,
}

impl ScanManager {
    pub fn new(settings: ScanSettings, node: Arc<dyn NodeCapability>) -> Self {
        Self {
            settings,
            node,
            catalog: None,
        }
    }

    /// Uses `catalog` instead of connecting to the configured server.
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Never fails: every error ends up as a line in the report and a
    /// degraded outcome.
    pub async fn run(
        &self,
        workspace: &Path,
        upstream: Outcome,
        env: &BTreeMap<String, String>,
    ) -> ScanReport {
        let mut report = ScanReport::new();

        if upstream != Outcome::Success {
            report.outcome = upstream;
            report.note("Build was not successful. Will not run scans.");
            return report;
        }
        report.note("Starting build scans...");

        let targets = match self.scan(workspace, env, &mut report).await {
            Ok(targets) => targets,
            Err(e) => {
                report.record_error(&e);
                report.note("Finished running build scans.");
                return report;
            }
        };

        let dry_run = self.settings.scan.dry_run;
        let mut catalog = None;
        if let Some(project) = self.settings.scan.configured_project() {
            if dry_run {
                report.note(format!(
                    "Dry run: scans are not mapped to project '{}' version '{}'.",
                    project.name, project.version
                ));
            } else {
                match self.connect().await {
                    Ok(client) => {
                        match self.reconcile(client.clone(), project, &targets).await {
                            Ok(reconciled) => {
                                describe_reconciliation(&reconciled, &mut report);
                                report.reconciliation = Some(reconciled);
                            }
                            Err(e) => report.record_error(&e),
                        }
                        catalog = Some(client);
                    }
                    Err(e) => report.record_error(&e),
                }
            }
        }

        if let Some(conditions) = &self.settings.failure_conditions {
            self.check_failure_conditions(conditions, catalog, &mut report).await;
        }

        report.note("Finished running build scans.");
        report
    }

    async fn scan(
        &self,
        workspace: &Path,
        env: &BTreeMap<String, String>,
        report: &mut ScanReport,
    ) -> Result<Vec<ScanTarget>> {
        self.settings.validate()?;

        let targets = TargetResolver::new(self.node.clone())
            .resolve(workspace, &self.settings.scan.jobs)
            .await?;
        let tool = ToolLocator::new(self.node.clone())
            .locate(&self.settings.tool, env)
            .await?;

        let exclusions = self.settings.scan.exclusion_patterns();
        let request = ScanRequest {
            tool: &tool,
            targets: &targets,
            server: &self.settings.server,
            memory_mb: self.settings.tool.memory_mb,
            dry_run: self.settings.scan.dry_run,
            exclusions: &exclusions,
            code_location_name: self.settings.scan.code_location_name.as_deref(),
            env,
        };
        let mut invocation = ProcessRunner::new(self.node.clone()).run(&request).await?;

        // 日志查找只用于提示，找不到不影响结果
        let host = self.host_identifier();
        let correlator = LogCorrelator::new(self.node.clone());
        let log_directory = correlator.find_log_directory(&tool).await;
        for target in &targets {
            let log = match &log_directory {
                Some(dir) => correlator.find_latest_log(dir, &target.file_name(), &host).await,
                None => None,
            };
            match &log {
                Some(path) => report.note(format!(
                    "For scan target : '{}', you can view the scan CLI logs at : '{}'",
                    target,
                    path.display()
                )),
                None => report.note(format!(
                    "For scan target : '{}', could not find the log file!",
                    target
                )),
            }
            invocation.per_target_log_file.insert(target.clone(), log);
        }

        if !invocation.succeeded {
            report.degrade(Outcome::Unstable, "The scan did not complete successfully.");
        }
        report.invocation = Some(invocation);
        Ok(targets)
    }

    async fn connect(&self) -> Result<Arc<dyn CatalogClient>> {
        if let Some(catalog) = &self.catalog {
            return Ok(catalog.clone());
        }
        let client = RestCatalogClient::connect(&self.settings.server).await?;
        Ok(Arc::new(client))
    }

    async fn reconcile(
        &self,
        client: Arc<dyn CatalogClient>,
        project: &ProjectSettings,
        targets: &[ScanTarget],
    ) -> Result<ReconcileReport> {
        let options = ReconcileOptions {
            grace_period: Duration::from_secs(self.settings.scan.index_grace_secs),
            name_matching: project.name_matching,
            project_id_override: project.project_id.clone(),
            unmap_previous: project.unmap_previous,
            host: self.host_identifier(),
        };
        ServerReconciler::new(client, options)
            .reconcile(project.name.trim(), project.version.trim(), targets)
            .await
    }

    async fn check_failure_conditions(
        &self,
        conditions: &FailureConditions,
        catalog: Option<Arc<dyn CatalogClient>>,
        report: &mut ScanReport,
    ) {
        if !conditions.fail_on_policy_violation {
            report.record_error(&CoreError::Configuration(
                "Failure conditions are configured but none is enabled.".to_string(),
            ));
            return;
        }
        if self.settings.scan.dry_run {
            report.warning("Will not check failure conditions during a dry run.");
            return;
        }

        let version_id = report
            .reconciliation
            .as_ref()
            .map(|r| r.mapping.version_id.clone())
            .filter(|id| !id.is_empty());
        let (Some(catalog), Some(version_id)) = (catalog, version_id) else {
            report.record_error(&CoreError::Configuration(
                "Could not check failure conditions: no project version was mapped.".to_string(),
            ));
            return;
        };

        match catalog.policy_status(&version_id).await {
            Ok(Some(status)) => {
                for count in &status.component_version_status_counts {
                    info!("Policy status {:?}: {} component(s)", count.name, count.value);
                }
                if status.overall_status == PolicyOverallStatus::InViolation {
                    report.degrade(
                        conditions.outcome_on_violation,
                        format!(
                            "The project version is in violation of policy ({} component(s)).",
                            status.count(PolicyOverallStatus::InViolation)
                        ),
                    );
                } else {
                    report.note("The project version is not in violation of any policy.");
                }
            }
            Ok(None) => report.warning(format!(
                "Could not find the policy status for version {}.",
                version_id
            )),
            Err(e) => report.record_error(&e),
        }
    }

    fn host_identifier(&self) -> String {
        self.settings
            .scan
            .host_identifier
            .clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| self.node.host_name())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

fn describe_reconciliation(reconciled: &ReconcileReport, report: &mut ScanReport) {
    for target in &reconciled.unresolved {
        report.warning(format!("Could not find the scan location for target '{}'.", target));
    }
    report.note(format!(
        "Mapped {} new and {} existing scan location(s) to project '{}' version '{}'.",
        reconciled.submitted.len(),
        reconciled.already_mapped.len(),
        reconciled.project.name,
        reconciled.version.name
    ));
}
