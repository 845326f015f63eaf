// Scanner module - 扫描器模块
// 定义扫描任务、扫描目标以及外部扫描进程的调用与结果判定

pub mod command;
pub mod logs;
pub mod manager;
pub mod tool;

use crate::config::model::ServerSettings;
use crate::error::{CoreError, Result};
use crate::node::{NodeCapability, ProcessSpec};
use command::ScanCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tool::ScanTool;
use tracing::{debug, info, warn};

/// 输出中同时出现这两个标记才算扫描成功
pub const FINISHED_MARKER: &str = "Finished";
pub const SUCCESS_MARKER: &str = "with status SUCCESS";
/// 任何位置出现即判定失败，优先级高于成功标记
pub const ERROR_MARKER: &str = "ERROR";

/// 用户声明的扫描任务
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

impl ScanJob {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            exclusions: Vec::new(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: Vec<String>) -> Self {
        self.exclusions = exclusions;
        self
    }
}

/// A canonical path inside the workspace. Obtain these from `TargetResolver`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanTarget {
    absolute_path: PathBuf,
}

impl ScanTarget {
    pub fn new(absolute_path: PathBuf) -> Self {
        Self { absolute_path }
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    /// Last path component, used to find the tool's log file.
    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.absolute_path.display())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanInvocationResult {
    pub exit_output: String,
    pub exit_code: Option<i32>,
    pub succeeded: bool,
    pub per_target_log_file: BTreeMap<ScanTarget, Option<PathBuf>>,
}

/// Text-marker classification. The exit code is deliberately not consulted.
pub fn scan_succeeded(output: &str) -> bool {
    output.contains(FINISHED_MARKER)
        && output.contains(SUCCESS_MARKER)
        && !output.contains(ERROR_MARKER)
}

/// Everything one invocation of the scan CLI needs.
pub struct ScanRequest<'a> {
    pub tool: &'a ScanTool,
    pub targets: &'a [ScanTarget],
    pub server: &'a ServerSettings,
    pub memory_mb: u32,
    pub dry_run: bool,
    pub exclusions: &'a [String],
    /// Passed as `--name`; the server names the scan location after it.
    pub code_location_name: Option<&'a str>,
    pub env: &'a BTreeMap<String, String>,
}

pub struct ProcessRunner {
    node: Arc<dyn NodeCapability>,
}

impl ProcessRunner {
    pub fn new(node: Arc<dyn NodeCapability>) -> Self {
        Self { node }
    }

    /// Launches the scan CLI once for all targets and waits for it to exit.
    pub async fn run(&self, request: &ScanRequest<'_>) -> Result<ScanInvocationResult> {
        // 参数校验在启动进程之前完成
        let command = ScanCommand::build(request)?;
        info!("Running scan on {}: {}", self.node.name(), command.masked());

        let spec = ProcessSpec {
            argv: command.into_argv(),
            env: request.env.clone(),
            working_dir: None,
        };

        let output = self.node.run_process(&spec).await.map_err(|e| {
            CoreError::ToolMissing(format!(
                "Could not launch the scan CLI '{}': {}",
                request.tool.cli.display(),
                e
            ))
        })?;
        debug!("Scan CLI exited with code {:?}", output.exit_code);

        let succeeded = scan_succeeded(&output.output);
        if !succeeded {
            warn!("Scan CLI output did not report success");
        }

        Ok(ScanInvocationResult {
            exit_output: output.output,
            exit_code: output.exit_code,
            succeeded,
            per_target_log_file: request.targets.iter().map(|t| (t.clone(), None)).collect(),
        })
    }
}
