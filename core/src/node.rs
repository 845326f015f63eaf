// Node module - 执行节点能力接口
// 所有文件系统与进程操作都经过这个接口
// 编排逻辑不关心实际运行在哪台机器上

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// A command line to launch on a node. `argv[0]` is the program.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

/// Capabilities the orchestration needs from the machine the build runs on.
#[async_trait]
pub trait NodeCapability: Send + Sync {
    fn name(&self) -> String;

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    async fn exists(&self, path: &Path) -> bool;

    /// Entries of a directory, sorted by path.
    async fn list_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Runs to completion and returns the merged output.
    async fn run_process(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput>;

    fn host_name(&self) -> Option<String>;
}

/// The machine this process runs on.
#[derive(Debug, Clone, Default)]
pub struct LocalNode;

impl LocalNode {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeCapability for LocalNode {
    fn name(&self) -> String {
        "local".to_string()
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::canonicalize(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    async fn run_process(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut command = Command::new(program);
        command.args(args).envs(&spec.env).stdin(Stdio::null());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            output: text,
        })
    }

    fn host_name(&self) -> Option<String> {
        sysinfo::System::host_name()
    }
}
