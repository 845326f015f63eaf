// Resolver module - 扫描目标解析
// 把用户配置的扫描路径转换为工作区内的绝对路径，禁止逃逸出工作区

use crate::error::{CoreError, EntityKind, Result};
use crate::node::NodeCapability;
use crate::scanner::{ScanJob, ScanTarget};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct TargetResolver {
    node: Arc<dyn NodeCapability>,
}

impl TargetResolver {
    pub fn new(node: Arc<dyn NodeCapability>) -> Self {
        Self { node }
    }

    /// Resolves every job to a canonical path inside `workspace_root`, in
    /// declaration order. Duplicate targets are kept once.
    pub async fn resolve(
        &self,
        workspace_root: &Path,
        jobs: &[ScanJob],
    ) -> Result<Vec<ScanTarget>> {
        let root = self
            .node
            .canonicalize(workspace_root)
            .await
            .map_err(|_| {
                CoreError::not_found(EntityKind::Path, workspace_root.display().to_string())
            })?;
        debug!("Node workspace {}", root.display());

        let mut targets: Vec<ScanTarget> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let target = self.resolve_job(&root, job).await?;
            if targets.contains(&target) {
                debug!("Skipping duplicate scan target {}", target);
                continue;
            }
            targets.push(target);
        }
        Ok(targets)
    }

    async fn resolve_job(&self, root: &Path, job: &ScanJob) -> Result<ScanTarget> {
        let relative = trim_job_target(job.target.as_deref().unwrap_or(""));
        if relative.is_empty() {
            return Ok(ScanTarget::new(root.to_path_buf()));
        }

        let joined = join_under(root, relative);
        let canonical = match self.node.canonicalize(&joined).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // 路径不存在时先做词法归一化，确保 `../x` 仍然报告为越界
                let lexical = lexical_normalize(&joined);
                ensure_confined(root, &lexical)?;
                return Err(CoreError::not_found(EntityKind::Path, lexical.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        ensure_confined(root, &canonical)?;

        if !self.node.exists(&canonical).await {
            return Err(CoreError::not_found(EntityKind::Path, canonical.display().to_string()));
        }
        debug!("Scan target exists at : {}", canonical.display());

        Ok(ScanTarget::new(canonical))
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Trims whitespace and at most one leading and one trailing separator.
pub(crate) fn trim_job_target(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(is_separator).unwrap_or(trimmed);
    trimmed.strip_suffix(is_separator).unwrap_or(trimmed)
}

/// Appends `relative` to `root` one component at a time. `Path::join` would
/// replace the root when `relative` still starts with a separator.
fn join_under(root: &Path, relative: &str) -> PathBuf {
    let mut joined = root.to_path_buf();
    for part in relative.split(is_separator) {
        if !part.is_empty() {
            joined.push(part);
        }
    }
    joined
}

fn ensure_confined(root: &Path, candidate: &Path) -> Result<()> {
    // Path::starts_with 按路径组件比较，`/ws-other` 不算 `/ws` 的子路径
    if candidate.starts_with(root) {
        Ok(())
    } else {
        Err(CoreError::PathTraversal(candidate.to_path_buf()))
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
