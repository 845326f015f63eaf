// 扫描日志关联
// 日志文件命名: <host>-<target>-<yyyy-MM-dd'T'HHmmss.SSS><时区与扩展名>

use super::tool::ScanTool;
use crate::node::NodeCapability;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%.3f";
/// Length of the `-0400.log` tail after the timestamp.
pub const LOG_SUFFIX_LEN: usize = 9;

pub struct LogCorrelator {
    node: Arc<dyn NodeCapability>,
}

impl LogCorrelator {
    pub fn new(node: Arc<dyn NodeCapability>) -> Self {
        Self { node }
    }

    /// The entry next to the CLI jar whose name contains `log`.
    pub async fn find_log_directory(&self, tool: &ScanTool) -> Option<PathBuf> {
        let install_dir = tool.install_dir()?;
        let entries = match self.node.list_directory(install_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Could not list {}: {}", install_dir.display(), e);
                return None;
            }
        };
        entries.into_iter().filter(|path| file_name(path).contains("log")).last()
    }

    /// Best-effort; returns `None` instead of failing.
    pub async fn find_latest_log(
        &self,
        log_directory: &Path,
        target_file_name: &str,
        host: &str,
    ) -> Option<PathBuf> {
        match self.node.list_directory(log_directory).await {
            Ok(entries) => select_latest_log(entries, target_file_name, host),
            Err(e) => {
                debug!("Could not list log directory {}: {}", log_directory.display(), e);
                None
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Picks the candidate with the latest embedded timestamp. Ties go to the
/// greater file name so the answer does not depend on listing order.
pub fn select_latest_log<I>(candidates: I, target_file_name: &str, host: &str) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    candidates
        .into_iter()
        .filter_map(|path| {
            let name = file_name(&path);
            let stamp = parse_log_timestamp(&name, target_file_name, host)?;
            Some((stamp, name, path))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, _, path)| path)
}

/// `None` when the name is not a log of this target on this host, or when the
/// timestamp does not parse.
pub fn parse_log_timestamp(
    name: &str,
    target_file_name: &str,
    host: &str,
) -> Option<NaiveDateTime> {
    if target_file_name.is_empty() || !name.contains(target_file_name) || !name.contains(host) {
        return None;
    }

    let stripped = name.replace(&format!("{}-{}-", host, target_file_name), "");
    let end = stripped.len().checked_sub(LOG_SUFFIX_LEN)?;
    let stamp = stripped.get(..end)?;

    match NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT) {
        Ok(time) => Some(time),
        Err(e) => {
            debug!("Skipping log file {} with unreadable timestamp: {}", name, e);
            None
        }
    }
}
