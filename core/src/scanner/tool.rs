// 扫描工具定位：Java 启动器与 scan.cli jar

use crate::config::model::ToolSettings;
use crate::error::{CoreError, Result};
use crate::node::NodeCapability;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const CLI_PREFIX: &str = "scan.cli";
const CLI_EXTENSION: &str = ".jar";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTool {
    /// Java executable
    pub launcher: PathBuf,
    pub cli: PathBuf,
}

impl ScanTool {
    /// Directory holding the CLI jar; the tool writes its log folder here.
    pub fn install_dir(&self) -> Option<&Path> {
        self.cli.parent()
    }
}

pub struct ToolLocator {
    node: Arc<dyn NodeCapability>,
}

impl ToolLocator {
    pub fn new(node: Arc<dyn NodeCapability>) -> Self {
        Self { node }
    }

    pub async fn locate(
        &self,
        settings: &ToolSettings,
        env: &BTreeMap<String, String>,
    ) -> Result<ScanTool> {
        let launcher = self.locate_launcher(settings, env).await?;
        let cli = self.locate_cli(settings).await?;
        debug!("Using this scan CLI at : {}", cli.display());
        Ok(ScanTool { launcher, cli })
    }

    async fn locate_launcher(
        &self,
        settings: &ToolSettings,
        env: &BTreeMap<String, String>,
    ) -> Result<PathBuf> {
        let java_home = match settings.java_home.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            Some(home) => home.clone(),
            None => {
                debug!("No Java installation configured, checking the JAVA_HOME variable.");
                env.get("JAVA_HOME")
                    .filter(|home| !home.trim().is_empty())
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        CoreError::Configuration(
                            "Need to define a JAVA_HOME or select an installed JDK.".to_string(),
                        )
                    })?
            }
        };

        if !self.node.exists(&java_home).await {
            return Err(CoreError::Configuration(format!(
                "Could not find the specified Java installation at: {}",
                java_home.display()
            )));
        }

        let executable = if cfg!(windows) { "java.exe" } else { "java" };
        Ok(java_home.join("bin").join(executable))
    }

    async fn locate_cli(&self, settings: &ToolSettings) -> Result<PathBuf> {
        if settings.home.as_os_str().is_empty() {
            return Err(CoreError::ToolMissing(
                "Could not find a scan tool installation to use.".to_string(),
            ));
        }
        let missing = || {
            CoreError::ToolMissing(format!(
                "Could not find the CLI file to execute at : '{}'",
                settings.home.display()
            ))
        };

        let entries = self
            .node
            .list_directory(&settings.home.join("lib"))
            .await
            .map_err(|_| missing())?;

        entries
            .into_iter()
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(CLI_PREFIX) && name.ends_with(CLI_EXTENSION))
                    .unwrap_or(false)
            })
            .ok_or_else(missing)
    }
}
