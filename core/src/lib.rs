// Build Scan Core Library
// 构建扫描编排核心库，包含目标解析、扫描进程、日志关联和服务端映射

mod classify;
mod config;
mod node;
mod resolver;

pub mod catalog;
pub mod scanner;

// 重新导出常用类型
pub use catalog::http::RestCatalogClient;
pub use catalog::reconciler::{NameMatching, ReconcileOptions, ReconcileReport, ServerReconciler};
pub use catalog::{
    CatalogClient, CatalogRecord, Mapping, PolicyOverallStatus, PolicyStatus, PolicyStatusCount,
    ProjectIdentity, ScanLocation, VersionIdentity,
};
pub use classify::{ErrorClassifier, Outcome};
pub use config::loader::{apply_env_overrides, load_settings};
pub use config::model::{
    Credentials, FailureConditions, ProjectSettings, ProxySettings, ScanOptions, ScanSettings,
    ServerSettings, ToolSettings,
};
pub use node::{LocalNode, NodeCapability, ProcessOutput, ProcessSpec};
pub use resolver::TargetResolver;
pub use scanner::logs::LogCorrelator;
pub use scanner::manager::{ScanManager, ScanReport};
pub use scanner::tool::{ScanTool, ToolLocator};
pub use scanner::{
    scan_succeeded, ProcessRunner, ScanInvocationResult, ScanJob, ScanRequest, ScanTarget,
};

pub mod error {
    use std::fmt;
    use std::path::PathBuf;
    use thiserror::Error;

    /// Remote or local entity named in lookup failures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum EntityKind {
        Path,
        Project,
        Version,
        ScanLocation,
    }

    impl fmt::Display for EntityKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let label = match self {
                EntityKind::Path => "Path",
                EntityKind::Project => "Project",
                EntityKind::Version => "Version",
                EntityKind::ScanLocation => "Scan location",
            };
            f.write_str(label)
        }
    }

    #[derive(Error, Debug)]
    pub enum CoreError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Parse error: {0}")]
        Parse(String),

        #[error("Configuration error: {0}")]
        Configuration(String),

        #[error("Can not scan targets outside of the workspace: '{}'", .0.display())]
        PathTraversal(PathBuf),

        #[error("{kind} could not be found: '{name}'")]
        NotFound { kind: EntityKind, name: String },

        #[error("More than one {kind} was found with the name '{name}' ({count} matches)")]
        AmbiguousMatch {
            kind: EntityKind,
            name: String,
            count: usize,
        },

        #[error("Scan tool missing: {0}")]
        ToolMissing(String),

        #[error("Service unavailable: {0}")]
        ServiceUnavailable(String),

        #[error("Transport error: {0}")]
        Transport(String),
    }

    impl CoreError {
        pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
            CoreError::NotFound {
                kind,
                name: name.into(),
            }
        }
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
