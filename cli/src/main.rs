use anyhow::{Context, Result};
use buildscan_core::{
    apply_env_overrides, load_settings, LocalNode, Outcome, ProjectSettings, ScanManager,
    ScanReport,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs the configured scans for a finished build and maps them to the
/// project version on the server.
#[derive(Parser, Debug)]
#[command(name = "buildscan", version, about)]
struct Args {
    /// Settings file (YAML)
    #[arg(short, long, default_value = "buildscan.yaml")]
    config: PathBuf,

    /// Workspace root; scan targets are resolved inside it
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Result of the build so far: success, unstable or failure
    #[arg(long, default_value = "success")]
    build_result: Outcome,

    /// Pass --dryRun to the scan CLI and skip the server mapping
    #[arg(long)]
    dry_run: bool,

    /// Project name, overrides the settings file
    #[arg(long)]
    project: Option<String>,

    /// Version name, overrides the settings file
    #[arg(long)]
    version_name: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn exit_code(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Success => 0,
        Outcome::Failure => 1,
        Outcome::Unstable => 2,
    }
}

fn print_report(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("Failed to serialize the report")?;
        println!("{}", text);
    } else {
        for line in &report.messages {
            println!("{}", line);
        }
        println!("Build scan result: {}", report.outcome);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildscan=info,buildscan_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut settings = match load_settings(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{:#}", e);
            return Ok(ExitCode::from(exit_code(Outcome::Unstable)));
        }
    };

    let env: BTreeMap<String, String> = std::env::vars().collect();
    apply_env_overrides(&mut settings, &env);

    if args.dry_run {
        settings.scan.dry_run = true;
    }
    if args.project.is_some() || args.version_name.is_some() {
        let project = settings.scan.project.get_or_insert_with(ProjectSettings::default);
        if let Some(name) = args.project {
            project.name = name;
        }
        if let Some(version) = args.version_name {
            project.version = version;
        }
    }

    tracing::info!("Scanning workspace {}", args.workspace.display());
    let manager = ScanManager::new(settings, Arc::new(LocalNode::new()));
    let report = manager.run(&args.workspace, args.build_result, &env).await;

    print_report(&report, args.json)?;
    Ok(ExitCode::from(exit_code(report.outcome)))
}
