mod common;

use buildscan_core::error::{CoreError, EntityKind};
use buildscan_core::{CatalogRecord, NameMatching, ReconcileOptions, ScanTarget, ServerReconciler};
use common::FakeCatalog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn options() -> ReconcileOptions {
    ReconcileOptions {
        grace_period: Duration::ZERO,
        host: "ci-host".to_string(),
        ..Default::default()
    }
}

fn target(path: &str) -> ScanTarget {
    ScanTarget::new(PathBuf::from(path))
}

#[tokio::test]
async fn maps_new_scan_locations_to_version() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");
    catalog.add_location(Path::new("/ws/lib"), "loc-2");

    let reconciler = ServerReconciler::new(catalog.clone(), options());
    let report = reconciler
        .reconcile("demo", "1.0", &[target("/ws/src"), target("/ws/lib")])
        .await
        .unwrap();

    assert_eq!(report.project.id.as_deref(), Some("p1"));
    assert_eq!(report.version.id.as_deref(), Some("v1"));
    assert_eq!(report.submitted, vec!["loc-1", "loc-2"]);
    assert!(report.unresolved.is_empty());
    assert_eq!(
        catalog.submissions(),
        vec![("v1".to_string(), vec!["loc-1".to_string(), "loc-2".to_string()])]
    );
    assert_eq!(catalog.state.lock().unwrap().location_queries, vec!["ci-host"]);
}

#[tokio::test]
async fn second_run_submits_nothing_and_keeps_mapping() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");
    let reconciler = ServerReconciler::new(catalog.clone(), options());
    let targets = [target("/ws/src")];

    let first = reconciler.reconcile("demo", "1.0", &targets).await.unwrap();
    let after_first = catalog.mapped("v1");
    let second = reconciler.reconcile("demo", "1.0", &targets).await.unwrap();

    assert_eq!(first.mapping, second.mapping);
    assert_eq!(catalog.mapped("v1"), after_first);
    assert!(second.submitted.is_empty());
    assert_eq!(second.already_mapped, vec!["loc-1"]);
    assert_eq!(catalog.submissions().len(), 1);
}

#[tokio::test]
async fn duplicate_project_names_are_ambiguous() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog
        .state
        .lock()
        .unwrap()
        .projects
        .push(CatalogRecord::new("p2", "demo"));

    let reconciler = ServerReconciler::new(catalog.clone(), options());
    let err = reconciler.reconcile("demo", "1.0", &[target("/ws/src")]).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::AmbiguousMatch { kind: EntityKind::Project, count: 2, .. }
    ));
    assert!(catalog.submissions().is_empty());
}

#[tokio::test]
async fn project_id_override_skips_name_lookup() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog
        .state
        .lock()
        .unwrap()
        .projects
        .push(CatalogRecord::new("p2", "demo"));
    catalog.add_location(Path::new("/ws/src"), "loc-1");

    let reconciler = ServerReconciler::new(
        catalog.clone(),
        ReconcileOptions {
            project_id_override: Some("p1".to_string()),
            ..options()
        },
    );
    let report = reconciler.reconcile("demo", "1.0", &[target("/ws/src")]).await.unwrap();
    assert_eq!(report.project.id.as_deref(), Some("p1"));
    assert_eq!(report.submitted, vec!["loc-1"]);
}

#[tokio::test]
async fn missing_project_and_version_are_not_found() {
    let catalog = Arc::new(FakeCatalog::demo());
    let reconciler = ServerReconciler::new(catalog.clone(), options());

    let err = reconciler.reconcile("dem", "1.0", &[target("/ws/src")]).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotFound { kind: EntityKind::Project, ref name } if name == "dem"
    ));

    let err = reconciler.reconcile("demo", "3.0", &[target("/ws/src")]).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotFound { kind: EntityKind::Version, ref name } if name == "3.0"
    ));
}

#[tokio::test]
async fn tolerant_matching_finds_version_by_substring() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");

    let exact = ServerReconciler::new(catalog.clone(), options());
    assert!(exact.resolve_version("p1", "2.0-snapshot").await.is_err());

    let tolerant = ServerReconciler::new(
        catalog.clone(),
        ReconcileOptions {
            name_matching: NameMatching::Tolerant,
            ..options()
        },
    );
    let by_case = tolerant.resolve_version("p1", "2.0-snapshot").await.unwrap();
    assert_eq!(by_case.id.as_deref(), Some("v2"));
    let by_substring = tolerant.resolve_version("p1", "2.0").await.unwrap();
    assert_eq!(by_substring.id.as_deref(), Some("v2"));

    // "0" 同时出现在两个版本名中
    let err = tolerant.resolve_version("p1", "0").await.unwrap_err();
    assert!(matches!(err, CoreError::AmbiguousMatch { kind: EntityKind::Version, .. }));
}

#[tokio::test]
async fn unresolved_target_does_not_abort_batch() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");

    let reconciler = ServerReconciler::new(catalog.clone(), options());
    let report = reconciler
        .reconcile("demo", "1.0", &[target("/ws/src"), target("/ws/docs")])
        .await
        .unwrap();

    assert_eq!(report.unresolved, vec![target("/ws/docs")]);
    assert_eq!(report.submitted, vec!["loc-1"]);
}

#[tokio::test]
async fn locations_mapped_elsewhere_are_skipped() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");
    catalog.add_location(Path::new("/ws/lib"), "loc-2");
    catalog.map_existing("v1", "loc-2");

    let reconciler = ServerReconciler::new(catalog.clone(), options());
    let report = reconciler
        .reconcile("demo", "1.0", &[target("/ws/src"), target("/ws/lib")])
        .await
        .unwrap();

    assert_eq!(report.submitted, vec!["loc-1"]);
    assert_eq!(report.already_mapped, vec!["loc-2"]);
    assert_eq!(report.mapping.scan_location_ids.len(), 2);
}

#[tokio::test]
async fn grace_period_is_waited_once() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");
    let reconciler = ServerReconciler::new(
        catalog,
        ReconcileOptions {
            grace_period: Duration::from_millis(50),
            ..options()
        },
    );

    let started = std::time::Instant::now();
    reconciler.reconcile("demo", "1.0", &[target("/ws/src")]).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn previous_version_mappings_are_removed_when_asked() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");
    catalog.map_existing("v2", "loc-1");

    let reconciler = ServerReconciler::new(
        catalog.clone(),
        ReconcileOptions {
            unmap_previous: true,
            ..options()
        },
    );
    let report = reconciler.reconcile("demo", "1.0", &[target("/ws/src")]).await.unwrap();

    assert_eq!(report.unmapped, vec![("v2".to_string(), "loc-1".to_string())]);
    assert_eq!(report.submitted, vec!["loc-1"]);
    assert!(catalog.mapped("v2").is_empty());
    assert!(catalog.mapped("v1").contains("loc-1"));
}

#[tokio::test]
async fn previous_version_mappings_are_kept_by_default() {
    let catalog = Arc::new(FakeCatalog::demo());
    catalog.add_location(Path::new("/ws/src"), "loc-1");
    catalog.map_existing("v2", "loc-1");

    let reconciler = ServerReconciler::new(catalog.clone(), options());
    let report = reconciler.reconcile("demo", "1.0", &[target("/ws/src")]).await.unwrap();

    assert!(report.unmapped.is_empty());
    assert!(catalog.state.lock().unwrap().removals.is_empty());
    assert!(catalog.mapped("v2").contains("loc-1"));
    assert!(catalog.mapped("v1").contains("loc-1"));
}
