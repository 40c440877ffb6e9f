//! Schema-clone provisioning: dump, rewrite, and replay of the template.

mod common;

use helios_tenancy::adapter::{AdapterFactory, TenantAdapter};
use helios_tenancy::config::TenancyConfig;
use helios_tenancy::error::{ImportStage, TenancyError};
use helios_tenancy::session::TenantSession;
use helios_tenancy::tenant::TenantId;

use common::{FailAt, FakeDumper, TEMPLATE_MIGRATIONS, open_clone_adapter, scenario_session};

#[tokio::test]
async fn test_create_tenant_copies_structure_and_bookkeeping_rows() {
    let dumper = FakeDumper::new();
    let mut adapter = open_clone_adapter(dumper.clone()).await;

    let tenant = adapter.create_tenant("acme").await.unwrap();
    assert_eq!(tenant.as_str(), "acme");

    let session = adapter.session();
    assert_eq!(session.tables("acme"), vec!["schema_migrations", "users"]);
    assert_eq!(
        session.rows("acme", "schema_migrations").unwrap(),
        TEMPLATE_MIGRATIONS
    );
    assert!(session.rows("acme", "users").unwrap().is_empty());

    // the template itself is untouched
    assert_eq!(
        session.rows("public", "schema_migrations").unwrap(),
        TEMPLATE_MIGRATIONS
    );

    assert_eq!(
        dumper.calls(),
        vec![
            "structure public helios".to_string(),
            "rows public schema_migrations helios".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_switched_tenant_reads_its_own_bookkeeping_rows() {
    let mut adapter = open_clone_adapter(FakeDumper::new()).await;
    adapter.create_tenant("acme").await.unwrap();
    adapter.switch("acme").await.unwrap();

    let session = adapter.session_mut();
    assert_eq!(
        session.select_rows("schema_migrations").unwrap(),
        TEMPLATE_MIGRATIONS
    );

    session
        .execute("INSERT INTO schema_migrations VALUES ('20240301120000')")
        .await
        .unwrap();
    assert_eq!(session.rows("acme", "schema_migrations").unwrap().len(), 3);
    assert_eq!(
        session.rows("public", "schema_migrations").unwrap(),
        TEMPLATE_MIGRATIONS
    );
}

#[tokio::test]
async fn test_replayed_script_starts_with_tenant_search_path() {
    let mut adapter = open_clone_adapter(FakeDumper::new()).await;
    adapter.create("acme").await.unwrap();
    adapter.import_schema("acme").await.unwrap();

    let statements = adapter.session().search_path_statements();
    assert!(statements.contains(&"SET search_path TO \"acme\", \"public\""));
    assert!(
        adapter
            .session()
            .executed()
            .iter()
            .all(|s| !s.contains("set_config") && !s.contains("lock_timeout"))
    );
}

#[tokio::test]
async fn test_import_leaves_context_unchanged() {
    let mut adapter = open_clone_adapter(FakeDumper::new()).await;
    adapter.create("acme").await.unwrap();
    adapter.create("globex").await.unwrap();

    adapter.import_schema("acme").await.unwrap();
    assert!(adapter.current_tenant().is_none());
    assert_eq!(adapter.session().search_path(), ["public", "shared"]);

    adapter.switch("globex").await.unwrap();
    adapter.import_schema("acme").await.unwrap_err();
    assert_eq!(adapter.current_tenant().map(TenantId::as_str), Some("globex"));
    assert_eq!(adapter.session().search_path(), ["globex", "shared"]);
}

#[tokio::test]
async fn test_import_into_missing_schema_fails_before_dumping() {
    let dumper = FakeDumper::new();
    let mut adapter = open_clone_adapter(dumper.clone()).await;

    let err = adapter.import_schema("acme").await.unwrap_err();
    assert!(matches!(err, TenancyError::TenantNotFound { .. }));
    assert!(dumper.calls().is_empty());
}

#[tokio::test]
async fn test_import_is_not_idempotent() {
    let mut adapter = open_clone_adapter(FakeDumper::new()).await;
    adapter.create_tenant("acme").await.unwrap();

    let err = adapter.import_schema("acme").await.unwrap_err();
    match err {
        TenancyError::ImportFailed {
            tenant_id, stage, ..
        } => {
            assert_eq!(tenant_id.as_str(), "acme");
            assert_eq!(stage, ImportStage::ApplyStructure);
        }
        other => panic!("Expected ImportFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_import_leaves_partial_schema_then_drop_and_retry() {
    let dumper = FakeDumper::failing_at(FailAt::Rows);
    let mut adapter = open_clone_adapter(dumper.clone()).await;

    let err = adapter.create_tenant("acme").await.unwrap_err();
    match &err {
        TenancyError::ImportFailed { stage, message, .. } => {
            assert_eq!(*stage, ImportStage::DumpRows);
            assert!(message.contains("connection to server failed"));
        }
        other => panic!("Expected ImportFailed, got {:?}", other),
    }
    assert!(!err.is_recoverable());

    // structure made it, rows did not; nothing is rolled back
    assert_eq!(
        adapter.session().tables("acme"),
        vec!["schema_migrations", "users"]
    );
    assert!(
        adapter
            .session()
            .rows("acme", "schema_migrations")
            .unwrap()
            .is_empty()
    );
    assert!(adapter.current_tenant().is_none());

    dumper.set_failure(None);
    adapter.drop_tenant("acme").await.unwrap();
    adapter.create_tenant("acme").await.unwrap();
    assert_eq!(
        adapter.session().rows("acme", "schema_migrations").unwrap(),
        TEMPLATE_MIGRATIONS
    );
}

#[tokio::test]
async fn test_structure_dump_failure() {
    let mut adapter = open_clone_adapter(FakeDumper::failing_at(FailAt::Structure)).await;
    adapter.create("acme").await.unwrap();

    let err = adapter.import_schema("acme").await.unwrap_err();
    assert!(matches!(
        err,
        TenancyError::ImportFailed {
            stage: ImportStage::DumpStructure,
            ..
        }
    ));
    assert!(adapter.session().tables("acme").is_empty());
}

#[tokio::test]
async fn test_replay_failure_reports_apply_stage() {
    let mut adapter = open_clone_adapter(FakeDumper::new()).await;
    adapter.create("acme").await.unwrap();
    adapter
        .session_mut()
        .fail_statements_containing("INSERT INTO \"acme\".schema_migrations");

    let err = adapter.import_schema("acme").await.unwrap_err();
    assert!(matches!(
        err,
        TenancyError::ImportFailed {
            stage: ImportStage::ApplyRows,
            ..
        }
    ));
    assert_eq!(adapter.session().search_path(), ["public", "shared"]);
}

#[tokio::test]
async fn test_import_requires_schema_clone_strategy() {
    let mut adapter = AdapterFactory::new(TenancyConfig::new())
        .unwrap()
        .with_dumper(FakeDumper::new())
        .open(scenario_session())
        .await
        .unwrap();
    adapter.create("acme").await.unwrap();

    let err = adapter.import_schema("acme").await.unwrap_err();
    assert!(matches!(err, TenancyError::ConfigurationError { .. }));

    // plain create_tenant only creates the schema
    adapter.create_tenant("globex").await.unwrap();
    assert!(adapter.session().tables("globex").is_empty());
}

#[tokio::test]
async fn test_dump_reads_configured_database_and_template() {
    let dumper = FakeDumper::new();
    let config = TenancyConfig::new()
        .with_strategy(helios_tenancy::config::IsolationStrategy::SchemaClone)
        .with_database("app")
        .with_template_schema("public")
        .with_bookkeeping_table("ar_versions");
    let mut adapter = AdapterFactory::new(config)
        .unwrap()
        .with_dumper(dumper.clone())
        .open(scenario_session())
        .await
        .unwrap();

    adapter.create("acme").await.unwrap();
    adapter.import_schema("acme").await.unwrap();
    assert_eq!(
        dumper.calls(),
        vec![
            "structure public app".to_string(),
            "rows public ar_versions app".to_string(),
        ]
    );
}
