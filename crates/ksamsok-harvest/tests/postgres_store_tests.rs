//! PostgreSQL content store tests
//!
//! These need a database: set `DATABASE_URL` to run them. Without it every
//! test returns early. Each test works under its own service id and URIs so
//! runs never collide.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use ksamsok_common::{RecordStatus, ServiceMetadata};
use ksamsok_harvest::db::{self, DbConfig};
use ksamsok_harvest::harvest::{
    ContentStore, HarvestRunner, PgContentStore, RdfContentAnalyzer, RecordWrite, RunOptions,
    TracingStatusService,
};
use sqlx::PgPool;
use uuid::Uuid;

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

async fn test_pool() -> Option<PgPool> {
    let config = match DbConfig::from_env() {
        Ok(config) => config,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping");
            return None;
        },
    };
    let pool = db::create_pool(&DbConfig {
        max_connections: 4,
        ..config
    })
    .await
    .expect("Failed to connect to test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn write<'a>(uri: &'a str, oai_uri: &'a str, service_id: &'a str, changed: DateTime<Utc>) -> RecordWrite<'a> {
    RecordWrite {
        uri,
        oai_uri: Some(oai_uri),
        service_id,
        xml_data: "<rdf:RDF/>",
        datestamp: ts(2023, 5, 1),
        native_url: Some("http://example.org/native"),
        changed,
    }
}

#[tokio::test]
async fn test_health_check() {
    let Some(pool) = test_pool().await else { return };
    db::health_check(&pool).await.unwrap();

    // migrations are already applied; running them again is a no-op
    db::run_migrations(&pool).await.unwrap();

    pool.close().await;
    assert!(db::health_check(&pool).await.is_err());
}

#[tokio::test]
async fn test_insert_then_update_keeps_added() {
    let Some(pool) = test_pool().await else { return };
    let service_id = unique("svc");
    let uri = unique("urn:uri");
    let first_run = ts(2024, 1, 1);
    let second_run = ts(2024, 2, 1);

    let mut store = PgContentStore::begin(pool.clone()).await.unwrap();
    assert_eq!(store.update_record(&write(&uri, "oai:1", &service_id, first_run)).await.unwrap(), 0);
    store.insert_record(&write(&uri, "oai:1", &service_id, first_run)).await.unwrap();
    store.commit().await.unwrap();

    let mut changed = write(&uri, "oai:1", &service_id, second_run);
    changed.xml_data = "<rdf:RDF><x/></rdf:RDF>";
    assert_eq!(store.update_record(&changed).await.unwrap(), 1);
    store.commit().await.unwrap();

    let row = store.load_record(&uri).await.unwrap().unwrap();
    assert_eq!(row.added, first_run);
    assert_eq!(row.changed, second_run);
    assert_eq!(row.xml_data.as_deref(), Some("<rdf:RDF><x/></rdf:RDF>"));
    assert_eq!(row.native_url.as_deref(), Some("http://example.org/native"));
    assert_eq!(row.status, RecordStatus::Normal);
}

#[tokio::test]
async fn test_rollback_discards_uncommitted_work() {
    let Some(pool) = test_pool().await else { return };
    let service_id = unique("svc");
    let kept = unique("urn:kept");
    let lost = unique("urn:lost");
    let run = ts(2024, 1, 1);

    let mut store = PgContentStore::begin(pool.clone()).await.unwrap();
    store.insert_record(&write(&kept, "oai:kept", &service_id, run)).await.unwrap();
    store.commit().await.unwrap();
    store.insert_record(&write(&lost, "oai:lost", &service_id, run)).await.unwrap();
    store.rollback().await.unwrap();

    assert!(store.commit().await.is_err());

    let mut reader = PgContentStore::begin(pool).await.unwrap();
    assert!(reader.load_record(&kept).await.unwrap().is_some());
    assert!(reader.load_record(&lost).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pending_mark_sweep_and_reset() {
    let Some(pool) = test_pool().await else { return };
    let service_id = unique("svc");
    let live = unique("urn:live");
    let missing = unique("urn:missing");
    let tombstoned = unique("urn:tombstoned");
    let run = ts(2024, 1, 1);
    let earlier_delete = ts(2022, 3, 4);

    let mut store = PgContentStore::begin(pool).await.unwrap();
    for (uri, oai) in [(&live, "oai:live"), (&missing, "oai:missing"), (&tombstoned, "oai:tomb")] {
        store.insert_record(&write(uri, oai, &service_id, run)).await.unwrap();
    }
    assert_eq!(
        store
            .tombstone_by_oai_uri(&service_id, "oai:tomb", earlier_delete, run)
            .await
            .unwrap(),
        1
    );
    store.commit().await.unwrap();

    assert_eq!(store.mark_all_pending(&service_id).await.unwrap(), 3);
    let mut pending = store.fetch_pending_page(&service_id, 10).await.unwrap();
    pending.sort();
    let mut expected = vec![live.clone(), missing.clone(), tombstoned.clone()];
    expected.sort();
    assert_eq!(pending, expected);
    assert_eq!(store.fetch_pending_page(&service_id, 2).await.unwrap().len(), 2);

    // recovery leaves tombstones intact
    assert_eq!(store.reset_pending(&service_id).await.unwrap(), 3);
    assert!(store.fetch_pending_page(&service_id, 10).await.unwrap().is_empty());
    let row = store.load_record(&tombstoned).await.unwrap().unwrap();
    assert_eq!(row.deleted, Some(earlier_delete));

    store.mark_all_pending(&service_id).await.unwrap();
    let sweep_ts = ts(2024, 6, 1);
    assert_eq!(store.tombstone_swept(&missing, sweep_ts).await.unwrap(), 1);
    assert_eq!(store.tombstone_swept(&tombstoned, sweep_ts).await.unwrap(), 1);
    store.commit().await.unwrap();

    let swept = store.load_record(&missing).await.unwrap().unwrap();
    assert_eq!(swept.deleted, Some(sweep_ts));
    assert_eq!(swept.datestamp, sweep_ts);
    assert_eq!(swept.xml_data, None);
    assert_eq!(swept.status, RecordStatus::Normal);

    let resept = store.load_record(&tombstoned).await.unwrap().unwrap();
    assert_eq!(resept.deleted, Some(earlier_delete));
    assert_eq!(resept.datestamp, earlier_delete);
    assert_eq!(resept.changed, sweep_ts);

    let untouched = store.load_record(&live).await.unwrap().unwrap();
    assert_eq!(untouched.status, RecordStatus::Pending);
}

#[tokio::test]
async fn test_full_run_against_database() {
    let Some(pool) = test_pool().await else { return };
    let service = ServiceMetadata::new(unique("svc"), true).unwrap();
    let old = unique("urn:old");
    let fresh: Vec<String> = (0..3).map(|_| unique("urn:fresh")).collect();

    let mut seed = PgContentStore::begin(pool.clone()).await.unwrap();
    seed.insert_record(&write(&old, "oai:old", &service.id, ts(2020, 1, 1)))
        .await
        .unwrap();
    seed.commit().await.unwrap();
    drop(seed);

    let records: String = fresh
        .iter()
        .enumerate()
        .map(|(n, uri)| {
            format!(
                r#"<record><header><identifier>oai:fresh:{n}</identifier><datestamp>2024-01-0{}T00:00:00Z</datestamp></header><metadata><rdf:RDF xmlns:rdf="{RDF_NS}"><rdf:Description rdf:about="{uri}"/></rdf:RDF></metadata></record>"#,
                n + 1
            )
        })
        .collect();
    let input = format!("<OAI-PMH><ListRecords>{records}</ListRecords></OAI-PMH>");

    let status = TracingStatusService::new();
    let mut store = PgContentStore::begin(pool).await.unwrap();
    let summary = HarvestRunner::new(&RdfContentAnalyzer, &status)
        .run(&mut store, &service, input.as_bytes(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.swept, 1);

    let old_row = store.load_record(&old).await.unwrap().unwrap();
    assert_eq!(old_row.deleted, Some(summary.run_started.trunc_subsecs(6)));
    for (n, uri) in fresh.iter().enumerate() {
        let row = store.load_record(uri).await.unwrap().unwrap();
        assert_eq!(row.oai_uri, Some(format!("oai:fresh:{n}")));
        assert_eq!(row.datestamp, ts(2024, 1, n as u32 + 1));
        assert_eq!(row.added, summary.run_started);
    }
    assert!(store.fetch_pending_page(&service.id, 10).await.unwrap().is_empty());
}
