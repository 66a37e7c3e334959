use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fundsync_adapters::{load_fixture_platform, EmailAccount, StaticPlatform};
use fundsync_core::{
    ContactRecord, CrmTotalsRow, DiscoveredPage, Event, FundraisingResult, MasterRecord, Nullable,
    PageSnapshot, Priority, RemoteEvent, ResultKey, Totals, DEFAULT_EVENT_PRIORITY,
    DEFAULT_PAGE_PRIORITY, DELTA_TOLERANCE, HOT_PRIORITY,
};
use fundsync_storage::{MemoryStore, RateLimit, Store};
use fundsync_sync::{CycleError, CycleOutcome, CycleRunner, SyncConfig};

const CHARITY: i64 = 2050;
const EVENT: i64 = 900;

fn config() -> SyncConfig {
    let mut config = SyncConfig::new("postgres://unused", 10);
    config.rate_limit = RateLimit {
        per_second: 1000.0,
        burst: 50,
    };
    config.default_charity_id = Some(CHARITY);
    config
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).single().unwrap()
}

fn page(page_id: i64, short_name: Option<&str>) -> DiscoveredPage {
    DiscoveredPage {
        page_id,
        charity_id: CHARITY,
        event_id: EVENT,
        short_name: short_name.map(str::to_string),
    }
}

fn event(event_id: i64, start: Option<DateTime<Utc>>, priority: Priority) -> Event {
    Event {
        event_id,
        charity_id: CHARITY,
        name: format!("Event {event_id}"),
        event_type: Some("Running".into()),
        location: None,
        start_date: start,
        completion_date: None,
        expiry_date: None,
        priority,
    }
}

fn remote(event_id: i64, start: Option<DateTime<Utc>>) -> RemoteEvent {
    RemoteEvent {
        event_id,
        name: format!("Remote {event_id}"),
        event_type: None,
        location: None,
        start_date: start,
        completion_date: None,
        expiry_date: None,
    }
}

fn totals(target: f64, online: f64, offline: f64, sms: f64, gift_aid: f64) -> Totals {
    Totals {
        target,
        raised_online: online,
        raised_offline: offline,
        raised_sms: sms,
        estimated_gift_aid: gift_aid,
    }
}

fn live(totals: Totals) -> PageSnapshot {
    PageSnapshot {
        totals,
        cancelled: false,
    }
}

fn contact(id: &str, page_id: Option<&str>, email: Option<&str>) -> ContactRecord {
    ContactRecord {
        id: id.into(),
        charity_id: Some(CHARITY.to_string()),
        event_id: Some(EVENT.to_string()),
        page_id: page_id.map(str::to_string),
        page_url: None,
        team_page_url: None,
        email: email.map(str::to_string),
    }
}

async fn seed_result(store: &MemoryStore, key: ResultKey, totals: Totals, updated_at: DateTime<Utc>) {
    store
        .seed_result(FundraisingResult {
            key,
            totals,
            updated_at,
        })
        .await;
}

fn day(page_id: i64, d: u32) -> ResultKey {
    ResultKey {
        page_id,
        year: 2026,
        month: 5,
        day: d as i32,
    }
}

fn runner(store: &Arc<MemoryStore>, platform: &Arc<StaticPlatform>, config: SyncConfig) -> CycleRunner {
    CycleRunner::new(config, store.clone(), platform.clone())
}

#[tokio::test]
async fn baseline_only_page_gets_todays_row_and_keeps_priority() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_page(page(555, Some("jane-runs")), Priority::Active(3), None).await;
    seed_result(&store, ResultKey::baseline(555), totals(1000.0, 0.0, 0.0, 0.0, 0.0), at(1, 9)).await;

    let fetched = totals(1000.0, 200.0, 50.0, 0.0, 40.0);
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(EVENT, vec![page(555, Some("jane-runs"))])
            .with_snapshot("jane-runs", live(fetched)),
    );

    let before = Utc::now();
    let outcome = runner(&store, &platform, config())
        .run_platform_sync_cycle()
        .await
        .unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(summary.results.fetched, 1);
    assert_eq!(summary.results.baselines_created, 0);

    let rows = store.page_results(555, None).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(!rows[0].key.is_baseline());
    assert_eq!(rows[0].totals, fetched);
    assert!(rows[1].key.is_baseline());

    let priority = store.page_priority(555).await.unwrap().unwrap();
    assert_eq!(priority.priority, Priority::Active(3));
    assert!(priority.last_synced_at.is_some_and(|at| at >= before));
}

#[tokio::test]
async fn cancelled_page_is_excluded_without_a_result_row() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_page(page(777, Some("gone")), Priority::Active(2), None).await;
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(EVENT, vec![page(777, Some("gone"))])
            .with_snapshot(
                "gone",
                PageSnapshot {
                    totals: totals(100.0, 10.0, 0.0, 0.0, 0.0),
                    cancelled: true,
                },
            ),
    );

    let outcome = runner(&store, &platform, config())
        .run_platform_sync_cycle()
        .await
        .unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(ref s) if s.results.excluded == 1));

    assert_eq!(
        store.page_priority(777).await.unwrap().unwrap().priority,
        Priority::Excluded
    );
    assert_eq!(store.result_count(777).await, 0);
}

#[tokio::test]
async fn excluded_pages_are_never_fetched() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_page(page(888, Some("paused")), Priority::Excluded, None).await;
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(EVENT, vec![page(888, Some("paused"))])
            .with_snapshot("paused", live(totals(1.0, 1.0, 0.0, 0.0, 0.0))),
    );

    let outcome = runner(&store, &platform, config())
        .run_platform_sync_cycle()
        .await
        .unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.selected, 0);
    // only the event listing was requested
    assert_eq!(platform.calls(), 1);
    assert_eq!(store.result_count(888).await, 0);
}

#[tokio::test]
async fn discovery_mirrors_new_pages_and_renames() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_event(event(901, None, Priority::Excluded)).await;
    store.seed_page(page(10, Some("old-name")), Priority::default(), Some(Utc::now())).await;
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(EVENT, vec![page(10, Some("new-name")), page(11, None)])
            .with_event_pages(901, vec![page(12, Some("untrusted"))]),
    );

    let outcome = runner(&store, &platform, config())
        .run_platform_sync_cycle()
        .await
        .unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.discovery.events, 1);
    assert_eq!(summary.discovery.pages_inserted, 1);
    assert_eq!(summary.discovery.short_names_updated, 1);
    assert_eq!(summary.discovery.unserviceable, 1);

    assert_eq!(
        store.page(10).await.unwrap().short_name.as_deref(),
        Some("new-name")
    );
    let inserted = store.page_priority(11).await.unwrap().unwrap();
    assert_eq!(inserted.priority, Priority::Active(DEFAULT_PAGE_PRIORITY));
    assert!(store.page(12).await.is_none());
}

#[tokio::test]
async fn rerunning_with_unchanged_data_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_page(page(20, Some("steady")), Priority::default(), None).await;
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(EVENT, vec![page(20, Some("steady"))])
            .with_snapshot("steady", live(totals(300.0, 120.0, 0.0, 5.0, 12.0))),
    );
    let mut config = config();
    config.stale_after = Duration::ZERO;
    let runner = runner(&store, &platform, config);

    runner.run_platform_sync_cycle().await.unwrap();
    let first = store.page_results(20, None).await.unwrap();
    runner.run_platform_sync_cycle().await.unwrap();
    let second = store.page_results(20, None).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn fetch_error_demotes_page_and_stops_the_cycle() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    for (id, name) in [(1, "one"), (2, "two"), (3, "three")] {
        store.seed_page(page(id, Some(name)), Priority::default(), None).await;
    }
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(
                EVENT,
                vec![page(1, Some("one")), page(2, Some("two")), page(3, Some("three"))],
            )
            .with_snapshot("one", live(totals(10.0, 1.0, 0.0, 0.0, 0.0)))
            .with_snapshot("three", live(totals(10.0, 1.0, 0.0, 0.0, 0.0)))
            .failing_page("two"),
    );

    let err = runner(&store, &platform, config())
        .run_platform_sync_cycle()
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::PageFetch { page_id: 2, .. }), "{err}");
    assert!(err.is_transient());

    assert_eq!(store.result_count(1).await, 2);
    assert_eq!(
        store.page_priority(2).await.unwrap().unwrap().priority,
        Priority::Active(DEFAULT_PAGE_PRIORITY + 1)
    );
    assert_eq!(store.result_count(3).await, 0);
}

#[tokio::test]
async fn shutdown_aborts_pending_wait_promptly_and_reports_success() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    let platform = Arc::new(
        StaticPlatform::new()
            .with_event_pages(EVENT, vec![page(1, Some("a")), page(2, Some("b"))])
            .with_page_size(1),
    );
    let mut config = config();
    config.rate_limit = RateLimit {
        per_second: 0.001,
        burst: 1,
    };
    let runner = Arc::new(runner(&store, &platform, config));

    let cycle = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run_platform_sync_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let overlapping = runner.run_platform_sync_cycle().await.unwrap();
    assert!(matches!(overlapping, CycleOutcome::Skipped));

    runner.shutdown();
    let outcome = tokio::time::timeout(Duration::from_secs(1), cycle)
        .await
        .expect("cycle should stop promptly")
        .expect("task joined")
        .expect("abort is not an error");
    assert!(matches!(outcome, CycleOutcome::Aborted));
    assert_eq!(platform.calls(), 1);

    let later = runner.run_reconciliation_cycle().await.unwrap();
    assert!(matches!(later, CycleOutcome::Aborted));
}

#[tokio::test]
async fn id_match_promotes_page_and_records_master_from_oldest_result() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_page(page(555, Some("jane-runs")), Priority::default(), None).await;
    let initial = totals(1000.0, 0.0, 0.0, 0.0, 0.0);
    seed_result(&store, ResultKey::baseline(555), initial, at(1, 9)).await;
    seed_result(&store, day(555, 2), totals(1000.0, 200.0, 50.0, 0.0, 40.0), at(2, 9)).await;
    store.seed_contact(contact("003A", Some("555"), None), at(3, 9)).await;

    let platform = Arc::new(StaticPlatform::new());
    let runner = runner(&store, &platform, config());
    let outcome = runner.run_reconciliation_cycle().await.unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.matching.matched, 1);
    assert_eq!(summary.matching.masters_created, 1);

    let master = store.master(555).await.unwrap();
    assert_eq!(master.contact_id, "003A");
    assert_eq!(master.initial, initial);
    assert_eq!(master.event_name, format!("Event {EVENT}"));
    assert_eq!(
        store.page_priority(555).await.unwrap().unwrap().priority,
        Priority::Active(HOT_PRIORITY)
    );
    // the diff engine ran in the same cycle
    assert_eq!(store.details(555).await.len(), 1);
    assert_eq!(
        master.page_url.as_deref(),
        Some("https://www.justgiving.com/fundraising/jane-runs")
    );

    // the contact now has a master record and is not matched again
    let again = runner.run_reconciliation_cycle().await.unwrap();
    assert!(matches!(again, CycleOutcome::Completed(ref s) if s.matching.contacts == 0));
}

#[tokio::test]
async fn excluded_page_is_matched_but_not_promoted() {
    let store = Arc::new(MemoryStore::new());
    store.seed_page(page(60, Some("closed")), Priority::Excluded, None).await;
    store.seed_contact(contact("003E", Some("60"), None), at(3, 9)).await;

    let platform = Arc::new(StaticPlatform::new());
    runner(&store, &platform, config())
        .run_reconciliation_cycle()
        .await
        .unwrap();

    assert_eq!(
        store.page_priority(60).await.unwrap().unwrap().priority,
        Priority::Excluded
    );
    assert!(store.master(60).await.is_none());
}

#[tokio::test]
async fn unmirrored_page_registers_contact_event() {
    let trusted_start = at(20, 9);
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, Some(trusted_start), Priority::Active(1))).await;

    let mut twin = contact("003B", Some("4001"), None);
    twin.event_id = Some("901".into());
    let mut stranger = contact("003C", Some("4002"), None);
    stranger.event_id = Some("902".into());
    store.seed_contact(twin, at(3, 9)).await;
    store.seed_contact(stranger, at(3, 8)).await;

    let platform = Arc::new(
        StaticPlatform::new()
            .with_event(remote(901, Some(trusted_start)))
            .with_event(remote(902, Some(at(21, 9)))),
    );
    let runner = runner(&store, &platform, config());
    let outcome = runner.run_reconciliation_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(ref s) if s.matching.events_registered == 2));

    let twin_event = store.event(901).await.unwrap();
    assert_eq!(twin_event.priority, Priority::Active(DEFAULT_EVENT_PRIORITY));
    assert_eq!(twin_event.start_date, Some(trusted_start));
    assert_eq!(store.event(902).await.unwrap().priority, Priority::Excluded);

    // already known events are not fetched again
    let calls = platform.calls();
    runner.run_reconciliation_cycle().await.unwrap();
    assert_eq!(platform.calls(), calls);
}

#[tokio::test]
async fn single_qualifying_email_candidate_is_matched() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    store.seed_page(page(601, Some("jane")), Priority::default(), None).await;
    store.seed_page(page(602, Some("jane-old")), Priority::default(), None).await;
    seed_result(&store, ResultKey::baseline(601), totals(100.0, 5.0, 0.0, 0.0, 0.0), at(1, 9)).await;
    seed_result(&store, ResultKey::baseline(602), totals(100.0, 0.0, 0.0, 0.0, 0.0), at(1, 9)).await;
    store
        .seed_contact(contact("003D", None, Some("Jane <JANE@example.org>")), at(3, 9))
        .await;

    let account = EmailAccount::parse("jane@example.org").unwrap();
    let platform = Arc::new(StaticPlatform::new().with_account_pages(
        CHARITY,
        &account,
        vec![page(601, Some("jane")), page(602, Some("jane-old"))],
    ));

    let outcome = runner(&store, &platform, config())
        .run_reconciliation_cycle()
        .await
        .unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(ref s) if s.matching.matched == 1));
    assert_eq!(store.master(601).await.unwrap().contact_id, "003D");
    assert!(store.master(602).await.is_none());
}

#[tokio::test]
async fn two_qualifying_email_candidates_are_ambiguous() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    for id in [601, 602] {
        store.seed_page(page(id, Some(&format!("jane-{id}"))), Priority::default(), None).await;
        seed_result(&store, ResultKey::baseline(id), totals(100.0, 5.0, 0.0, 0.0, 0.0), at(1, 9)).await;
    }
    store
        .seed_contact(contact("003F", None, Some("jane@example.org")), at(3, 9))
        .await;

    let account = EmailAccount::parse("jane@example.org").unwrap();
    let mut elsewhere = page(603, Some("jane-elsewhere"));
    elsewhere.event_id = 950;
    let platform = Arc::new(
        StaticPlatform::new()
            .with_account_pages(
                CHARITY,
                &account,
                vec![page(601, Some("jane-601")), page(602, Some("jane-602")), elsewhere],
            )
            .with_event(remote(950, None)),
    );

    let outcome = runner(&store, &platform, config())
        .run_reconciliation_cycle()
        .await
        .unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.matching.matched, 0);
    assert_eq!(summary.matching.masters_created, 0);
    assert!(store.master(601).await.is_none());
    assert!(store.master(602).await.is_none());

    // the unknown event is parked untrusted since its start date is unknown
    assert_eq!(summary.matching.events_registered, 1);
    assert_eq!(store.event(950).await.unwrap().priority, Priority::Excluded);
}

#[tokio::test]
async fn committed_deltas_reconstruct_latest_totals() {
    let store = Arc::new(MemoryStore::new());
    store.seed_page(page(70, Some("jane-runs")), Priority::Active(HOT_PRIORITY), None).await;
    let baseline = totals(500.0, 100.0, 0.0, 0.0, 10.0);
    seed_result(&store, ResultKey::baseline(70), baseline, at(1, 9)).await;
    seed_result(&store, day(70, 1), totals(500.0, 150.0, 0.0, 0.0, 20.0), at(1, 18)).await;
    seed_result(&store, day(70, 2), totals(600.0, 150.0, 25.0, 0.0, 20.0), at(2, 18)).await;
    seed_result(&store, day(70, 3), totals(600.0, 150.004, 25.0, 0.0, 20.0), at(3, 18)).await;
    store
        .seed_master(MasterRecord {
            page_id: 70,
            contact_id: "003G".into(),
            initial: baseline,
            portal: "Just Giving".into(),
            event_id: EVENT,
            charity_id: CHARITY,
            event_name: "Event 900".into(),
            page_url: None,
        })
        .await;

    let platform = Arc::new(StaticPlatform::new());
    let runner = runner(&store, &platform, config());
    runner.run_reconciliation_cycle().await.unwrap();

    let details = store.details(70).await;
    assert_eq!(details.len(), 2, "the sub-tolerance change is not committed");
    assert_eq!(details[0].deltas, totals(0.0, 50.0, 0.0, 0.0, 10.0));
    assert_eq!(details[0].transaction_date, at(1, 18));
    assert_eq!(details[1].contact_id, "003G");

    let latest = totals(600.0, 175.0, 25.0, 2.5, 25.0);
    seed_result(&store, day(70, 4), latest, at(4, 18)).await;
    runner.run_reconciliation_cycle().await.unwrap();

    let details = store.details(70).await;
    assert_eq!(details.len(), 3);
    let reconstructed = details
        .iter()
        .fold(baseline, |acc, detail| acc.plus(&detail.deltas));
    assert!(
        !reconstructed.delta_from(&latest).exceeds_tolerance(DELTA_TOLERANCE),
        "{reconstructed:?} vs {latest:?}"
    );

    // nothing new to commit
    runner.run_reconciliation_cycle().await.unwrap();
    assert_eq!(store.details(70).await.len(), 3);
}

#[tokio::test]
async fn null_crm_column_is_an_integrity_error() {
    let store = Arc::new(MemoryStore::new());
    store.seed_page(page(80, Some("half-synced")), Priority::default(), None).await;
    seed_result(&store, ResultKey::baseline(80), totals(10.0, 1.0, 0.0, 0.0, 0.0), at(1, 9)).await;
    seed_result(&store, day(80, 2), totals(10.0, 4.0, 0.0, 0.0, 0.0), at(2, 9)).await;
    store
        .seed_master(MasterRecord {
            page_id: 80,
            contact_id: "003H".into(),
            initial: totals(10.0, 1.0, 0.0, 0.0, 0.0),
            portal: "Just Giving".into(),
            event_id: EVENT,
            charity_id: CHARITY,
            event_name: String::new(),
            page_url: None,
        })
        .await;
    store
        .override_crm_totals(CrmTotalsRow {
            page_id: 80,
            contact_id: Nullable::Present("003H".into()),
            raised_online: Nullable::Present(1.0),
            raised_sms: Nullable::Present(0.0),
            raised_offline: Nullable::Present(0.0),
            estimated_gift_aid: Nullable::Absent,
            target: Nullable::Present(10.0),
        })
        .await;

    let platform = Arc::new(StaticPlatform::new());
    let err = runner(&store, &platform, config())
        .run_reconciliation_cycle()
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::Integrity(_)), "{err}");
    assert!(!err.is_transient());
    assert!(store.details(80).await.is_empty());
}

#[tokio::test]
async fn fixture_file_drives_a_full_sync_cycle() {
    let fixture = serde_json::json!({
        "events": [{
            "event_id": EVENT,
            "name": "City Marathon",
            "event_type": "Running",
            "location": null,
            "start_date": "2026-04-26T09:00:00Z",
            "completion_date": null,
            "expiry_date": null,
            "pages": [
                {"page_id": 555, "charity_id": CHARITY, "event_id": EVENT, "short_name": "jane-runs"},
                {"page_id": 556, "charity_id": CHARITY, "event_id": EVENT, "short_name": null}
            ]
        }],
        "snapshots": {
            "jane-runs": {
                "totals": {"target": 1000.0, "raised_online": 200.0, "raised_offline": 0.0, "raised_sms": 0.0, "estimated_gift_aid": 50.0},
                "cancelled": false
            }
        }
    });
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(fixture.to_string().as_bytes()).unwrap();
    let platform = Arc::new(load_fixture_platform(file.path()).unwrap());

    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    let mut config = config();
    config.stale_after = Duration::ZERO;
    let runner = runner(&store, &platform, config);

    // first pass mirrors the listing, second pass syncs the mirrored pages
    runner.run_platform_sync_cycle().await.unwrap();
    assert_eq!(store.result_count(555).await, 0);
    let outcome = runner.run_platform_sync_cycle().await.unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.results.fetched, 1);
    assert_eq!(summary.results.excluded, 1);
    assert_eq!(store.result_count(555).await, 2);
    assert_eq!(
        store.page_priority(556).await.unwrap().unwrap().priority,
        Priority::Excluded
    );
}

#[tokio::test]
async fn unrepresentable_stale_window_fails_the_cycle_without_requests() {
    let store = Arc::new(MemoryStore::new());
    store.seed_event(event(EVENT, None, Priority::Active(1))).await;
    let platform = Arc::new(StaticPlatform::new().with_event_pages(EVENT, vec![page(1, Some("a"))]));
    let mut config = config();
    config.stale_after = Duration::from_secs(10_000_000_000_000);

    let err = runner(&store, &platform, config)
        .run_platform_sync_cycle()
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::Config(_)), "{err}");
    assert!(!err.is_transient());
    assert_eq!(platform.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_stop_shuts_the_runner_down() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(StaticPlatform::new());
    let runner = Arc::new(runner(&store, &platform, config()));

    runner.run_until(async { Ok(()) }).await.unwrap();

    assert!(runner.is_shut_down());
    let outcome = runner.run_platform_sync_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Aborted));
}
