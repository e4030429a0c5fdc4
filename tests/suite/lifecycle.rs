//! Registry lifecycle properties: uniqueness per folder, failure isolation
//! and teardown.

use std::collections::BTreeSet;
use std::time::Duration;

use futures_util::future::join_all;
use saga_lsp::{FolderState, StartError, StartOutcome, StopError, StopOutcome};
use saga_types::FolderKey;
use tokio::time::Instant;

use crate::common::{MockFactory, RecordingNotifier, folder, registry, registry_with_stop_timeout};

#[tokio::test]
async fn entry_count_tracks_distinct_live_folders() {
    let factory = MockFactory::new();
    let journal = factory.journal();
    let reg = registry(factory);
    let mut expected: BTreeSet<FolderKey> = BTreeSet::new();

    // (add?, folder name)
    let ops = [
        (true, "a"),
        (true, "b"),
        (true, "a"),
        (false, "c"),
        (false, "a"),
        (true, "c"),
        (false, "a"),
        (true, "a"),
        (true, "b"),
        (false, "b"),
    ];
    for (add, name) in ops {
        let f = folder(name);
        if add {
            reg.start_server_for_folder(&f).await.unwrap();
            expected.insert(f.key());
        } else {
            reg.stop_server_for_folder(&f).await.unwrap();
            expected.remove(&f.key());
        }
        assert_eq!(reg.len(), expected.len());
        assert_eq!(reg.folder_keys(), expected.iter().cloned().collect::<Vec<_>>());
    }

    // a: started, stopped, started again. b: once. c: once.
    assert_eq!(journal.count("start:a"), 2);
    assert_eq!(journal.count("start:b"), 1);
    assert_eq!(journal.count("start:c"), 1);
}

#[tokio::test]
async fn second_start_launches_nothing() {
    let factory = MockFactory::new();
    let journal = factory.journal();
    let reg = registry(factory);
    let a = folder("a");

    assert_eq!(reg.start_server_for_folder(&a).await.unwrap(), StartOutcome::Started);
    assert_eq!(
        reg.start_server_for_folder(&a).await.unwrap(),
        StartOutcome::AlreadyRunning
    );
    assert_eq!(journal.count("start:"), 1);
    assert_eq!(reg.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_duplicate_starts_launch_once() {
    let factory = MockFactory::new().start_delay(Duration::from_millis(100));
    let journal = factory.journal();
    let reg = registry(factory);
    let a = folder("a");

    let outcomes = join_all((0..5).map(|_| reg.start_server_for_folder(&a))).await;

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(StartOutcome::Started)))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(StartOutcome::AlreadyRunning)))
        .count();
    assert_eq!((started, already), (1, 4));
    assert_eq!(journal.count("start:a"), 1);
    assert_eq!(reg.len(), 1);
}

#[tokio::test]
async fn stop_of_unknown_folder_is_a_no_op() {
    let factory = MockFactory::new();
    let journal = factory.journal();
    let reg = registry(factory);

    assert_eq!(
        reg.stop_server_for_folder(&folder("never")).await.unwrap(),
        StopOutcome::NotRunning
    );
    // Twice, after a real stop.
    let a = folder("a");
    reg.start_server_for_folder(&a).await.unwrap();
    assert_eq!(reg.stop_server_for_folder(&a).await.unwrap(), StopOutcome::Stopped);
    assert_eq!(reg.stop_server_for_folder(&a).await.unwrap(), StopOutcome::NotRunning);
    assert_eq!(journal.count("stop:"), 1);
}

#[tokio::test]
async fn failure_for_one_folder_leaves_others_alone() {
    let notifier = RecordingNotifier::default();
    let reg = registry(MockFactory::new().fail_start("a")).with_notifier(notifier.clone());
    let a = folder("a");
    let b = folder("b");

    let err = reg.start_server_for_folder(&a).await.unwrap_err();
    assert!(matches!(err, StartError::Session { .. }));
    assert_eq!(reg.start_server_for_folder(&b).await.unwrap(), StartOutcome::Started);

    assert_eq!(reg.state(&a.key()), FolderState::Absent);
    assert_eq!(reg.state(&b.key()), FolderState::Running);
    assert_eq!(reg.folder_keys(), [b.key()]);
    assert_eq!(
        notifier.messages(),
        ["Failed to start NovelSaga server for a: initialize rejected by server: scripted failure"]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_failure_leaves_others_alone() {
    let factory = MockFactory::new()
        .fail_start("b")
        .start_delay(Duration::from_millis(20));
    let reg = registry(factory);
    let folders = [folder("a"), folder("b"), folder("c")];

    let results = join_all(folders.iter().map(|f| reg.start_server_for_folder(f))).await;

    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert_eq!(reg.folder_keys(), [folders[0].key(), folders[2].key()]);
}

#[tokio::test]
async fn failed_start_can_be_retried() {
    let reg = registry(MockFactory::new().fail_start("a"));
    let a = folder("a");
    assert!(reg.start_server_for_folder(&a).await.is_err());
    // Still failing, but each attempt really runs.
    assert!(reg.start_server_for_folder(&a).await.is_err());
    assert!(reg.is_empty());
}

#[tokio::test]
async fn restart_is_stop_then_start() {
    let factory = MockFactory::new();
    let journal = factory.journal();
    let reg = registry(factory);
    let a = folder("a");

    reg.start_server_for_folder(&a).await.unwrap();
    reg.stop_server_for_folder(&a).await.unwrap();
    reg.start_server_for_folder(&a).await.unwrap();

    assert_eq!(journal.entries(), ["start:a", "stop:a", "start:a"]);
    assert_eq!(reg.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_start() {
    let factory = MockFactory::new().start_delay(Duration::from_millis(50));
    let journal = factory.journal();
    let reg = registry(factory);
    let a = folder("a");

    let (started, stopped) = tokio::join!(
        reg.start_server_for_folder(&a),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reg.stop_server_for_folder(&a).await
        }
    );

    assert_eq!(started.unwrap(), StartOutcome::Started);
    assert_eq!(stopped.unwrap(), StopOutcome::Stopped);
    assert_eq!(journal.entries(), ["start:a", "stop:a"]);
    assert!(reg.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_gives_up_on_a_slow_start_and_the_start_is_undone() {
    let factory = MockFactory::new().start_delay(Duration::from_secs(5));
    let journal = factory.journal();
    let reg = registry_with_stop_timeout(factory, Duration::from_secs(2));
    let a = folder("a");

    let (started, stopped) = tokio::join!(
        reg.start_server_for_folder(&a),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reg.stop_server_for_folder(&a).await
        }
    );

    assert!(matches!(stopped, Err(StopError::TimedOut { .. })));
    assert!(matches!(started, Err(StartError::Cancelled { ref folder }) if folder == "a"));
    // The late start shut its own server down.
    assert_eq!(journal.entries(), ["start:a", "stop:a"]);
    assert!(reg.is_empty());
}

#[tokio::test]
async fn failed_stop_still_removes_entry() {
    let reg = registry(MockFactory::new().fail_stop("a"));
    let a = folder("a");
    reg.start_server_for_folder(&a).await.unwrap();

    let err = reg.stop_server_for_folder(&a).await.unwrap_err();
    assert!(matches!(err, StopError::Shutdown { ref folder, .. } if folder == "a"));
    assert!(!reg.contains(&a.key()));
    // The folder can be started again.
    assert_eq!(reg.start_server_for_folder(&a).await.unwrap(), StartOutcome::Started);
}

#[tokio::test(start_paused = true)]
async fn hanging_stop_times_out_and_removes_entry() {
    let reg = registry_with_stop_timeout(MockFactory::new().hang_stop("a"), Duration::from_secs(5));
    let a = folder("a");
    reg.start_server_for_folder(&a).await.unwrap();

    let err = reg.stop_server_for_folder(&a).await.unwrap_err();
    assert!(matches!(err, StopError::TimedOut { timeout, .. } if timeout == Duration::from_secs(5)));
    assert_eq!(reg.state(&a.key()), FolderState::Absent);
}

#[tokio::test]
async fn shutdown_all_stops_everything_despite_failures() {
    let names = ["a", "b", "c", "d"];
    let factory = MockFactory::new().fail_stop("a").fail_stop("b").fail_stop("c");
    let journal = factory.journal();
    let reg = registry(factory);
    for name in names {
        reg.start_server_for_folder(&folder(name)).await.unwrap();
    }

    let report = reg.shutdown_all().await;

    assert_eq!(report.attempted(), names.len());
    assert_eq!(report.failures().len(), names.len() - 1);
    assert_eq!(journal.count("stop:"), names.len());
    assert!(reg.is_empty());
    assert!(reg.folder_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_all_is_bounded_by_a_hanging_stop() {
    let factory = MockFactory::new().hang_stop("b");
    let journal = factory.journal();
    let reg = registry_with_stop_timeout(factory, Duration::from_secs(2));
    for name in ["a", "b", "c"] {
        reg.start_server_for_folder(&folder(name)).await.unwrap();
    }

    let before = Instant::now();
    let report = reg.shutdown_all().await;

    assert_eq!(report.attempted(), 3);
    assert_eq!(report.failures().len(), 1);
    assert!(matches!(report.failures()[0], StopError::TimedOut { .. }));
    assert_eq!(report.failures()[0].folder(), "b");
    assert_eq!(journal.count("stop:"), 3);
    assert!(reg.is_empty());
    // Stops ran concurrently: one timeout, not one per folder.
    assert!(before.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn shutdown_all_on_empty_registry() {
    let reg = registry(MockFactory::new());
    let report = reg.shutdown_all().await;
    assert_eq!(report.attempted(), 0);
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn hung_document_forward_does_not_hold_up_shutdown() {
    let factory = MockFactory::new().hang_document("a");
    let journal = factory.journal();
    let reg = registry_with_stop_timeout(factory, Duration::from_secs(2));
    let a = folder("a");
    reg.start_server_for_folder(&a).await.unwrap();
    reg.start_server_for_folder(&folder("b")).await.unwrap();
    let chapter = a.path().join("ch1.md");

    let (notified, (report, elapsed)) = tokio::join!(
        reg.notify_document_changed(&chapter, "markdown", "# One"),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let before = Instant::now();
            let report = reg.shutdown_all().await;
            (report, before.elapsed())
        }
    );

    assert!(elapsed <= Duration::from_secs(2), "{elapsed:?}");
    assert_eq!(report.attempted(), 2);
    assert_eq!(report.failures().len(), 1);
    assert!(matches!(report.failures()[0], StopError::TimedOut { .. }));
    assert_eq!(journal.count("stop:b"), 1);
    assert!(reg.is_empty());
    assert_eq!(notified, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_document_forward_gives_up_after_request_timeout() {
    let reg = registry(MockFactory::new().hang_document("a"));
    let a = folder("a");
    reg.start_server_for_folder(&a).await.unwrap();

    let before = Instant::now();
    let notified = reg
        .notify_document_changed(&a.path().join("ch1.md"), "markdown", "# One")
        .await;

    assert_eq!(notified, 0);
    assert!(before.elapsed() >= reg.config().start_timeout());
    assert_eq!(reg.state(&a.key()), FolderState::Running);
    assert_eq!(reg.stop_server_for_folder(&a).await.unwrap(), StopOutcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn start_during_shutdown_is_refused() {
    let factory = MockFactory::new().stop_delay(Duration::from_secs(1));
    let journal = factory.journal();
    let reg = registry(factory);
    let a = folder("a");
    reg.start_server_for_folder(&folder("b")).await.unwrap();

    let (report, late) = tokio::join!(reg.shutdown_all(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        reg.start_server_for_folder(&a).await
    });

    assert!(matches!(late, Err(StartError::Cancelled { ref folder }) if folder == "a"));
    assert_eq!(report.attempted(), 1);
    assert_eq!(journal.count("start:a"), 0);
    assert_eq!(reg.state(&a.key()), FolderState::Absent);
    assert!(reg.is_empty());
}
