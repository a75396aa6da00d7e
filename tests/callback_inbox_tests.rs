//! Inbox delivery and the periodic trigger, driven end to end through an orchestrator

mod fixtures;

use std::time::Duration;
use tempfile::TempDir;

use etl_orchestrator::workflow::{
    CallbackInbox, ContinuationToken, FailureKind, InboxMessage, OrchestratorSettings, Phase,
    RunId, SourceSpec, TriggerSchedule,
};
use etl_orchestrator::ShutdownCoordinator;
use fixtures::{manifest, wait_until, Harness, HarnessBuilder, SOURCE};

fn fast_harness() -> Harness {
    HarnessBuilder::new()
        .settings(
            OrchestratorSettings::new(Duration::from_secs(600))
                .with_poll_interval(Duration::from_millis(20)),
        )
        .build()
}

async fn only_active_run(harness: &Harness) -> RunId {
    let orchestrator = harness.orchestrator.clone();
    wait_until(move || {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.active_runs().await.len() == 1 }
    })
    .await;
    harness.orchestrator.active_runs().await[0].run_id.clone()
}

#[tokio::test]
async fn test_start_and_callback_through_inbox() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = CallbackInbox::new(temp_dir.path());
    let harness = fast_harness();

    inbox
        .deliver(&InboxMessage::Start {
            source: SourceSpec::new(SOURCE).with_prefix("2024/"),
        })
        .await
        .unwrap();
    let report = inbox.drain(&harness.orchestrator).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.rejected, 0);
    assert!(inbox.pending_messages().await.unwrap().is_empty());

    let run_id = only_active_run(&harness).await;
    let token = ContinuationToken(format!("T-{}", run_id));
    harness.wait_for_pending(&token).await;

    // The callback carries only the token; the pending request identifies the run
    inbox
        .deliver(&InboxMessage::ManifestReady {
            run_id: None,
            token,
            manifest: manifest(),
        })
        .await
        .unwrap();
    let report = inbox.drain(&harness.orchestrator).await.unwrap();
    assert_eq!(report.processed, 1);

    let run = harness.orchestrator.wait_for_terminal(&run_id).await.unwrap();
    assert_eq!(run.phase, Phase::Done);
    assert_eq!(run.source.prefix.as_deref(), Some("2024/"));
    assert_eq!(harness.launcher.launch_count(), 1);
}

#[tokio::test]
async fn test_malformed_message_is_rejected_with_reason() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = CallbackInbox::new(temp_dir.path());
    let harness = fast_harness();

    std::fs::write(temp_dir.path().join("0000-broken.json"), "{ not json").unwrap();

    let report = inbox.drain(&harness.orchestrator).await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(report.rejected, 1);

    let rejected = temp_dir.path().join("rejected");
    assert!(rejected.join("0000-broken.json").exists());
    let reason = std::fs::read_to_string(rejected.join("0000-broken.error")).unwrap();
    assert!(reason.contains("malformed inbox message"));
    assert!(inbox.pending_messages().await.unwrap().is_empty());
    assert!(harness.orchestrator.active_runs().await.is_empty());
}

#[tokio::test]
async fn test_callback_with_unknown_token_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = CallbackInbox::new(temp_dir.path());
    let harness = fast_harness();

    inbox
        .deliver(&InboxMessage::ManifestReady {
            run_id: None,
            token: ContinuationToken("nobody-asked-for-this".to_string()),
            manifest: manifest(),
        })
        .await
        .unwrap();

    let report = inbox.drain(&harness.orchestrator).await.unwrap();
    assert_eq!(report.rejected, 1);

    let rejected: Vec<_> = std::fs::read_dir(temp_dir.path().join("rejected"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    let error_file = rejected
        .iter()
        .find(|path| path.extension().and_then(|ext| ext.to_str()) == Some("error"))
        .unwrap();
    assert!(std::fs::read_to_string(error_file)
        .unwrap()
        .contains("unknown continuation token"));
}

#[tokio::test]
async fn test_cancel_through_inbox() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = CallbackInbox::new(temp_dir.path());
    let harness = fast_harness();

    let run_id = harness.orchestrator.start(SourceSpec::new(SOURCE)).await.unwrap();
    harness
        .wait_for_pending(&ContinuationToken(format!("T-{}", run_id)))
        .await;

    inbox
        .deliver(&InboxMessage::Cancel {
            run_id: run_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(inbox.drain(&harness.orchestrator).await.unwrap().processed, 1);

    let run = harness.orchestrator.wait_for_terminal(&run_id).await.unwrap();
    assert_eq!(run.phase, Phase::Failed);
    assert_eq!(
        run.terminal_result.and_then(|result| result.kind),
        Some(FailureKind::Cancelled)
    );
    assert_eq!(harness.launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_inbox_loop_stops_on_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = CallbackInbox::new(temp_dir.path());
    let harness = fast_harness();
    let coordinator = ShutdownCoordinator::new();

    let watcher = tokio::spawn(inbox.clone().run(
        harness.orchestrator.clone(),
        Duration::from_millis(10),
        coordinator.subscribe(),
    ));

    inbox
        .deliver(&InboxMessage::Start {
            source: SourceSpec::new(SOURCE),
        })
        .await
        .unwrap();
    only_active_run(&harness).await;

    coordinator.trigger();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trigger_starts_a_run_every_interval() {
    let harness = HarnessBuilder::new().build();
    let coordinator = ShutdownCoordinator::new();

    let schedule = TriggerSchedule::new(Duration::from_secs(60), SourceSpec::new(SOURCE));
    let trigger = tokio::spawn(schedule.run(harness.orchestrator.clone(), coordinator.subscribe()));

    tokio::time::sleep(Duration::from_secs(150)).await;
    coordinator.trigger();
    let started = trigger.await.unwrap();
    assert_eq!(started, 2);

    let active = harness.orchestrator.active_runs().await;
    assert_eq!(active.len(), 2);
    assert_ne!(active[0].run_id, active[1].run_id);
    for report in &active {
        let token = ContinuationToken(format!("T-{}", report.run_id));
        harness.wait_for_pending(&token).await;
        assert_eq!(
            harness.orchestrator.status(&report.run_id).await.unwrap().phase,
            Phase::BuildManifest
        );
    }
}
