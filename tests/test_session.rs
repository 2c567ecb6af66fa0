mod common;

use mcp_nexus_core::notify::NullSink;
use mcp_nexus_core::session::CommandOutcome;
use mcp_nexus_core::{EngineConfig, Session};
use std::sync::Arc;
use std::time::Duration;

fn test_config(cdb_path: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cdb_path = cdb_path.to_string_lossy().to_string();
    config.startup_timeout_secs = 5;
    config.batch_wait_secs = 0;
    config
}

#[tokio::test]
async fn submit_and_wait_for_result() {
    let script = common::write_fake_cdb();
    let session = Session::open(test_config(&script), Arc::new(NullSink), "")
        .await
        .expect("session should open against the fake backend");

    let id = session.submit("lm").await.expect("submit should succeed");
    let outcome = session
        .get_result(&id, Duration::from_secs(5))
        .await
        .expect("get_result should succeed");

    match outcome {
        CommandOutcome::Terminal(snapshot) => {
            assert_eq!(snapshot.output.as_deref(), Some("output-of: lm"));
        }
        CommandOutcome::Pending => panic!("command should have completed within the wait window"),
    }

    session.close("test finished").await;
}

#[tokio::test]
async fn cancelling_a_queued_command_marks_it_cancelled_without_touching_the_adapter() {
    let script = common::write_fake_cdb();
    let mut config = test_config(&script);
    // Disable batching so the first command occupies the adapter alone
    // (the fake backend sleeps 2s on it), leaving the second command
    // reliably Queued for us to cancel before the queue ever looks at it.
    config.batch_enabled = false;
    let session = Session::open(config, Arc::new(NullSink), "")
        .await
        .expect("session should open");

    let _blocking_id = session.submit("SLOWCOMMAND").await.unwrap();
    let id = session.submit("lm").await.unwrap();

    let cancelled = session.cancel(&id, "no longer needed").await.expect("cancel should succeed");
    assert!(cancelled);

    let outcome = session.get_result(&id, Duration::from_millis(50)).await.unwrap();
    match outcome {
        CommandOutcome::Terminal(snapshot) => {
            assert_eq!(snapshot.state, mcp_nexus_core::registry::CommandState::Cancelled);
        }
        CommandOutcome::Pending => panic!("cancelled queued command should be terminal immediately"),
    }

    session.close("test finished").await;
}

#[tokio::test]
async fn diagnostics_report_adapter_and_queue_state() {
    let script = common::write_fake_cdb();
    let session = Session::open(test_config(&script), Arc::new(NullSink), "")
        .await
        .expect("session should open");

    let diagnostics = session.diagnostics().await;
    assert!(diagnostics.adapter_active);
    assert!(!diagnostics.degraded);
    assert_eq!(diagnostics.recovery_attempts, 0);

    session.close("test finished").await;

    let diagnostics = session.diagnostics().await;
    assert!(diagnostics.closed_at.is_some());
}
