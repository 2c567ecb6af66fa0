mod common;

use mcp_nexus_core::adapter::DebuggerAdapter;
use mcp_nexus_core::cancel::CancelToken;
use std::time::Duration;

#[tokio::test]
async fn start_execute_stop_round_trip() {
    let script = common::write_fake_cdb();
    let adapter = DebuggerAdapter::new(script.to_string_lossy().to_string(), Duration::from_secs(5));

    adapter.start("", "").await.expect("adapter should start against the fake backend");
    assert!(adapter.is_active());

    let output = adapter
        .execute("lm", CancelToken::new())
        .await
        .expect("execute should succeed");
    assert_eq!(output, "output-of: lm");

    adapter.stop().await.expect("stop should succeed");
    assert!(!adapter.is_active());
}

#[tokio::test]
async fn batched_composed_input_round_trips_through_sentinels() {
    let script = common::write_fake_cdb();
    let adapter = DebuggerAdapter::new(script.to_string_lossy().to_string(), Duration::from_secs(5));
    adapter.start("", "").await.expect("adapter should start");

    let planned = vec![
        mcp_nexus_core::batch::PlannedCommand { id: "a".to_string(), text: "lm".to_string() },
        mcp_nexus_core::batch::PlannedCommand { id: "b".to_string(), text: "!threads".to_string() },
    ];
    let composed = mcp_nexus_core::batch::compose(&planned);

    let output = adapter.execute(&composed, CancelToken::new()).await.expect("execute should succeed");
    let outcomes = mcp_nexus_core::batch::parse(&planned, &output);
    assert_eq!(
        outcomes.get("a"),
        Some(&mcp_nexus_core::batch::BatchOutcome::Output("output-of: lm".to_string()))
    );
    assert_eq!(
        outcomes.get("b"),
        Some(&mcp_nexus_core::batch::BatchOutcome::Output("output-of: !threads".to_string()))
    );

    adapter.stop().await.expect("stop should succeed");
}

#[tokio::test]
async fn start_against_missing_binary_fails() {
    let adapter = DebuggerAdapter::new("definitely-not-a-real-binary", Duration::from_millis(200));
    let err = adapter.start("", "").await.unwrap_err();
    assert!(matches!(err, mcp_nexus_core::CoreError::StartupFailed { .. }));
}
