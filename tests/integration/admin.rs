//! Admin surface: registration, scheduling, status and shutdown.

use serde_json::json;

use leasehold_core::ExchangeApi;

use crate::*;

#[tokio::test]
async fn test_register_and_schedule_over_http() {
    let daemon = TestDaemon::start().await.unwrap();
    let run = daemon.register(20, None).await.unwrap();
    assert_eq!(run.run_id, 20);
    assert!(!run.fab_hash.is_empty());

    let (status, _) = daemon
        .post("/admin/runs/20/context", &json!({ "state": { "lr": 0.1 } }))
        .await
        .unwrap();
    assert_eq!(status, 200);

    let client = daemon.client();
    assert_eq!(client.get_run_ids_with_pending_messages().await.unwrap(), vec![20]);
    let token = client.request_token(20).await.unwrap();
    let inputs = client.pull_client_app_inputs(&token).await.unwrap();
    assert_eq!(inputs.context.run_id, 20);
    assert_eq!(inputs.context.state, json!({ "lr": 0.1 }));
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon.register(1, None).await.unwrap();
    assert!(daemon.register(1, None).await.is_err());
}

#[tokio::test]
async fn test_schedule_unknown_run_is_404() {
    let daemon = TestDaemon::start().await.unwrap();
    let (status, body) = daemon
        .post("/admin/runs/77/context", &json!({ "state": {} }))
        .await
        .unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["code"], "unknown_run");
}

#[tokio::test]
async fn test_enqueue_and_drain_over_http() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon.register(4, None).await.unwrap();

    let msg = leasehold_core::Message::new(
        4,
        0,
        1,
        leasehold_core::message::msg_types::TRAIN,
        json!("go"),
    );
    let (status, body) = daemon
        .post("/admin/runs/4/messages", &serde_json::to_value(&msg).unwrap())
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert!(body["message_id"].is_string());

    let (_, status_body) = daemon.get("/status").await.unwrap();
    assert_eq!(status_body["pending_runs"], json!([4]));
    assert_eq!(status_body["queues"][0]["to_worker"], 1);

    // nothing has come back from the worker yet
    let (status, drained) = daemon.get("/admin/runs/4/messages").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(drained["messages"], json!([]));
}

#[tokio::test]
async fn test_status_shape() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon.register(1, Some(context(1, json!({})))).await.unwrap();
    let _token = daemon.client().request_token(1).await.unwrap();

    let (status, body) = daemon.get("/status").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["runs"], 1);
    assert_eq!(body["message_auth"], "active_lease");
    assert_eq!(body["stats"]["issued"], 1);
    let lease = &body["leases"][0];
    assert_eq!(lease["run_id"], 1);
    assert_eq!(lease["state"], "ISSUED");
    assert!(lease["remaining_ms"].as_u64().unwrap() > 0);
    // the token itself never appears, only its fingerprint
    assert_eq!(lease["lease"].as_str().unwrap().len(), 16);
}

#[tokio::test]
async fn test_discard_revokes_lease() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(6, Some(context(6, json!({})))).await.unwrap();
    let token = client.request_token(6).await.unwrap();

    let resp = reqwest::Client::new()
        .delete(format!("{}/admin/runs/6", daemon.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    assert!(client.pull_client_app_inputs(&token).await.is_err());
    assert!(client.get_run_ids_with_pending_messages().await.unwrap().is_empty());
    let (status, _) = daemon.get("/admin/runs/6/outputs").await.unwrap();
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_shutdown_broadcasts() {
    let mut daemon = TestDaemon::start().await.unwrap();
    let (status, body) = daemon.post("/daemon/shutdown", &json!({})).await.unwrap();
    assert_eq!(status, 200);
    assert!(body["message"].as_str().unwrap().contains("shutting down"));
    assert!(daemon.shutdown_rx.try_recv().is_ok());
}
