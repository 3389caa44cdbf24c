//! The six worker operations, end to end over HTTP.

use serde_json::json;

use leasehold_core::message::msg_types;
use leasehold_core::wire::SERVER_NODE_ID;
use leasehold_core::{ExchangeApi, ExchangeError, Message, OutcomeCode, Token};

use crate::*;

#[tokio::test]
async fn test_full_round() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon
        .register(7, Some(context(7, json!({ "round": 1 }))))
        .await
        .unwrap();

    assert_eq!(client.get_run_ids_with_pending_messages().await.unwrap(), vec![7]);

    let token = client.request_token(7).await.unwrap();
    let inputs = client.pull_client_app_inputs(&token).await.unwrap();
    assert_eq!(inputs.run.run_id, 7);
    assert_eq!(inputs.run.fab_id, "acme/echo");
    assert_eq!(&inputs.fab.content[..], b"fab-bytes");
    assert_eq!(inputs.context.state, json!({ "round": 1 }));

    let status = client
        .push_client_app_outputs(&token, context(7, json!({ "round": 2 })))
        .await
        .unwrap();
    assert_eq!(status.code, OutcomeCode::Success);

    // inputs delivered and lease retired: nothing left to do
    assert!(client.get_run_ids_with_pending_messages().await.unwrap().is_empty());
    let outputs = daemon.service.outputs_for(7).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].context.state, json!({ "round": 2 }));
}

#[tokio::test]
async fn test_round_scheduled_mid_lease_stays_pending() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon
        .register(12, Some(context(12, json!({ "round": 1 }))))
        .await
        .unwrap();

    let token = client.request_token(12).await.unwrap();
    client.pull_client_app_inputs(&token).await.unwrap();
    let (status, _) = daemon
        .post("/admin/runs/12/context", &json!({ "state": { "round": 2 } }))
        .await
        .unwrap();
    assert_eq!(status, 200);

    let outcome = client
        .push_client_app_outputs(&token, context(12, json!({ "round": 1, "done": true })))
        .await
        .unwrap();
    assert!(outcome.is_success());

    assert_eq!(client.get_run_ids_with_pending_messages().await.unwrap(), vec![12]);
    let token = client.request_token(12).await.unwrap();
    let inputs = client.pull_client_app_inputs(&token).await.unwrap();
    assert_eq!(inputs.context.state, json!({ "round": 2 }));

    let (_, body) = daemon.get("/admin/runs/12/outputs").await.unwrap();
    assert_eq!(body["outputs"][0]["current"], false);
}

#[tokio::test]
async fn test_second_token_conflicts() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(3, Some(context(3, json!({})))).await.unwrap();

    let _first = client.request_token(3).await.unwrap();
    assert_eq!(
        client.request_token(3).await,
        Err(ExchangeError::LeaseConflict(3))
    );
    // the leased run is hidden from discovery
    assert!(client.get_run_ids_with_pending_messages().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_run_has_no_token() {
    let daemon = TestDaemon::start().await.unwrap();
    assert_eq!(
        daemon.client().request_token(404).await,
        Err(ExchangeError::UnknownRun(404))
    );
}

#[tokio::test]
async fn test_pull_inputs_is_idempotent() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon
        .register(9, Some(context(9, json!({ "w": [1, 2, 3] }))))
        .await
        .unwrap();

    let token = client.request_token(9).await.unwrap();
    let first = client.pull_client_app_inputs(&token).await.unwrap();
    let second = client.pull_client_app_inputs(&token).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_token_is_single_use_after_push() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(5, Some(context(5, json!({})))).await.unwrap();

    let token = client.request_token(5).await.unwrap();
    client.pull_client_app_inputs(&token).await.unwrap();
    let ok = client
        .push_client_app_outputs(&token, context(5, json!({ "done": true })))
        .await
        .unwrap();
    assert!(ok.is_success());

    assert_eq!(
        client
            .push_client_app_outputs(&token, context(5, json!({ "done": "again" })))
            .await,
        Err(ExchangeError::InvalidToken)
    );
    assert_eq!(
        client.pull_client_app_inputs(&token).await,
        Err(ExchangeError::InvalidToken)
    );
    assert_eq!(daemon.service.outputs_for(5).unwrap().len(), 1);
}

#[tokio::test]
async fn test_forged_token_rejected() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(1, Some(context(1, json!({})))).await.unwrap();
    let _real = client.request_token(1).await.unwrap();

    let forged = Token::from_wire(&"ab".repeat(32));
    assert_eq!(
        client.pull_client_app_inputs(&forged).await,
        Err(ExchangeError::InvalidToken)
    );
    assert_eq!(client.pull_message(&forged).await, Err(ExchangeError::InvalidToken));
}

#[tokio::test]
async fn test_expired_lease_reports_deadline_exceeded() {
    let daemon = TestDaemon::with_ttl(0).await.unwrap();
    let client = daemon.client();
    daemon.register(11, Some(context(11, json!({})))).await.unwrap();

    let token = client.request_token(11).await.unwrap();
    assert_eq!(
        client.pull_client_app_inputs(&token).await,
        Err(ExchangeError::Expired)
    );

    let status = client
        .push_client_app_outputs(&token, context(11, json!({ "late": true })))
        .await
        .unwrap();
    assert_eq!(status.code, OutcomeCode::DeadlineExceeded);
    assert!(daemon.service.outputs_for(11).unwrap().is_empty());

    // the work was never accepted, so the run is offered again
    assert_eq!(client.get_run_ids_with_pending_messages().await.unwrap(), vec![11]);
    let _fresh = client.request_token(11).await.unwrap();
}

#[tokio::test]
async fn test_context_for_other_run_is_mismatch() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(1, Some(context(1, json!({})))).await.unwrap();
    daemon.register(2, Some(context(2, json!({})))).await.unwrap();

    let token = client.request_token(1).await.unwrap();
    assert_eq!(
        client.push_client_app_outputs(&token, context(2, json!({}))).await,
        Err(ExchangeError::RunMismatch(2))
    );
    // the lease survives a rejected push
    let status = client
        .push_client_app_outputs(&token, context(1, json!({})))
        .await
        .unwrap();
    assert!(status.is_success());
}

#[tokio::test]
async fn test_message_round_trip() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(42, None).await.unwrap();

    let query = Message::new(42, SERVER_NODE_ID, 1, msg_types::QUERY, json!({ "q": 1 }));
    daemon.service.enqueue_message(42, query).unwrap();
    assert_eq!(client.get_run_ids_with_pending_messages().await.unwrap(), vec![42]);

    let token = client.request_token(42).await.unwrap();
    let got = client.pull_message(&token).await.unwrap();
    assert_eq!(got.content, json!({ "q": 1 }));
    assert_eq!(
        client.pull_message(&token).await,
        Err(ExchangeError::NoPendingMessage(42))
    );

    let mut reply = got.reply(json!({ "a": 1 }));
    reply.metadata.dst_node_id = SERVER_NODE_ID;
    client.push_message(&token, reply).await.unwrap();

    let inbox = daemon.service.drain_messages(42).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, json!({ "a": 1 }));
    assert_eq!(
        inbox[0].metadata.reply_to_message_id.as_deref(),
        Some(got.metadata.message_id.as_str())
    );
}

/// A run with no inputs enters the pending list only when a worker-bound
/// message is queued, stays hidden while leased, and leaves once drained.
#[tokio::test]
async fn test_run_42_pending_lifecycle() {
    let daemon = TestDaemon::start().await.unwrap();
    let client = daemon.client();
    daemon.register(42, None).await.unwrap();
    assert!(client.get_run_ids_with_pending_messages().await.unwrap().is_empty());

    let token = client.request_token(42).await.unwrap();
    let to_worker = Message::new(42, 1, 2, msg_types::TRAIN, json!({ "q": 1 }));
    client.push_message(&token, to_worker).await.unwrap();
    assert!(client.get_run_ids_with_pending_messages().await.unwrap().is_empty());

    daemon.service.leases().retire(&token);
    assert_eq!(client.get_run_ids_with_pending_messages().await.unwrap(), vec![42]);

    let token = client.request_token(42).await.unwrap();
    let msg = client.pull_message(&token).await.unwrap();
    assert_eq!(msg.content, json!({ "q": 1 }));
    daemon.service.leases().retire(&token);
    assert!(client.get_run_ids_with_pending_messages().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_error_body_on_the_wire() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon.register(8, Some(context(8, json!({})))).await.unwrap();
    let body = json!({ "run_id": 8 });

    let (status, _) = daemon.post("/v0/appio/request-token", &body).await.unwrap();
    assert_eq!(status, 200);
    let (status, err) = daemon.post("/v0/appio/request-token", &body).await.unwrap();
    assert_eq!(status, 409);
    assert_eq!(err["code"], "lease_conflict");
    assert_eq!(err["run_id"], 8);
}
