//! The library worker loop against a live daemon.

use std::time::Duration;

use serde_json::json;

use leasehold_core::message::msg_types;
use leasehold_core::wire::SERVER_NODE_ID;
use leasehold_core::Message;
use libleasehold::{AttemptOutcome, EchoApp, ExchangeClient, RetryPolicy, RetryingExchange, Worker};

use crate::*;

#[tokio::test]
async fn test_worker_completes_rounds() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon
        .register(1, Some(context(1, json!({ "rounds_completed": 0 }))))
        .await
        .unwrap();
    let worker = Worker::new(daemon.client(), EchoApp);

    assert_eq!(
        worker.run_once().await.unwrap(),
        AttemptOutcome::Completed { run_id: 1, messages: 0 }
    );
    assert_eq!(worker.run_once().await.unwrap(), AttemptOutcome::NoWork);

    let last = daemon.service.outputs_for(1).unwrap().pop().unwrap().context;
    assert_eq!(last.state["rounds_completed"], 1);
    assert!(last.state["fab_hash"].is_string());

    // schedule the next round from the last result
    daemon.service.submit_context(1, last).unwrap();
    worker.run_once().await.unwrap();
    let outputs = daemon.service.outputs_for(1).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1].context.state["rounds_completed"], 2);
}

#[tokio::test]
async fn test_worker_answers_messages() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon.register(2, Some(context(2, json!({})))).await.unwrap();
    for i in 0..3 {
        let msg = Message::new(2, SERVER_NODE_ID, 1, msg_types::QUERY, json!(i));
        daemon.service.enqueue_message(2, msg).unwrap();
    }

    let worker = Worker::new(daemon.client(), EchoApp);
    assert_eq!(
        worker.run_once().await.unwrap(),
        AttemptOutcome::Completed { run_id: 2, messages: 3 }
    );

    let replies = daemon.service.drain_messages(2).unwrap();
    let echoed: Vec<_> = replies.iter().map(|m| m.content["echo"].clone()).collect();
    assert_eq!(echoed, vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test]
async fn test_two_workers_never_share_a_run() {
    let daemon = TestDaemon::start().await.unwrap();
    daemon.register(9, Some(context(9, json!({})))).await.unwrap();

    let a = Worker::new(daemon.client(), EchoApp);
    let b = Worker::new(daemon.client(), EchoApp);
    let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
    let outcomes = [ra.unwrap(), rb.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, AttemptOutcome::Completed { run_id: 9, .. }))
        .count();
    assert_eq!(completed, 1, "outcomes: {outcomes:?}");
    assert_eq!(daemon.service.outputs_for(9).unwrap().len(), 1);
}

#[tokio::test]
async fn test_retrying_client_gives_up_on_dead_daemon() {
    // bind and drop to get a port nothing listens on
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    let worker = Worker::new(
        RetryingExchange::new(ExchangeClient::local(port), policy),
        EchoApp,
    );
    assert!(worker.run_once().await.is_err());
}
