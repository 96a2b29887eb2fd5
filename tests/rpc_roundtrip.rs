use futures::stream;
use serde_json::json;

use ledger_payer::payment::PaymentResult;
use ledger_payer::rabbitmq::{serve, RabbitMQError};
use ledger_payer::testing::{envelope, executor_for, Event, FakeDialer, FakeNode, RecordingBroker};

#[tokio::test]
async fn requests_are_handled_one_at_a_time() {
    let broker = RecordingBroker::default();
    let mut handler = broker.handler(PaymentResult::success());

    let deliveries = stream::iter(
        ["alice", "bob", "carol"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                Ok((
                    envelope(json!({"Name": name, "Amount": "1"}), Some("replies"), Some(format!("c{i}").as_str())),
                    broker.acker(),
                ))
            })
            .collect::<Vec<_>>(),
    );

    let err = serve(deliveries, &broker, &mut handler).await.unwrap_err();
    assert!(matches!(err, RabbitMQError::ConsumeError(_)));

    let mut expected = Vec::new();
    for (i, name) in ["alice", "bob", "carol"].iter().enumerate() {
        expected.push(Event::Handled(name.to_string()));
        expected.push(Event::Reply {
            reply_to: "replies".to_string(),
            correlation_id: Some(format!("c{}", i)),
            body: json!({"success": true}),
        });
        expected.push(Event::Ack);
    }
    assert_eq!(broker.events(), expected);
}

#[tokio::test]
async fn executor_results_reach_the_caller() {
    let dialer = FakeDialer::new().with_node(
        "wss://node-b",
        FakeNode::default()
            .with_account("bob", 200)
            .with_account("broke", 300)
            .failing_broadcast("insufficient balance"),
    );
    let mut executor = executor_for(dialer.clone(), &["wss://node-a", "wss://node-b"]);
    let broker = RecordingBroker::default();

    let deliveries = stream::iter(vec![
        Ok((envelope(json!({"Name": "bob", "Amount": 5}), Some("replies"), Some("x1")), broker.acker())),
        Ok((envelope(json!({"Name": "ghost", "Amount": 5}), Some("replies"), Some("x2")), broker.acker())),
    ]);

    serve(deliveries, &broker, &mut executor).await.unwrap_err();

    let replies: Vec<_> = broker
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Reply { correlation_id, body, .. } => Some((correlation_id, body)),
            _ => None,
        })
        .collect();

    assert_eq!(
        replies,
        vec![
            (Some("x1".to_string()), json!({"success": false, "error": "insufficient balance"})),
            (Some("x2".to_string()), json!({"success": false, "error": "account ghost not found"})),
        ]
    );
    // node-a refused once, node-b was kept for both requests
    assert_eq!(dialer.dialed(), vec!["wss://node-a", "wss://node-b"]);
}

#[tokio::test]
async fn unreachable_ledger_is_answered_not_dropped() {
    let broker = RecordingBroker::default();
    let mut executor = executor_for(FakeDialer::new(), &["wss://down-1", "wss://down-2", "wss://down-3"]);

    let deliveries = stream::iter(vec![Ok((
        envelope(json!({"Name": "bob", "Amount": "0.5"}), Some("replies"), None),
        broker.acker(),
    ))]);
    serve(deliveries, &broker, &mut executor).await.unwrap_err();

    assert_eq!(
        broker.events(),
        vec![
            Event::Reply {
                reply_to: "replies".to_string(),
                correlation_id: None,
                body: json!({"success": false, "error": "cant connect to any node"}),
            },
            Event::Ack,
        ]
    );
}
