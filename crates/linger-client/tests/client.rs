use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use http::StatusCode;
use linger_client::{
    BackoffPolicy, BlockingLingerClient, ClientBuilder, Error, LingerClient,
    RequestOptions, StreamEnd, TextCodec,
};
use linger_transport_memory::{Fault, MemoryServer};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn builder(server: &MemoryServer) -> ClientBuilder {
    ClientBuilder::new()
        .transport(server.transport())
        .backoff(BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
        ))
        .long_poll_wait(Duration::from_secs(1))
}

fn script(server: &MemoryServer) {
    server.push_fault(Fault::Network);
    server.push_fault(Fault::Empty);
    server.push_fault(Fault::Malformed);
    server.push_fault(Fault::Status(StatusCode::BAD_GATEWAY));
}

async fn seed(client: &LingerClient) {
    for body in ["A", "B", "C"] {
        client.post("jobs", &json!(body)).await.unwrap();
    }
}

#[test]
fn test_blocking_and_native_streams_agree() {
    // Native: three messages behind a failure script, then three failures.
    let native_server = MemoryServer::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (native, native_end) = runtime.block_on(async {
        let client = builder(&native_server).build().unwrap();
        seed(&client).await;
        script(&native_server);

        let mut stream = client.stream("jobs", 2).unwrap();
        let mut bodies = Vec::new();
        while let Some(message) = stream.next().await {
            bodies.push(message.body);
            if bodies.len() == 3 {
                native_server.fail_fetches(3, Fault::Network);
            }
        }
        (bodies, stream.end_reason())
    });

    // Bridged: same server behavior, driven from a plain iterator.
    let bridged_server = MemoryServer::new();
    let client: BlockingLingerClient = builder(&bridged_server).build_blocking().unwrap();
    client.block_on(seed(client.client()));
    script(&bridged_server);

    let mut stream = client.stream("jobs", 2).unwrap();
    let mut bridged = Vec::new();
    for message in stream.by_ref() {
        bridged.push(message.body);
        if bridged.len() == 3 {
            bridged_server.fail_fetches(3, Fault::Network);
        }
    }

    assert_eq!(native, vec![json!("A"), json!("B"), json!("C")]);
    assert_eq!(bridged, native);
    assert_eq!(native_end, Some(StreamEnd::Exhausted { failures: 3 }));
    assert_eq!(stream.end_reason(), native_end);
    assert_eq!(native_server.fetch_count(), bridged_server.fetch_count());
}

#[tokio::test]
async fn test_post_then_fetch_round_trip() {
    let server = MemoryServer::new();
    let client = builder(&server).build().unwrap();

    let receipt = client.post("t", &json!({"msg": "hello"})).await.unwrap();

    let message = client.fetch("t", false).await.unwrap().unwrap();
    assert_eq!(message.id, receipt.id);
    assert_eq!(message.channel, "t");
    assert_eq!(message.body, json!({"msg": "hello"}));
    assert_eq!(message.delivered, 1);
    assert_eq!(message.mimetype.as_deref(), Some("application/json"));

    assert_eq!(client.fetch("t", true).await.unwrap(), None);
}

#[test]
fn test_blocking_round_trip() {
    let server = MemoryServer::new();
    let client = builder(&server).build_blocking().unwrap();

    client.post("t", &json!({"msg": "hello"})).unwrap();
    let message = client.fetch("t", false).unwrap().unwrap();
    assert_eq!(message.body, json!({"msg": "hello"}));
    assert_eq!(client.fetch("t", true).unwrap(), None);

    client.close();
    assert!(client.closed());
    assert_matches!(client.fetch("t", true), Err(Error::ClientClosed));
}

#[tokio::test(start_paused = true)]
async fn test_hidden_message_is_redelivered_until_deleted() {
    let server = MemoryServer::new();
    let client = builder(&server).build().unwrap();

    client
        .post_with("jobs", &json!("work"), &RequestOptions::new().timeout(10))
        .await
        .unwrap();

    let first = client.fetch("jobs", true).await.unwrap().unwrap();
    assert_eq!(first.timeout, 10);
    assert_eq!(client.fetch("jobs", true).await.unwrap(), None);
    assert_eq!(
        client.channel_stats("jobs").await.unwrap(),
        linger_client::ChannelStats { ready: 0, hidden: 1 }
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    let second = client.fetch("jobs", true).await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.delivered, 2);

    client.delete(&second.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.fetch("jobs", true).await.unwrap(), None);

    assert_matches!(
        client.delete(&second.id).await,
        Err(Error::Server { status, .. }) if status == StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_priority_orders_delivery() {
    let server = MemoryServer::new();
    let client = builder(&server).build().unwrap();

    for (body, priority) in [("low", 5), ("urgent", -1), ("normal", 0), ("normal too", 0)] {
        client
            .post_with("jobs", &json!(body), &RequestOptions::new().priority(priority))
            .await
            .unwrap();
    }

    let mut bodies = Vec::new();
    while let Some(message) = client.fetch("jobs", true).await.unwrap() {
        bodies.push(message.body);
    }
    assert_eq!(
        bodies,
        vec![json!("urgent"), json!("normal"), json!("normal too"), json!("low")]
    );
}

#[tokio::test]
async fn test_topics_and_subscriptions() {
    let server = MemoryServer::new();
    let client = builder(&server).build().unwrap();

    client.subscribe("audit", "events").await.unwrap();
    client
        .subscribe_with("mail", "events", &RequestOptions::new().priority(2))
        .await
        .unwrap();

    assert_eq!(client.topics().await.unwrap(), vec!["events"]);
    assert_eq!(client.subscriptions("mail").await.unwrap(), vec!["events"]);
    assert_eq!(client.subscribers("events").await.unwrap(), vec!["audit", "mail"]);

    let receipt = client.publish("events", &json!({"kind": "login"})).await.unwrap();
    assert_eq!(receipt.ids.len(), 2);

    let mail = client.fetch("mail", true).await.unwrap().unwrap();
    assert_eq!(mail.topic.as_deref(), Some("events"));
    assert_eq!(mail.priority, 2);

    client.unsubscribe("mail", "events").await.unwrap();
    assert_eq!(client.subscribers("events").await.unwrap(), vec!["audit"]);
    assert_matches!(
        client.unsubscribe("mail", "events").await,
        Err(Error::Server { .. })
    );

    let stats: Value = client.stats().await.unwrap();
    assert_eq!(stats["posted"], json!(2));
    assert_eq!(stats["delivered"], json!(1));
}

#[tokio::test]
async fn test_drain_and_channel_listing() {
    let server = MemoryServer::new();
    let client = builder(&server).build().unwrap();

    client.post("a", &json!(1)).await.unwrap();
    client.post("b", &json!(2)).await.unwrap();
    assert_eq!(client.channels().await.unwrap(), vec!["a", "b"]);

    client.drain("a").await.unwrap();
    assert_eq!(client.channels().await.unwrap(), vec!["b"]);
    assert_eq!(client.fetch("a", true).await.unwrap(), None);
}

#[tokio::test]
async fn test_text_codec_and_credentials() {
    let server = MemoryServer::new()
        .with_credentials(linger_client::BasicAuth::new("ops", Some("pw".to_string())));

    let anonymous = builder(&server).build().unwrap();
    assert_matches!(
        anonymous.channels().await,
        Err(Error::Server { status, .. }) if status == StatusCode::UNAUTHORIZED
    );

    let client = builder(&server)
        .codec(TextCodec)
        .default_options(RequestOptions::new().basic_auth("ops", Some("pw".to_string())))
        .build()
        .unwrap();

    client.post("notes", &"plain words".to_string()).await.unwrap();
    let message = client.fetch("notes", true).await.unwrap().unwrap();
    assert_eq!(message.body, "plain words");
    assert_eq!(message.mimetype.as_deref(), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn test_single_calls_surface_failures() {
    let server = MemoryServer::new();
    let client = builder(&server).build().unwrap();

    server.push_fault(Fault::Network);
    server.push_fault(Fault::Malformed);
    server.push_fault(Fault::Status(StatusCode::SERVICE_UNAVAILABLE));

    assert_matches!(client.fetch("jobs", true).await, Err(Error::Network(_)));
    assert_matches!(client.fetch("jobs", true).await, Err(Error::Decode(_)));
    assert_matches!(
        client.fetch("jobs", true).await,
        Err(Error::Server { status, .. }) if status == StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(client.fetch("jobs", true).await.unwrap(), None);
}
