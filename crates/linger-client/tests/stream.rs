use std::time::Duration;

use futures::StreamExt;
use http::StatusCode;
use linger_client::{BackoffPolicy, LingerClient, Message, StreamEnd};
use linger_transport_memory::{Fault, MemoryServer};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::time::Instant;

fn client(server: &MemoryServer) -> LingerClient {
    LingerClient::builder()
        .transport(server.transport())
        .backoff(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(2),
        ))
        .long_poll_wait(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn bodies(messages: Vec<Message<Value>>) -> Vec<Value> {
    messages.into_iter().map(|message| message.body).collect()
}

#[tokio::test(start_paused = true)]
async fn test_exactly_max_retries_plus_one_failures_exhaust() {
    for max_retries in [1, 2, 5] {
        let server = MemoryServer::new();
        server.fail_fetches(max_retries as usize + 1, Fault::Network);
        let client = client(&server);
        client.post("jobs", &json!("never seen")).await.unwrap();

        let mut stream = client.stream("jobs", max_retries).unwrap();
        assert_eq!(stream.next().await, None);
        assert_eq!(
            stream.end_reason(),
            Some(StreamEnd::Exhausted {
                failures: max_retries + 1
            })
        );
        assert_eq!(server.fetch_count(), u64::from(max_retries) + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_max_retries_failures_are_survived() {
    let server = MemoryServer::new();
    server.fail_fetches(3, Fault::Status(StatusCode::BAD_GATEWAY));
    let client = client(&server);
    client.post("jobs", &json!("survivor")).await.unwrap();

    let mut stream = client.stream("jobs", 3).unwrap();
    let message = stream.next().await.unwrap();

    assert_eq!(message.body, json!("survivor"));
    assert_eq!(stream.end_reason(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_retries_never_stop() {
    let server = MemoryServer::new();
    server.fail_fetches(200, Fault::Network);
    server.fail_fetches(50, Fault::Timeout);
    server.fail_fetches(50, Fault::Malformed);
    let client = client(&server);
    client.post("jobs", &json!("finally")).await.unwrap();

    let mut stream = client.stream("jobs", 0).unwrap();
    let message = stream.next().await.unwrap();

    assert_eq!(message.body, json!("finally"));
    assert_eq!(server.fetch_count(), 301);
}

#[tokio::test(start_paused = true)]
async fn test_intermittent_failures_never_exhaust() {
    let server = MemoryServer::new();
    let client = client(&server);
    for n in 0..3 {
        client.post("jobs", &json!(n)).await.unwrap();
    }

    // Each pair of failures is followed by an empty poll, which resets the count.
    for _ in 0..3 {
        server.push_fault(Fault::Network);
        server.push_fault(Fault::Status(StatusCode::INTERNAL_SERVER_ERROR));
        server.push_fault(Fault::Empty);
    }

    let messages: Vec<_> = client.stream("jobs", 2).unwrap().take(3).collect().await;
    assert_eq!(bodies(messages), vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_alternating_failures_with_single_retry() {
    let server = MemoryServer::new();
    let client = client(&server);
    for n in 0..3 {
        client.post("jobs", &json!(n)).await.unwrap();
    }
    for _ in 0..3 {
        server.push_fault(Fault::Network);
        server.push_fault(Fault::Empty);
    }

    let messages: Vec<_> = client.stream("jobs", 1).unwrap().take(3).collect().await;
    assert_eq!(bodies(messages), vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_polls_never_back_off() {
    let server = MemoryServer::new();
    server.fail_fetches(100, Fault::Empty);
    let client = client(&server);
    client.post("jobs", &json!("after empties")).await.unwrap();

    let started = Instant::now();
    let mut stream = client.stream("jobs", 1).unwrap();
    let message = stream.next().await.unwrap();

    assert_eq!(message.body, json!("after empties"));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(server.fetch_count(), 101);
}

#[tokio::test(start_paused = true)]
async fn test_server_order_is_preserved() {
    let server = MemoryServer::new();
    let client = client(&server);
    for body in ["A", "B", "C"] {
        client.post("jobs", &json!(body)).await.unwrap();
    }

    let messages: Vec<_> = client.stream("jobs", 0).unwrap().take(3).collect().await;
    assert_eq!(bodies(messages), vec![json!("A"), json!("B"), json!("C")]);
}

#[tokio::test(start_paused = true)]
async fn test_stream_waits_for_late_messages() {
    let server = MemoryServer::new();
    let client = client(&server);

    let producer = {
        let client = client.clone();
        tokio::spawn(async move {
            for n in 0..3 {
                tokio::time::sleep(Duration::from_secs(7)).await;
                client.post("jobs", &json!(n)).await.unwrap();
            }
        })
    };

    let messages: Vec<_> = client.stream("jobs", 1).unwrap().take(3).collect().await;
    assert_eq!(bodies(messages), vec![json!(0), json!(1), json!(2)]);
    producer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_ends_waiting_stream() {
    let server = MemoryServer::new();
    let client = client(&server);
    let mut stream = client.stream("jobs", 0).unwrap();

    let closer = {
        let client = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            client.close();
        })
    };

    let started = Instant::now();
    assert_eq!(stream.next().await, None);
    assert_eq!(stream.end_reason(), Some(StreamEnd::Closed));
    assert!(started.elapsed() < Duration::from_secs(5));
    closer.await.unwrap();

    assert!(matches!(
        client.fetch("jobs", true).await,
        Err(linger_client::Error::ClientClosed)
    ));
    assert!(matches!(
        client.post("jobs", &json!(1)).await,
        Err(linger_client::Error::ClientClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_stream_stops_fetching() {
    let server = MemoryServer::new();
    let client = client(&server);
    client.post("jobs", &json!(1)).await.unwrap();

    let mut stream = client.stream("jobs", 0).unwrap();
    assert!(stream.next().await.is_some());
    drop(stream);

    let fetches = server.fetch_count();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.fetch_count(), fetches);
}
