//! Rate Subscription Streaming Integration Tests
//!
//! Tests registration over the bidirectional stream, fan-out on every rate
//! change, and cleanup when a client goes away.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::{Channel, Server};

use currency_service::application::ports::RateChangePublisher;
use currency_service::{
    CurrencyCode, CurrencyServer, CurrencyServerConfig, RateMonitor, RateTable, RateUpdateHub,
    proto::{
        Currency, RateRequest, RateResponse, currency_service_client::CurrencyServiceClient,
        currency_service_server::CurrencyServiceServer,
    },
};

struct TestServer {
    client: CurrencyServiceClient<Channel>,
    server: Arc<CurrencyServer>,
    monitor: RateMonitor,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Start a server wired to a hub and a monitor that is ticked by hand.
async fn setup_test_server() -> TestServer {
    let table = Arc::new(
        RateTable::from_rates([(CurrencyCode::Usd, 1.1), (CurrencyCode::Gbp, 0.85)]).unwrap(),
    );
    let cancel = CancellationToken::new();
    let hub = Arc::new(RateUpdateHub::with_defaults());

    let config = CurrencyServerConfig {
        version: "test-0.0.1".to_string(),
        subscriber_buffer: 16,
    };
    let server = Arc::new(CurrencyServer::new(config, Arc::clone(&table), cancel.clone()));
    let _update_loop = server.spawn_update_loop(hub.subscribe());

    let publisher: Arc<dyn RateChangePublisher> = hub;
    let monitor = RateMonitor::new(table, publisher, Duration::from_secs(3600));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = CurrencyServiceServer::from_arc(Arc::clone(&server));
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = CurrencyServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    TestServer {
        client,
        server,
        monitor,
        cancel,
        handle,
    }
}

/// Open a subscription stream, returning the request sender and response stream.
async fn subscribe(
    client: &mut CurrencyServiceClient<Channel>,
) -> (mpsc::Sender<RateRequest>, Streaming<RateResponse>) {
    let (tx, rx) = mpsc::channel(8);
    let responses = client
        .subscribe_rates(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    (tx, responses)
}

fn pair(base: Currency, destination: Currency) -> RateRequest {
    RateRequest {
        base: base.into(),
        destination: destination.into(),
    }
}

/// Wait until the server has registered `pairs` pairs in total.
async fn wait_for_pairs(server: &CurrencyServer, pairs: usize) {
    timeout(Duration::from_secs(2), async {
        while server.subscription_stats().pair_count != pairs {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("registrations should arrive");
}

async fn next_update(responses: &mut Streaming<RateResponse>) -> RateResponse {
    timeout(Duration::from_secs(2), responses.message())
        .await
        .expect("update should arrive")
        .unwrap()
        .expect("stream should stay open")
}

// =============================================================================
// Fan-out Tests
// =============================================================================

#[tokio::test]
async fn test_tick_pushes_current_rate() {
    let mut test = setup_test_server().await;
    let (tx, mut responses) = subscribe(&mut test.client).await;

    tx.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    wait_for_pairs(&test.server, 1).await;

    let signal = test.monitor.tick_once();
    let update = next_update(&mut responses).await;

    assert_eq!(update.base(), Currency::Eur);
    assert_eq!(update.destination(), Currency::Usd);
    assert_eq!(
        update.rate,
        signal
            .snapshot
            .rate(CurrencyCode::Eur, CurrencyCode::Usd)
            .unwrap()
    );

    test.shutdown();
}

#[tokio::test]
async fn test_one_update_per_pair_per_tick() {
    let mut test = setup_test_server().await;
    let (tx, mut responses) = subscribe(&mut test.client).await;

    tx.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    tx.send(pair(Currency::Usd, Currency::Gbp)).await.unwrap();
    wait_for_pairs(&test.server, 2).await;

    for _ in 0..2 {
        test.monitor.tick_once();

        let first = next_update(&mut responses).await;
        let second = next_update(&mut responses).await;
        assert_eq!(first.destination(), Currency::Usd);
        assert_eq!(second.base(), Currency::Usd);
        assert_eq!(second.destination(), Currency::Gbp);
    }

    // Nothing extra queued after two ticks
    let extra = timeout(Duration::from_millis(100), responses.message()).await;
    assert!(extra.is_err());

    test.shutdown();
}

#[tokio::test]
async fn test_fan_out_to_multiple_connections() {
    let mut test = setup_test_server().await;
    let (tx_a, mut responses_a) = subscribe(&mut test.client).await;
    let (tx_b, mut responses_b) = subscribe(&mut test.client).await;

    tx_a.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    tx_b.send(pair(Currency::Gbp, Currency::Usd)).await.unwrap();
    wait_for_pairs(&test.server, 2).await;
    assert_eq!(test.server.subscription_stats().connection_count, 2);

    test.monitor.tick_once();

    let a = next_update(&mut responses_a).await;
    let b = next_update(&mut responses_b).await;
    assert_eq!(a.base(), Currency::Eur);
    assert_eq!(b.base(), Currency::Gbp);

    test.shutdown();
}

#[tokio::test]
async fn test_same_pair_pushed_to_each_connection() {
    let mut test = setup_test_server().await;
    let (tx_a, mut responses_a) = subscribe(&mut test.client).await;
    let (tx_b, mut responses_b) = subscribe(&mut test.client).await;

    tx_a.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    tx_b.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    wait_for_pairs(&test.server, 2).await;

    let signal = test.monitor.tick_once();
    let expected = signal
        .snapshot
        .rate(CurrencyCode::Eur, CurrencyCode::Usd)
        .unwrap();

    for responses in [&mut responses_a, &mut responses_b] {
        let update = next_update(responses).await;
        assert_eq!(update.base(), Currency::Eur);
        assert_eq!(update.destination(), Currency::Usd);
        assert_eq!(update.rate, expected);
    }

    // Exactly one push each for the cycle
    for responses in [&mut responses_a, &mut responses_b] {
        let extra = timeout(Duration::from_millis(100), responses.message()).await;
        assert!(extra.is_err());
    }

    test.shutdown();
}

#[tokio::test]
async fn test_self_pair_pushes_one() {
    let mut test = setup_test_server().await;
    let (tx, mut responses) = subscribe(&mut test.client).await;

    tx.send(pair(Currency::Usd, Currency::Usd)).await.unwrap();
    wait_for_pairs(&test.server, 1).await;

    test.monitor.tick_once();
    let update = next_update(&mut responses).await;

    assert_eq!(update.rate, 1.0);

    test.shutdown();
}

#[tokio::test]
async fn test_unknown_currency_registration_ignored() {
    let mut test = setup_test_server().await;
    let (tx, mut responses) = subscribe(&mut test.client).await;

    tx.send(RateRequest {
        base: 999,
        destination: Currency::Usd.into(),
    })
    .await
    .unwrap();
    tx.send(pair(Currency::Eur, Currency::Gbp)).await.unwrap();
    wait_for_pairs(&test.server, 1).await;

    test.monitor.tick_once();
    let update = next_update(&mut responses).await;
    assert_eq!(update.destination(), Currency::Gbp);

    test.shutdown();
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[tokio::test]
async fn test_client_end_of_stream_removes_subscription() {
    let mut test = setup_test_server().await;
    let (tx, mut responses) = subscribe(&mut test.client).await;

    tx.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    wait_for_pairs(&test.server, 1).await;

    drop(tx);
    wait_for_pairs(&test.server, 0).await;
    assert_eq!(test.server.subscription_stats().connection_count, 0);

    // The response stream completes instead of receiving more updates
    test.monitor.tick_once();
    let end = timeout(Duration::from_secs(2), responses.message())
        .await
        .unwrap()
        .unwrap();
    assert!(end.is_none());

    test.shutdown();
}

#[tokio::test]
async fn test_closed_connection_does_not_affect_others() {
    let mut test = setup_test_server().await;
    let (tx_a, responses_a) = subscribe(&mut test.client).await;
    let (tx_b, mut responses_b) = subscribe(&mut test.client).await;

    tx_a.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    tx_b.send(pair(Currency::Eur, Currency::Usd)).await.unwrap();
    wait_for_pairs(&test.server, 2).await;

    drop(responses_a);
    drop(tx_a);
    wait_for_pairs(&test.server, 1).await;

    test.monitor.tick_once();
    let update = next_update(&mut responses_b).await;
    assert_eq!(update.destination(), Currency::Usd);

    test.shutdown();
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let mut test = setup_test_server().await;
    let (_tx, mut responses) = subscribe(&mut test.client).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    test.cancel.cancel();

    let end = timeout(Duration::from_secs(2), responses.message())
        .await
        .unwrap()
        .unwrap();
    assert!(end.is_none());

    test.handle.abort();
}
