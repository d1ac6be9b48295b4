//! Tests for server runtime behaviour.

use std::{
    io,
    sync::{Arc, Mutex},
};

use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::yield_now,
    time::{Duration, Instant, advance, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    AcceptLoopOptions,
    BackoffConfig,
    ProxyContext,
    accept::MockAcceptListener,
    accept_loop,
};
use crate::{
    config::ProxyFilterConfigRef,
    server::{
        ProxyServer,
        test_util::{free_listener, proxy_config},
    },
    splitter::LoopbackSplitter,
};

fn context(config: ProxyFilterConfigRef) -> ProxyContext {
    ProxyContext {
        splitter: Arc::new(LoopbackSplitter),
        config,
    }
}

#[rstest]
#[tokio::test]
async fn run_with_immediate_shutdown(
    free_listener: std::net::TcpListener,
    proxy_config: ProxyFilterConfigRef,
) {
    let server = ProxyServer::bind_existing_listener(
        free_listener,
        Arc::new(LoopbackSplitter),
        proxy_config,
    )
    .expect("bind");
    let result = timeout(
        Duration::from_secs(1),
        server.run_with_shutdown(tokio::time::sleep(Duration::from_millis(10))),
    )
    .await;
    assert!(result.expect("server did not finish in time").is_ok());
}

#[rstest]
#[tokio::test]
async fn serves_clients_and_closes_them_on_shutdown(
    free_listener: std::net::TcpListener,
    proxy_config: ProxyFilterConfigRef,
) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = ProxyServer::bind_existing_listener(
        free_listener,
        Arc::new(LoopbackSplitter),
        proxy_config,
    )
    .expect("bind")
    .ready_signal(ready_tx);
    let addr = server.local_addr().expect("local addr");
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("server ready");

    let mut client = TcpStream::connect(addr).await.expect("connect");
    client
        .write_all(b"*1\r\n$4\r\nPING\r\n")
        .await
        .expect("write ping");
    let mut reply = [0; 7];
    client.read_exact(&mut reply).await.expect("read pong");
    assert_eq!(&reply, b"+PONG\r\n");

    let _ = stop_tx.send(());
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("server stops with a client attached")
        .expect("join server")
        .expect("server result");

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.expect("read to eof");
    assert!(rest.is_empty());
}

#[rstest]
#[tokio::test]
async fn accept_loop_stops_on_shutdown(proxy_config: ProxyFilterConfigRef) {
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let listener = Arc::new(
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener"),
    );

    tracker.spawn(accept_loop(
        listener,
        context(proxy_config),
        AcceptLoopOptions {
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig::default(),
        },
    ));

    token.cancel();
    tracker.close();
    assert!(timeout(Duration::from_millis(100), tracker.wait()).await.is_ok());
}

fn failing_listener(calls: &Arc<Mutex<Vec<Instant>>>, num_calls: usize) -> MockAcceptListener {
    let mut listener = MockAcceptListener::new();
    let call_log = Arc::clone(calls);
    listener
        .expect_accept()
        .returning(move || {
            let call_log = Arc::clone(&call_log);
            Box::pin(async move {
                call_log.lock().expect("lock").push(Instant::now());
                Err(io::Error::other("mock error"))
            })
        })
        .times(num_calls);
    listener
        .expect_local_addr()
        .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
        .times(num_calls);
    listener
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn accept_failures_back_off_exponentially(proxy_config: ProxyFilterConfigRef) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 4));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };

    tracker.spawn(accept_loop(
        listener,
        context(proxy_config),
        AcceptLoopOptions {
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff,
        },
    ));

    yield_now().await;
    assert_eq!(calls.lock().expect("lock").len(), 1);

    for ms in [5, 10, 20] {
        advance(Duration::from_millis(ms)).await;
        yield_now().await;
    }

    token.cancel();
    tracker.close();
    tracker.wait().await;

    let calls = calls.lock().expect("lock");
    let intervals: Vec<Duration> = calls
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]))
        .collect();
    assert_eq!(
        intervals,
        [5, 10, 20].map(Duration::from_millis).to_vec()
    );
}
