//! End-to-end pipelining behaviour over in-memory and TCP streams.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::pipeline;
use futures::FutureExt;
use redis_proxy::{
    ProxyFilterConfig,
    ProxyFilterConfigRef,
    ProxyServer,
    ProxySettings,
    RespValue,
    SplitError,
    SplitResult,
    serve_connection,
    splitter::TaskSplitter,
};
use rstest::{fixture, rstest};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, duplex},
    net::TcpStream,
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

#[fixture]
fn config() -> ProxyFilterConfigRef {
    Arc::new(
        ProxyFilterConfig::new(ProxySettings::new("backend", "pipeline")).expect("valid settings"),
    )
}

/// Replies to `DELAY <ms> <payload>` with `payload` after `ms`
/// milliseconds and fails `FAIL <reason>` with an upstream error.
async fn delayed_reply(command: RespValue) -> SplitResult {
    let args: Vec<String> = command
        .command_args()
        .ok_or(SplitError::InvalidRequest)?
        .into_iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    match args.as_slice() {
        [name, ms, payload] if name == "DELAY" => {
            let ms: u64 = ms.parse().map_err(|_| SplitError::InvalidRequest)?;
            sleep(Duration::from_millis(ms)).await;
            Ok(RespValue::bulk(payload.as_str()))
        }
        [name, reason] if name == "FAIL" => Err(SplitError::Upstream(reason.clone())),
        _ => Err(SplitError::InvalidRequest),
    }
}

fn delayed_echo() -> TaskSplitter { TaskSplitter::new(|command| delayed_reply(command).boxed()) }

#[rstest]
#[tokio::test(start_paused = true)]
async fn replies_follow_request_order_not_completion_order(config: ProxyFilterConfigRef) {
    let (mut client, server) = duplex(4096);
    let driver = tokio::spawn(serve_connection(
        server,
        Arc::new(delayed_echo()),
        config,
        CancellationToken::new(),
    ));

    client
        .write_all(&pipeline(&[
            &["DELAY", "30", "a"],
            &["DELAY", "10", "b"],
            &["DELAY", "20", "c"],
        ]))
        .await
        .expect("write pipeline");

    let expected = b"$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n";
    let mut reply = vec![0; expected.len()];
    client.read_exact(&mut reply).await.expect("read replies");
    assert_eq!(reply, expected);

    drop(client);
    driver.await.expect("join driver").expect("driver result");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_request_answers_in_its_own_slot(config: ProxyFilterConfigRef) {
    let (mut client, server) = duplex(4096);
    let driver = tokio::spawn(serve_connection(
        server,
        Arc::new(delayed_echo()),
        config,
        CancellationToken::new(),
    ));

    client
        .write_all(&pipeline(&[
            &["DELAY", "20", "first"],
            &["FAIL", "boom"],
            &["DELAY", "5", "last"],
        ]))
        .await
        .expect("write pipeline");

    let expected = b"$5\r\nfirst\r\n-ERR upstream failure: boom\r\n$4\r\nlast\r\n";
    let mut reply = vec![0; expected.len()];
    client.read_exact(&mut reply).await.expect("read replies");
    assert_eq!(reply, expected);

    drop(client);
    driver.await.expect("join driver").expect("driver result");
}

/// Counts futures dropped before they finished.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) { self.0.fetch_add(1, Ordering::SeqCst); }
}

#[rstest]
#[tokio::test]
async fn client_disconnect_cancels_outstanding_requests(config: ProxyFilterConfigRef) {
    let dropped = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let splitter = {
        let dropped = Arc::clone(&dropped);
        let started = Arc::clone(&started);
        TaskSplitter::new(move |_command| {
            let guard = DropCounter(Arc::clone(&dropped));
            let started = Arc::clone(&started);
            async move {
                let _guard = guard;
                started.fetch_add(1, Ordering::SeqCst);
                futures::future::pending::<()>().await;
                Ok(RespValue::Integer(0))
            }
            .boxed()
        })
    };

    let (mut client, server) = duplex(4096);
    let driver = tokio::spawn(serve_connection(
        server,
        Arc::new(splitter),
        config,
        CancellationToken::new(),
    ));
    client
        .write_all(&pipeline(&[&["GET", "a"], &["GET", "b"], &["GET", "c"]]))
        .await
        .expect("write pipeline");

    timeout(Duration::from_secs(1), async {
        while started.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("all requests started");

    drop(client);
    driver.await.expect("join driver").expect("driver result");

    timeout(Duration::from_secs(1), async {
        while dropped.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("every outstanding request is aborted");
}

#[rstest]
#[tokio::test]
async fn tcp_server_pipelines_replies(config: ProxyFilterConfigRef) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = ProxyServer::bind(
        ([127, 0, 0, 1], 0).into(),
        Arc::new(delayed_echo()),
        config,
    )
    .await
    .expect("bind")
    .ready_signal(ready_tx);
    let addr = server.local_addr().expect("local addr");
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("server ready");

    let mut client = TcpStream::connect(addr).await.expect("connect");
    let commands: Vec<Vec<String>> = (0..20)
        .map(|i| vec!["DELAY".into(), ((20 - i) % 7).to_string(), format!("v{i}")])
        .collect();
    let mut request = Vec::new();
    let mut expected = Vec::new();
    for (i, command) in commands.iter().enumerate() {
        let args: Vec<&str> = command.iter().map(String::as_str).collect();
        request.extend(pipeline(&[args.as_slice()]));
        let payload = format!("v{i}");
        expected.extend(format!("${}\r\n{payload}\r\n", payload.len()).into_bytes());
    }
    client.write_all(&request).await.expect("write pipeline");

    let mut reply = vec![0; expected.len()];
    timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .expect("replies arrive")
        .expect("read replies");
    assert_eq!(reply, expected);

    let _ = stop_tx.send(());
    handle.await.expect("join server").expect("server result");
}
