//! Connection lifecycle: close, reconnect and connect failures.

mod support;

use std::time::Duration;

use rstest::rstest;
use wirecall::{ErrorCode, RpcClient};

use support::spawn_echo_server;

wirecall::rpc_function! {
    fn echo(input: String) -> String;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[rstest]
#[tokio::test]
#[timeout(Duration::from_secs(20))]
async fn close_then_reconnect() {
    let addr = spawn_echo_server().await;
    let mut client = RpcClient::new(3);
    client
        .connect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect("connect");
    assert!(!client.has_closed());

    let value = client.call::<echo>("one".to_owned()).await.expect("call");
    assert_eq!(value, "one");

    client.close();
    assert!(client.has_closed());

    // A closed client refuses both calls and plain connects.
    let err = client
        .call::<echo>("two".to_owned())
        .await
        .expect_err("call on closed client");
    assert_eq!(err.error_code(), Some(ErrorCode::IoError));

    let err = client
        .connect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect_err("connect on closed client");
    assert_eq!(err.error_code(), Some(ErrorCode::IoError));
    assert_eq!(err.message, "client has been closed");

    client
        .reconnect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect("reconnect");
    assert!(!client.has_closed());

    let value = client
        .call::<echo>("three".to_owned())
        .await
        .expect("call after reconnect");
    assert_eq!(value, "three");
}

#[rstest]
#[tokio::test]
#[timeout(Duration::from_secs(20))]
async fn reconnect_accepts_endpoint_strings() {
    let addr = spawn_echo_server().await;
    let endpoint = format!("{}:{}", addr.ip(), addr.port());

    let mut client = RpcClient::new(3);
    client
        .connect_endpoint(&endpoint, CONNECT_TIMEOUT)
        .await
        .expect("connect");
    assert_eq!(client.host(), addr.ip().to_string());
    assert_eq!(client.port(), addr.port().to_string());
    client.close();

    client
        .reconnect_endpoint(&endpoint, CONNECT_TIMEOUT)
        .await
        .expect("reconnect");
    let value = client.call::<echo>("hi".to_owned()).await.expect("call");
    assert_eq!(value, "hi");
}

#[rstest]
#[tokio::test]
#[timeout(Duration::from_secs(20))]
async fn connect_to_dead_endpoint_is_not_connected() {
    // Bind a listener, learn its port, then drop it so nothing accepts.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let mut client = RpcClient::new(3);
    let err = client
        .connect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect_err("connect to dead endpoint");
    assert_eq!(err.error_code(), Some(ErrorCode::NotConnected));
}

#[rstest]
#[tokio::test]
#[timeout(Duration::from_secs(20))]
async fn sequence_numbers_survive_reconnect() {
    let addr = spawn_echo_server().await;
    let mut client = RpcClient::new(3);
    client
        .connect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect("connect");

    let first = client
        .send_request::<echo>("a".to_owned())
        .await
        .expect("send");
    assert_eq!(first.seq_num(), 0);
    first.recv().await.expect("reply");

    client.close();
    client
        .reconnect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect("reconnect");

    // Request ids are per client, not per connection.
    let second = client
        .send_request::<echo>("b".to_owned())
        .await
        .expect("send after reconnect");
    assert_eq!(second.seq_num(), 1);
    second.recv().await.expect("reply");
}

#[rstest]
#[tokio::test]
#[timeout(Duration::from_secs(20))]
async fn server_disconnect_fails_pending_calls() {
    let addr = support::spawn_once(|mut stream| async move {
        let _ = support::read_request(&mut stream).await;
        // Drop the connection without answering.
    })
    .await;

    let mut client = RpcClient::new(3);
    client
        .connect(addr.ip().to_string(), addr.port().to_string(), CONNECT_TIMEOUT)
        .await
        .expect("connect");

    let err = client
        .call::<echo>("hi".to_owned())
        .await
        .expect_err("server went away");
    assert_eq!(err.error_code(), Some(ErrorCode::IoError));
    assert!(client.has_closed());
}
