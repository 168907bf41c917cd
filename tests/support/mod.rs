//! In-process servers for exercising the client over real sockets.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use wirecall::protocol::{
    RequestHeader, ResponseHeader, MAGIC, REQ_HEADER_LEN, RESP_HEADER_LEN,
};

/// One fully read request frame.
pub struct Request {
    pub header: RequestHeader,
    pub body: Vec<u8>,
    pub attachment: Vec<u8>,
}

/// Read a complete request frame, checking the magic byte.
pub async fn read_request<S>(stream: &mut S) -> std::io::Result<Request>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; REQ_HEADER_LEN];
    stream.read_exact(&mut head).await?;
    let header = RequestHeader::from_bytes(&head);
    assert_eq!(header.magic, MAGIC, "client sent a bad magic byte");
    let mut body = vec![0u8; header.length as usize];
    stream.read_exact(&mut body).await?;
    let mut attachment = vec![0u8; header.attach_length as usize];
    stream.read_exact(&mut attachment).await?;
    Ok(Request {
        header,
        body,
        attachment,
    })
}

/// Write a complete response frame.
pub async fn write_response<S>(
    stream: &mut S,
    seq_num: u32,
    err_code: u8,
    body: &[u8],
    attachment: &[u8],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let header = ResponseHeader {
        length: body.len() as u32,
        attach_length: attachment.len() as u32,
        seq_num,
        err_code,
    };
    let mut head = [0u8; RESP_HEADER_LEN];
    header.write_bytes(&mut head);
    stream.write_all(&head).await?;
    stream.write_all(body).await?;
    stream.write_all(attachment).await?;
    stream.flush().await
}

/// Answer every request on `stream` by echoing its body and attachment.
pub async fn echo_loop<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Ok(request) = read_request(&mut stream).await {
        let echoed = write_response(
            &mut stream,
            request.header.seq_num,
            0,
            &request.body,
            &request.attachment,
        )
        .await;
        if echoed.is_err() {
            break;
        }
    }
}

/// Bind a listener and hand the first accepted connection to `handler`.
pub async fn spawn_once<F, Fut>(handler: F) -> SocketAddr
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let _ = stream.set_nodelay(true);
            handler(stream).await;
        }
    });
    addr
}

/// Bind a listener that serves every accepted connection with the echo loop
/// until the test runtime shuts down.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let _ = stream.set_nodelay(true);
            tokio::spawn(echo_loop(stream));
        }
    });
    addr
}
