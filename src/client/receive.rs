//! The connection's single receive loop.
//!
//! Exactly one receive task owns the read half of the socket while any call
//! is pending. It reads one response frame at a time, routes it to the
//! matching waiter by sequence number and stops itself once the response
//! table drains, parking the read half for the next burst of calls. A read
//! failure, a response for an unknown sequence number or a close signal
//! terminates the loop, which then closes the connection and resolves every
//! remaining waiter with the local error so no caller is left suspended.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, ReadHalf};
use tracing::{error, trace};

use crate::client::control::{BoxedTransport, Control, RawReply};
use crate::protocol::{ResponseHeader, RESP_HEADER_LEN};

/// Spawn the receive loop on the connection's executor.
pub(crate) fn spawn(control: Arc<Control>, reader: ReadHalf<BoxedTransport>) {
    let executor = control.executor().clone();
    executor.spawn(run(control, reader));
}

async fn run(control: Arc<Control>, mut reader: ReadHalf<BoxedTransport>) {
    let mut close_rx = control.close_signal();
    let mut body_scratch = BytesMut::new();
    let mut attach_scratch = BytesMut::new();

    loop {
        if control.has_closed() {
            return terminate(&control);
        }

        let header = tokio::select! {
            res = read_header(&mut reader) => {
                match res {
                    Ok(header) => header,
                    Err(err) => {
                        error!(
                            client_id = control.client_id(),
                            %err,
                            "failed to read response header, closing the connection"
                        );
                        return terminate(&control);
                    }
                }
            },
            _ = close_rx.changed() => return terminate(&control),
        };

        let (body, attachment) = tokio::select! {
            res = read_payload(&mut reader, &header, &mut body_scratch, &mut attach_scratch) => {
                match res {
                    Ok(parts) => parts,
                    Err(err) => {
                        error!(
                            client_id = control.client_id(),
                            %err,
                            "failed to read response payload, closing the connection"
                        );
                        return terminate(&control);
                    }
                }
            },
            _ = close_rx.changed() => return terminate(&control),
        };

        let Some(waiter) = control.remove_waiter(header.seq_num) else {
            error!(
                client_id = control.client_id(),
                seq_num = header.seq_num,
                "response matches no pending request, closing the connection"
            );
            return terminate(&control);
        };
        trace!(
            client_id = control.client_id(),
            seq_num = header.seq_num,
            err_code = header.err_code,
            "delivering response"
        );
        waiter.resume(Ok(RawReply {
            body,
            attachment,
            err_code: header.err_code,
        }));

        match control.park_reader_if_idle(reader) {
            None => {
                trace!(client_id = control.client_id(), "receive loop idle");
                return;
            }
            Some(returned) => reader = returned,
        }
    }
}

/// Close the connection and fan the local error out to every waiter.
fn terminate(control: &Arc<Control>) {
    control.deactivate_recv();
    control.close();
    control.fail_all_waiters(control.local_error_code());
}

async fn read_header(reader: &mut ReadHalf<BoxedTransport>) -> io::Result<ResponseHeader> {
    let mut buf = [0u8; RESP_HEADER_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(ResponseHeader::from_bytes(&buf))
}

/// Read body and attachment into the scratch buffers, handing each out as an
/// owned slice without copying.
async fn read_payload(
    reader: &mut ReadHalf<BoxedTransport>,
    header: &ResponseHeader,
    body_scratch: &mut BytesMut,
    attach_scratch: &mut BytesMut,
) -> io::Result<(Bytes, Bytes)> {
    body_scratch.resize(header.length as usize, 0);
    reader.read_exact(&mut body_scratch[..]).await?;
    let body = body_scratch.split().freeze();

    let attachment = if header.attach_length == 0 {
        attach_scratch.clear();
        Bytes::new()
    } else {
        attach_scratch.resize(header.attach_length as usize, 0);
        reader.read_exact(&mut attach_scratch[..]).await?;
        attach_scratch.split().freeze()
    };

    Ok((body, attachment))
}
