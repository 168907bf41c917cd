//! The second stage of a two-stage call.
//!
//! [`crate::RpcClient::send_request`] returns a [`Reply`] once the request is
//! on the wire; awaiting the reply suspends until the receive loop resumes
//! it, then decodes the body according to the response's error byte. The two
//! stages let callers pipeline many requests before awaiting any response.

use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::Weak;

use bincode::Decode;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::warn;

use crate::client::control::{Control, RawReply, WaiterResult};
use crate::error::{ErrorCode, RpcError};
use crate::payload;

/// A decoded response: the return value plus the attachment that rode along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<R> {
    /// The function's return value.
    pub value: R,
    /// Response attachment; empty when the server sent none.
    pub attachment: Bytes,
}

/// A response that has been requested but not yet received.
///
/// Awaiting the reply (it implements [`IntoFuture`]) yields the decoded
/// response. Dropping it abandons the call; the connection still reads and
/// discards the response frame.
#[derive(Debug)]
pub struct Reply<R> {
    rx: oneshot::Receiver<WaiterResult>,
    control: Weak<Control>,
    seq_num: u32,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Reply<R>
where
    R: Decode<()>,
{
    pub(crate) fn new(
        rx: oneshot::Receiver<WaiterResult>,
        control: Weak<Control>,
        seq_num: u32,
    ) -> Self {
        Self {
            rx,
            control,
            seq_num,
            _marker: PhantomData,
        }
    }

    /// Sequence number assigned to the request this reply answers.
    #[must_use]
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Await the response and decode it.
    ///
    /// # Errors
    ///
    /// - the local error that aborted the wait (`TimedOut` after a deadline
    ///   or close with the sticky flag set, `IoError` otherwise);
    /// - the server-reported error for a non-zero error byte;
    /// - [`ErrorCode::InvalidRpcResult`] when the body fails to decode, which
    ///   also closes the connection.
    pub async fn recv(self) -> Result<Response<R>, RpcError> {
        let resumed = self.rx.await.map_err(|_| {
            RpcError::new(ErrorCode::IoError, "connection dropped before response")
        })?;
        let reply = match resumed {
            Ok(reply) => reply,
            Err(code) => return Err(code.into()),
        };

        let mut should_close = false;
        let result = decode_reply(reply, &mut should_close);
        if should_close {
            if let Some(control) = self.control.upgrade() {
                control.close();
            }
        }
        result
    }
}

impl<R> IntoFuture for Reply<R>
where
    R: Decode<()> + Send + 'static,
{
    type Output = Result<Response<R>, RpcError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.recv())
    }
}

/// Interpret a raw response per the error-byte contract.
///
/// `0` is success; `0xFF` carries a serialized error record and leaves the
/// connection usable; any other value carries a message string and requires
/// the connection to be torn down after delivery.
fn decode_reply<R>(reply: RawReply, should_close: &mut bool) -> Result<Response<R>, RpcError>
where
    R: Decode<()>,
{
    if reply.err_code == 0 {
        if let Ok(value) = payload::decode::<R>(&reply.body) {
            return Ok(Response {
                value,
                attachment: reply.attachment,
            });
        }
    } else if reply.err_code == u8::MAX {
        if let Ok(err) = payload::decode::<RpcError>(&reply.body) {
            return Err(err);
        }
    } else if let Ok(message) = payload::decode::<String>(&reply.body) {
        *should_close = true;
        return Err(RpcError::server(reply.err_code, message));
    }

    *should_close = true;
    warn!("failed to deserialize rpc response body");
    Err(RpcError::new(
        ErrorCode::InvalidRpcResult,
        "failed to deserialize rpc return value",
    ))
}
