//! Shared connection state.
//!
//! One [`Control`] exists per connection and is shared between the client
//! facade, every pending waiter, the receive loop and any outstanding
//! deadline tasks; it lives as long as the longest of those holders. The
//! `closed` flag is write-once for a given control block: a reconnect
//! installs a fresh block rather than reviving a closed one, which keeps
//! stale deadline tasks (they hold weak references) inert by construction.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tracing::trace;

use crate::client::timeout::TimeoutGuard;
use crate::error::ErrorCode;

/// Byte-stream transport the connection runs over, TCP or TLS-over-TCP.
pub(crate) trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Owned transport behind a uniform type.
pub(crate) type BoxedTransport = Box<dyn Transport>;

/// Raw response delivered to a waiter before decoding.
#[derive(Debug)]
pub(crate) struct RawReply {
    /// Encoded response body.
    pub(crate) body: Bytes,
    /// Response attachment; empty when the header carried none.
    pub(crate) attachment: Bytes,
    /// Application error byte from the response header.
    pub(crate) err_code: u8,
}

/// What a suspended caller is resumed with: a raw response, or the local
/// error that aborted the wait.
pub(crate) type WaiterResult = Result<RawReply, ErrorCode>;

/// Per-call record living in the response table from send until resumption.
pub(crate) struct Waiter {
    /// Deadline for this call; dropped (and thereby cancelled) on resumption.
    pub(crate) timer: TimeoutGuard,
    /// One-shot resumption channel the receive loop completes.
    pub(crate) tx: oneshot::Sender<WaiterResult>,
}

impl Waiter {
    /// Resume the suspended caller exactly once and cancel the deadline.
    pub(crate) fn resume(self, result: WaiterResult) {
        drop(self.timer);
        let _ = self.tx.send(result);
    }
}

/// Shared mutable state of one connection.
pub(crate) struct Control {
    client_id: u32,
    executor: Handle,
    closed: AtomicBool,
    timed_out: AtomicBool,
    recv_active: AtomicBool,
    waiters: Mutex<HashMap<u32, Waiter>>,
    reader: Mutex<Option<ReadHalf<BoxedTransport>>>,
    writer: AsyncMutex<Option<WriteHalf<BoxedTransport>>>,
    resp_attachment: Mutex<Bytes>,
    close_tx: watch::Sender<bool>,
}

impl Control {
    pub(crate) fn new(executor: Handle, client_id: u32) -> Arc<Self> {
        let (close_tx, _) = watch::channel(false);
        Arc::new(Self {
            client_id,
            executor,
            closed: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            recv_active: AtomicBool::new(false),
            waiters: Mutex::new(HashMap::new()),
            reader: Mutex::new(None),
            writer: AsyncMutex::new(None),
            resp_attachment: Mutex::new(Bytes::new()),
            close_tx,
        })
    }

    pub(crate) fn client_id(&self) -> u32 {
        self.client_id
    }

    pub(crate) fn executor(&self) -> &Handle {
        &self.executor
    }

    pub(crate) fn has_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Error code for resolving waiters after a local failure.
    pub(crate) fn local_error_code(&self) -> ErrorCode {
        if self.timed_out() {
            ErrorCode::TimedOut
        } else {
            ErrorCode::IoError
        }
    }

    /// Receiver that resolves when [`Control::close`] runs.
    pub(crate) fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Split a freshly connected transport into the stored halves.
    pub(crate) async fn install_transport(&self, transport: BoxedTransport) {
        let (reader, writer) = tokio::io::split(transport);
        *self.reader.lock().expect("reader lock") = Some(reader);
        *self.writer.lock().await = Some(writer);
    }

    pub(crate) fn writer(&self) -> &AsyncMutex<Option<WriteHalf<BoxedTransport>>> {
        &self.writer
    }

    /// Take the read half for the receive loop.
    pub(crate) fn take_reader(&self) -> Option<ReadHalf<BoxedTransport>> {
        self.reader.lock().expect("reader lock").take()
    }

    /// Mark the receive loop as running. Returns `false` when it already was.
    pub(crate) fn activate_recv(&self) -> bool {
        !self.recv_active.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn deactivate_recv(&self) {
        self.recv_active.store(false, Ordering::SeqCst);
    }

    /// Install a waiter for `seq_num`. Returns `false` on a collision, in
    /// which case the supplied waiter is dropped (cancelling its deadline).
    pub(crate) fn register_waiter(&self, seq_num: u32, waiter: Waiter) -> bool {
        match self.waiters.lock().expect("waiter table lock").entry(seq_num) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(waiter);
                true
            }
        }
    }

    pub(crate) fn remove_waiter(&self, seq_num: u32) -> Option<Waiter> {
        self.waiters.lock().expect("waiter table lock").remove(&seq_num)
    }

    /// Park the read half again if no call is pending, stopping the receive
    /// loop. Returns the reader back when the table was not empty.
    pub(crate) fn park_reader_if_idle(
        &self,
        reader: ReadHalf<BoxedTransport>,
    ) -> Option<ReadHalf<BoxedTransport>> {
        let waiters = self.waiters.lock().expect("waiter table lock");
        if waiters.is_empty() {
            *self.reader.lock().expect("reader lock") = Some(reader);
            self.recv_active.store(false, Ordering::SeqCst);
            None
        } else {
            Some(reader)
        }
    }

    /// Resolve every pending waiter with `code` and clear the table.
    pub(crate) fn fail_all_waiters(&self, code: ErrorCode) {
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().expect("waiter table lock");
            waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        if !drained.is_empty() {
            trace!(
                client_id = self.client_id,
                count = drained.len(),
                code = %code,
                "resolving pending requests after connection failure"
            );
        }
        for waiter in drained {
            waiter.resume(Err(code));
        }
    }

    /// Replace the stored response attachment of the current call.
    pub(crate) fn store_resp_attachment(&self, attachment: Bytes) {
        *self.resp_attachment.lock().expect("attachment lock") = attachment;
    }

    pub(crate) fn resp_attachment(&self) -> Bytes {
        self.resp_attachment.lock().expect("attachment lock").clone()
    }

    pub(crate) fn release_resp_attachment(&self) -> Bytes {
        std::mem::take(&mut *self.resp_attachment.lock().expect("attachment lock"))
    }

    /// Close the connection. Idempotent and non-blocking: the socket
    /// teardown is scheduled on the executor so callers never wait on it.
    /// Pending waiters are not resolved here; the receive loop's termination
    /// path owns that.
    pub(crate) fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.close_tx.send(true);
        let control = Arc::clone(self);
        self.executor.spawn(async move {
            let mut writer = control.writer.lock().await;
            if let Some(mut half) = writer.take() {
                let _ = half.shutdown().await;
            }
            drop(writer);
            drop(control.take_reader());
        });
    }
}
