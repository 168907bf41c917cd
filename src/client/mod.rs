//! The RPC client facade.
//!
//! An [`RpcClient`] owns one connection to one server endpoint and pipelines
//! any number of concurrent calls over it. Each call is assigned a sequence
//! number, registered in the connection's response table and written as a
//! single frame; a background receive loop routes each inbound response to
//! the caller waiting on its sequence number.

mod control;
mod pending;
mod receive;
mod timeout;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, info, trace, warn};

use crate::config::{ClientConfig, DEFAULT_TIMEOUT};
use crate::error::{ErrorCode, RpcError};
use crate::function::RpcFunction;
use crate::payload;
use crate::protocol::{fits_length_field, RequestHeader, MAGIC, REQ_HEADER_LEN};
use crate::tls::{self, TlsContext};

use control::{BoxedTransport, Control, Waiter};
pub use pending::{Reply, Response};

/// Outcome of TLS initialization, checked before every connect and send.
enum TlsState {
    /// No certificate path configured; plain TCP.
    Disabled,
    /// Init succeeded; connects wrap the socket in a TLS session.
    Ready(TlsContext),
    /// Init failed; connects and sends report `NotConnected`.
    Failed,
}

/// Asynchronous client for the binary RPC protocol.
///
/// The client is cheap to share behind a reference: calls take `&self` and
/// may be issued concurrently from many tasks. Connection management
/// (`connect`, `reconnect`, configuration) takes `&mut self`.
pub struct RpcClient {
    control: Arc<Control>,
    config: ClientConfig,
    tls: TlsState,
    executor: Handle,
    next_request_id: AtomicU32,
    req_attachment: Mutex<Option<Bytes>>,
}

impl RpcClient {
    /// Create a client scheduled on the current runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(client_id: u32) -> Self {
        Self::with_executor(Handle::current(), client_id)
    }

    /// Create a client scheduled on an explicit executor.
    #[must_use]
    pub fn with_executor(executor: Handle, client_id: u32) -> Self {
        let config = ClientConfig {
            client_id,
            ..ClientConfig::default()
        };
        Self {
            control: Control::new(executor.clone(), client_id),
            config,
            tls: TlsState::Disabled,
            executor,
            next_request_id: AtomicU32::new(0),
            req_attachment: Mutex::new(None),
        }
    }

    /// Replace the configuration, re-running TLS init when a certificate
    /// path is set.
    ///
    /// # Errors
    /// Returns `NotConnected` when TLS init fails; the client then refuses
    /// to connect until a working configuration is supplied.
    pub fn init_config(&mut self, config: ClientConfig) -> Result<(), RpcError> {
        self.config = config;
        if self.config.ssl_cert_path.is_some() {
            self.init_tls()
        } else {
            self.tls = TlsState::Disabled;
            Ok(())
        }
    }

    /// Enable TLS with a verification file at `cert_base/cert_file` and the
    /// peer name the certificate must match.
    ///
    /// # Errors
    /// Returns `NotConnected` when the file is missing or unusable; the
    /// failure is sticky until init succeeds.
    pub fn init_ssl(
        &mut self,
        cert_base: impl AsRef<std::path::Path>,
        cert_file: impl AsRef<std::path::Path>,
        domain: impl Into<String>,
    ) -> Result<(), RpcError> {
        self.config.ssl_cert_path = Some(cert_base.as_ref().join(cert_file.as_ref()));
        self.config.ssl_domain = domain.into();
        self.init_tls()
    }

    fn init_tls(&mut self) -> Result<(), RpcError> {
        let Some(cert_path) = self.config.ssl_cert_path.as_deref() else {
            self.tls = TlsState::Disabled;
            return Ok(());
        };
        match tls::init(cert_path, &self.config.ssl_domain) {
            Ok(context) => {
                self.tls = TlsState::Ready(context);
                Ok(())
            }
            Err(err) => {
                warn!(client_id = self.config.client_id, %err, "tls init failed");
                self.tls = TlsState::Failed;
                Err(ErrorCode::NotConnected.into())
            }
        }
    }

    /// Connect to `host:port`, bounding the connect (and TLS handshake, when
    /// enabled) by `timeout`, which also becomes the configured deadline.
    ///
    /// # Errors
    /// `TimedOut` when the deadline fired, `NotConnected` on any other
    /// connect or handshake failure, `IoError` when the client was closed
    /// and not reconnected.
    pub async fn connect(
        &mut self,
        host: impl Into<String>,
        port: impl Into<String>,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        self.config.host = host.into();
        self.config.port = port.into();
        self.config.timeout = timeout;
        self.connect_impl(false).await
    }

    /// Connect to a `"host:port"` endpoint string.
    ///
    /// # Errors
    /// As [`RpcClient::connect`], plus `InvalidRpcArguments` when the
    /// endpoint has no `:` separator.
    pub async fn connect_endpoint(
        &mut self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let (host, port) = split_endpoint(endpoint)?;
        self.connect(host, port, timeout).await
    }

    /// Close any existing connection and connect again. Unlike
    /// [`RpcClient::connect`], this works on a closed client.
    ///
    /// # Errors
    /// As [`RpcClient::connect`].
    pub async fn reconnect(
        &mut self,
        host: impl Into<String>,
        port: impl Into<String>,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        self.config.host = host.into();
        self.config.port = port.into();
        self.config.timeout = timeout;
        self.reset();
        self.connect_impl(true).await
    }

    /// Reconnect to a `"host:port"` endpoint string.
    ///
    /// # Errors
    /// As [`RpcClient::reconnect`], plus `InvalidRpcArguments` when the
    /// endpoint has no `:` separator.
    pub async fn reconnect_endpoint(
        &mut self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let (host, port) = split_endpoint(endpoint)?;
        self.reconnect(host, port, timeout).await
    }

    /// Discard the connection state. Only sound while no call is in flight:
    /// the old control block is closed and a fresh one installed, so stale
    /// deadline tasks can never touch the new connection.
    fn reset(&mut self) {
        self.control.close();
        self.control = Control::new(self.executor.clone(), self.config.client_id);
    }

    async fn connect_impl(&mut self, is_reconnect: bool) -> Result<(), RpcError> {
        if matches!(self.tls, TlsState::Failed) {
            return Err(ErrorCode::NotConnected.into());
        }
        if !is_reconnect && self.control.has_closed() {
            error!(
                client_id = self.config.client_id,
                "a closed client is not allowed to connect again; use reconnect or a new client"
            );
            return Err(RpcError::new(ErrorCode::IoError, "client has been closed"));
        }

        let endpoint = format!("{}:{}", self.config.host, self.config.port);
        info!(
            client_id = self.config.client_id,
            %endpoint,
            "connecting"
        );

        let deadline = timeout::schedule(&self.control, self.config.timeout, "connect deadline");
        let mut close_rx = self.control.close_signal();

        let connected = tokio::select! {
            res = TcpStream::connect(&endpoint) => res,
            _ = close_rx.changed() => Err(std::io::Error::other("connect aborted")),
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                drop(deadline);
                if self.control.timed_out() {
                    return Err(ErrorCode::TimedOut.into());
                }
                warn!(client_id = self.config.client_id, %err, "connect failed");
                return Err(ErrorCode::NotConnected.into());
            }
        };
        if self.control.timed_out() {
            warn!(client_id = self.config.client_id, "connect timed out");
            return Err(ErrorCode::TimedOut.into());
        }
        let _ = stream.set_nodelay(true);

        let transport: BoxedTransport = match &self.tls {
            TlsState::Ready(context) => {
                let handshake = tokio::select! {
                    res = context.connector.connect(context.server_name.clone(), stream) => res,
                    _ = close_rx.changed() => Err(std::io::Error::other("handshake aborted")),
                };
                match handshake {
                    Ok(tls_stream) => Box::new(tls_stream),
                    Err(err) => {
                        drop(deadline);
                        if self.control.timed_out() {
                            return Err(ErrorCode::TimedOut.into());
                        }
                        warn!(client_id = self.config.client_id, %err, "tls handshake failed");
                        return Err(ErrorCode::NotConnected.into());
                    }
                }
            }
            _ => Box::new(stream),
        };
        drop(deadline);

        self.control.install_transport(transport).await;
        Ok(())
    }

    /// Call a remote function with the default 5-second deadline.
    ///
    /// # Errors
    /// Any send failure (see [`RpcClient::send_request_for`]) or response
    /// failure (see [`Reply::recv`]).
    pub async fn call<F>(&self, args: F::Args) -> Result<F::Return, RpcError>
    where
        F: RpcFunction,
    {
        self.call_for::<F>(DEFAULT_TIMEOUT, args).await
    }

    /// Call a remote function with an explicit deadline. A zero deadline
    /// disables the per-call timer.
    ///
    /// # Errors
    /// Any send failure (see [`RpcClient::send_request_for`]) or response
    /// failure (see [`Reply::recv`]).
    pub async fn call_for<F>(&self, timeout: Duration, args: F::Args) -> Result<F::Return, RpcError>
    where
        F: RpcFunction,
    {
        let reply = self.send_request_for::<F>(timeout, args).await?;
        let response = reply.recv().await?;
        self.control.store_resp_attachment(response.attachment);
        Ok(response.value)
    }

    /// Issue a request with the default deadline without awaiting the
    /// response. See [`RpcClient::send_request_for`].
    ///
    /// # Errors
    /// See [`RpcClient::send_request_for`].
    pub async fn send_request<F>(&self, args: F::Args) -> Result<Reply<F::Return>, RpcError>
    where
        F: RpcFunction,
    {
        self.send_request_for::<F>(DEFAULT_TIMEOUT, args).await
    }

    /// Issue a request without awaiting the response.
    ///
    /// On success the request is on the wire, a waiter is registered under
    /// its sequence number and the receive loop is running; the returned
    /// [`Reply`] is the second stage which decodes the response once it
    /// arrives. Pending requests may complete in any order.
    ///
    /// # Errors
    /// `IoError` when the client is closed, `NotConnected` when TLS init
    /// failed or no connection is installed, `MessageTooLarge` for a body
    /// over `u32::MAX` bytes, `InvalidRpcArguments` on a sequence-number
    /// collision (which also closes the client), and `TimedOut`/`IoError`
    /// when the write itself fails.
    pub async fn send_request_for<F>(
        &self,
        timeout: Duration,
        args: F::Args,
    ) -> Result<Reply<F::Return>, RpcError>
    where
        F: RpcFunction,
    {
        if self.control.has_closed() {
            return Err(RpcError::new(
                ErrorCode::IoError,
                "client has been closed, please re-connect",
            ));
        }
        if matches!(self.tls, TlsState::Failed) {
            return Err(ErrorCode::NotConnected.into());
        }

        let mut frame = payload::encode_at(REQ_HEADER_LEN, &args)?;
        let body_len = (frame.len() - REQ_HEADER_LEN) as u64;
        if !fits_length_field(body_len) {
            error!(client_id = self.config.client_id, body_len, "rpc body too large");
            return Err(ErrorCode::MessageTooLarge.into());
        }

        // The attachment is consumed by this send whether or not the write
        // succeeds.
        let attachment = self.req_attachment.lock().expect("attachment lock").take();
        let attach_length = attachment.as_ref().map_or(0, Bytes::len) as u32;

        let deadline = timeout::schedule(&self.control, timeout, "rpc call deadline");

        // The write lock serializes concurrent senders; assigning the
        // sequence number inside it keeps wire order identical to id order.
        let mut writer_slot = self.control.writer().lock().await;
        let Some(writer) = writer_slot.as_mut() else {
            return Err(ErrorCode::NotConnected.into());
        };
        let seq_num = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        trace!(
            client_id = self.config.client_id,
            seq_num,
            function = F::NAME,
            "sending request"
        );
        RequestHeader {
            magic: MAGIC,
            function_id: F::FUNCTION_ID,
            length: body_len as u32,
            attach_length,
            seq_num,
        }
        .write_bytes(&mut frame[..REQ_HEADER_LEN]);

        // Register before the bytes hit the wire so a fast response always
        // finds its waiter.
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            timer: deadline,
            tx,
        };
        if !self.control.register_waiter(seq_num, waiter) {
            drop(writer_slot);
            error!(
                client_id = self.config.client_id,
                seq_num, "sequence number already pending"
            );
            self.control.close();
            return Err(RpcError::new(
                ErrorCode::InvalidRpcArguments,
                "serial number conflict",
            ));
        }

        let written = async {
            writer.write_all(&frame).await?;
            if let Some(sidecar) = &attachment {
                writer.write_all(sidecar).await?;
            }
            writer.flush().await
        }
        .await;
        drop(writer_slot);

        if let Err(err) = written {
            // The receive loop may never see this waiter; withdraw it here.
            drop(self.control.remove_waiter(seq_num));
            self.control.close();
            return Err(if self.control.timed_out() {
                ErrorCode::TimedOut.into()
            } else {
                RpcError::new(ErrorCode::IoError, err.to_string())
            });
        }

        self.ensure_receive_loop();
        Ok(Reply::new(rx, Arc::downgrade(&self.control), seq_num))
    }

    /// Start the receive loop if the response table just became non-empty.
    fn ensure_receive_loop(&self) {
        if !self.control.activate_recv() {
            return;
        }
        match self.control.take_reader() {
            Some(reader) => receive::spawn(Arc::clone(&self.control), reader),
            None => {
                // The previous loop died with the connection; resolve
                // whatever was registered meanwhile.
                self.control.deactivate_recv();
                self.control.close();
                self.control
                    .fail_all_waiters(self.control.local_error_code());
            }
        }
    }

    /// Attach a byte sidecar to the next outbound request. The send consumes
    /// it exactly once.
    ///
    /// # Errors
    /// `MessageTooLarge` when the attachment exceeds `u32::MAX` bytes.
    pub fn set_req_attachment(&self, attachment: impl Into<Bytes>) -> Result<(), RpcError> {
        let attachment = attachment.into();
        if !fits_length_field(attachment.len() as u64) {
            error!(client_id = self.config.client_id, "rpc attachment too large");
            return Err(ErrorCode::MessageTooLarge.into());
        }
        *self.req_attachment.lock().expect("attachment lock") = Some(attachment);
        Ok(())
    }

    /// Attachment of the most recently completed [`RpcClient::call`].
    #[must_use]
    pub fn get_resp_attachment(&self) -> Bytes {
        self.control.resp_attachment()
    }

    /// Take ownership of the stored response attachment, leaving it empty.
    #[must_use]
    pub fn release_resp_attachment(&self) -> Bytes {
        self.control.release_resp_attachment()
    }

    /// Close the connection. Safe to call repeatedly and from any thread;
    /// pending calls resolve with an error shortly after.
    pub fn close(&self) {
        info!(client_id = self.config.client_id, "client close");
        self.control.close();
    }

    /// Whether the connection has been closed (by a call to
    /// [`RpcClient::close`], a deadline or a transport failure).
    #[must_use]
    pub fn has_closed(&self) -> bool {
        self.control.has_closed()
    }

    #[must_use]
    pub fn client_id(&self) -> u32 {
        self.config.client_id
    }

    #[must_use]
    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.host
    }

    #[must_use]
    pub fn port(&self) -> &str {
        &self.config.port
    }

    #[cfg(test)]
    pub(crate) async fn install_transport_for_test(
        &mut self,
        transport: impl control::Transport + 'static,
    ) {
        self.control.install_transport(Box::new(transport)).await;
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.control.close();
    }
}

fn split_endpoint(endpoint: &str) -> Result<(String, String), RpcError> {
    let Some((host, port)) = endpoint.split_once(':') else {
        return Err(RpcError::new(
            ErrorCode::InvalidRpcArguments,
            format!("endpoint {endpoint:?} is missing a ':' separator"),
        ));
    };
    Ok((host.to_owned(), port.to_owned()))
}
