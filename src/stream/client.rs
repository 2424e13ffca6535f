//! Websocket event stream with automatic reconnects.
//!
//! [`EventStreamClient::open`] spawns one background worker that owns the
//! socket for the lifetime of the stream. The worker dials, reads frames,
//! forwards each JSON document to the consumer and, depending on the
//! configured [`ReconnectPolicy`], dials again after the connection is lost.
//! A per-connection heartbeat keeps intermediaries from timing the socket out.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{sleep_or_cancel, Backoff};
use crate::document::Document;
use crate::endpoint::{Credentials, Endpoint};
use crate::stream::classify::{ReadFailure, ReconnectPolicy};
use crate::stream::heartbeat::{Command, Heartbeat};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDefaults;

impl StreamDefaults {
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(29);
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
    pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
}

#[derive(Clone, Debug)]
pub struct EventStreamOptions {
    /// Interval between client pings on a live connection.
    pub heartbeat_interval: Duration,
    /// Pause between losing a connection and dialing again.
    pub reconnect_delay: Duration,
    /// Spacing between consecutive failed dials.
    pub dial_backoff: Backoff,
    /// Upper bound for a single dial, handshake included.
    pub dial_timeout: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for EventStreamOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: StreamDefaults::HEARTBEAT_INTERVAL,
            reconnect_delay: StreamDefaults::RECONNECT_DELAY,
            dial_backoff: Backoff::default(),
            dial_timeout: StreamDefaults::DIAL_TIMEOUT,
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

/// Entry point for opening event streams against one node.
#[derive(Clone, Debug)]
pub struct EventStreamClient {
    endpoint: Endpoint,
    credentials: Credentials,
    options: EventStreamOptions,
}

impl EventStreamClient {
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            options: EventStreamOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EventStreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EventStreamOptions {
        &self.options
    }

    pub fn url(&self) -> String {
        self.endpoint.websocket_url()
    }

    /// Opens the stream without waiting for the first connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&self) -> EventStream {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let worker = Worker {
            url: self.url(),
            authorization: self.credentials.authorization_header(),
            options: self.options.clone(),
            messages: messages_tx,
            status: status_tx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());

        EventStream {
            messages: messages_rx,
            status: status_rx,
            closer: StreamCloser {
                shutdown,
                task: Some(task),
            },
        }
    }
}

/// Connection lifecycle updates produced by the stream worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamStatus {
    Connected,
    /// The connection was lost and a reconnect is pending.
    Disconnected,
    /// The worker has stopped; no further messages will arrive.
    Closed,
}

/// Handle to a running event stream.
///
/// Dropping the handle stops the background worker.
#[derive(Debug)]
pub struct EventStream {
    messages: mpsc::UnboundedReceiver<Document>,
    status: mpsc::UnboundedReceiver<StreamStatus>,
    closer: StreamCloser,
}

impl EventStream {
    /// Receives the next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Document> {
        self.messages.recv().await
    }

    /// Receives the next lifecycle update.
    pub async fn next_status(&mut self) -> Option<StreamStatus> {
        self.status.recv().await
    }

    /// Splits into the event receiver, the status receiver and the closer.
    pub fn split(
        self,
    ) -> (
        mpsc::UnboundedReceiver<Document>,
        mpsc::UnboundedReceiver<StreamStatus>,
        StreamCloser,
    ) {
        (self.messages, self.status, self.closer)
    }

    /// Stops the worker and waits for it to exit.
    pub async fn close(self) {
        self.closer.close().await;
    }
}

/// Stops a stream's background worker.
#[derive(Debug)]
pub struct StreamCloser {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamCloser {
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for StreamCloser {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Failures seen by the stream worker. None of them reach the consumer; they
/// decide the next state and are logged.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to dial {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("dialing {url} timed out after {timeout:?}")]
    DialTimeout { url: String, timeout: Duration },

    #[error("connection lost: {0}")]
    TransientRead(#[source] WsError),

    #[error("stream ended: {0}")]
    TerminalRead(String),

    #[error("invalid stream request: {0}")]
    InvalidRequest(#[source] WsError),

    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

enum ConnectionState {
    Connecting { attempt: usize },
    Connected(Box<Socket>),
    Reconnecting,
    Terminal,
}

enum SessionEnd {
    Lost(StreamError),
    Ended(StreamError),
    ConsumerGone,
    Cancelled,
}

struct Worker {
    url: String,
    authorization: String,
    options: EventStreamOptions,
    messages: mpsc::UnboundedSender<Document>,
    status: mpsc::UnboundedSender<StreamStatus>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let mut state = ConnectionState::Connecting { attempt: 1 };

        loop {
            state = match state {
                ConnectionState::Connecting { attempt } => self.connect(attempt).await,
                ConnectionState::Connected(socket) => {
                    let mut socket = *socket;
                    let _ = self.status.send(StreamStatus::Connected);
                    match self.read_until_lost(&mut socket).await {
                        SessionEnd::Lost(err) => {
                            warn!(
                                event = "stream_connection_lost",
                                url = %self.url,
                                error = %err,
                                delay_ms = self.options.reconnect_delay.as_millis() as u64
                            );
                            let _ = self.status.send(StreamStatus::Disconnected);
                            ConnectionState::Reconnecting
                        }
                        SessionEnd::Ended(err) => {
                            info!(event = "stream_ended", url = %self.url, reason = %err);
                            self.close_socket(&mut socket).await;
                            ConnectionState::Terminal
                        }
                        SessionEnd::ConsumerGone => {
                            debug!(event = "stream_consumer_gone", url = %self.url);
                            self.close_socket(&mut socket).await;
                            ConnectionState::Terminal
                        }
                        SessionEnd::Cancelled => {
                            debug!(event = "stream_cancelled", url = %self.url);
                            self.close_socket(&mut socket).await;
                            ConnectionState::Terminal
                        }
                    }
                }
                ConnectionState::Reconnecting => {
                    if self.pause(self.options.reconnect_delay).await {
                        ConnectionState::Connecting { attempt: 1 }
                    } else {
                        ConnectionState::Terminal
                    }
                }
                ConnectionState::Terminal => break,
            };
        }

        let _ = self.status.send(StreamStatus::Closed);
    }

    async fn connect(&self, attempt: usize) -> ConnectionState {
        let dialed = tokio::select! {
            _ = self.shutdown.cancelled() => return ConnectionState::Terminal,
            _ = self.messages.closed() => {
                debug!(event = "stream_consumer_gone", url = %self.url, attempt);
                return ConnectionState::Terminal;
            }
            dialed = self.dial() => dialed,
        };

        match dialed {
            Ok(socket) => {
                info!(event = "stream_connected", url = %self.url, attempt);
                ConnectionState::Connected(Box::new(socket))
            }
            Err(err @ (StreamError::InvalidRequest(_) | StreamError::InvalidHeader(_))) => {
                error!(event = "stream_dial_aborted", url = %self.url, error = %err);
                ConnectionState::Terminal
            }
            Err(StreamError::Dial {
                source: source @ WsError::Url(_),
                ..
            }) => {
                error!(event = "stream_dial_aborted", url = %self.url, error = %source);
                ConnectionState::Terminal
            }
            Err(err) => {
                let delay = self.options.dial_backoff.delay_for_attempt(attempt);
                warn!(
                    event = "stream_dial_failed",
                    url = %self.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err
                );
                if self.pause(delay).await {
                    ConnectionState::Connecting {
                        attempt: attempt.saturating_add(1),
                    }
                } else {
                    ConnectionState::Terminal
                }
            }
        }
    }

    /// Waits out `delay`. Returns `false` when the stream was cancelled or the
    /// consumer dropped its receiver in the meantime.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.messages.closed() => {
                debug!(event = "stream_consumer_gone", url = %self.url);
                false
            }
            completed = sleep_or_cancel(delay, &self.shutdown) => completed,
        }
    }

    /// Sends our close frame, or the reply to the peer's, and flushes it.
    /// A peer that stops reading cannot hold the worker past `CLOSE_TIMEOUT`.
    async fn close_socket(&self, socket: &mut Socket) {
        let closing = WebSocketStream::close(socket, None);
        match tokio::time::timeout(StreamDefaults::CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(event = "stream_close_failed", url = %self.url, error = %err),
            Err(_) => warn!(event = "stream_close_timed_out", url = %self.url),
        }
    }

    fn request(&self) -> Result<Request, StreamError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(StreamError::InvalidRequest)?;
        let header = HeaderValue::from_str(&self.authorization)?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(request)
    }

    async fn dial(&self) -> Result<Socket, StreamError> {
        let request = self.request()?;

        match tokio::time::timeout(self.options.dial_timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(source)) => Err(StreamError::Dial {
                url: self.url.clone(),
                source,
            }),
            Err(_) => Err(StreamError::DialTimeout {
                url: self.url.clone(),
                timeout: self.options.dial_timeout,
            }),
        }
    }

    async fn read_until_lost(&self, socket: &mut Socket) -> SessionEnd {
        let (heartbeat, mut commands) =
            Heartbeat::start(self.options.heartbeat_interval, &self.shutdown);

        let end = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break SessionEnd::Cancelled,
                _ = self.messages.closed() => break SessionEnd::ConsumerGone,
                Some(command) = commands.recv() => match command {
                    Command::Ping => {
                        debug!(event = "stream_ping", url = %self.url);
                        if let Err(err) = socket.send(Message::Ping(Vec::new())).await {
                            break self.failure(err);
                        }
                    }
                },
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !self.deliver(text.as_bytes()) {
                            break SessionEnd::ConsumerGone;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if !self.deliver(&bytes) {
                            break SessionEnd::ConsumerGone;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            break self.failure(err);
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|frame| format!("peer closed the connection ({})", frame.code))
                            .unwrap_or_else(|| "peer closed the connection".to_string());
                        break SessionEnd::Ended(StreamError::TerminalRead(reason));
                    }
                    Some(Err(err)) => break self.failure(err),
                    None => {
                        break SessionEnd::Ended(StreamError::TerminalRead(
                            "socket ended".to_string(),
                        ));
                    }
                },
            }
        };

        heartbeat.stop().await;
        end
    }

    /// Forwards one frame to the consumer. Returns `false` when nobody is
    /// listening anymore.
    fn deliver(&self, payload: &[u8]) -> bool {
        match Document::from_slice(payload) {
            Ok(document) => self.messages.send(document).is_ok(),
            Err(err) => {
                let preview: String = String::from_utf8_lossy(payload).chars().take(200).collect();
                warn!(
                    event = "stream_frame_malformed",
                    url = %self.url,
                    error = %err,
                    frame = %preview
                );
                true
            }
        }
    }

    fn failure(&self, err: WsError) -> SessionEnd {
        match self.options.reconnect_policy.classify(&err) {
            ReadFailure::Transient => SessionEnd::Lost(StreamError::TransientRead(err)),
            ReadFailure::Terminal => SessionEnd::Ended(StreamError::TerminalRead(err.to_string())),
        }
    }
}
