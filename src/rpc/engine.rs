//! The concurrent multiplexing engine.
//!
//! [`Engine::serve`] is a single-task event loop that owns all mutable
//! engine state (`pending`, the ID counter, the writer backlog); every
//! other task — the reader, the writer, and the per-inbound-request
//! response forwarders — communicates with it only through channels. The
//! reader and writer tasks take temporary *ownership* of the underlying
//! `AsyncRead`/`AsyncWrite` half for the duration of one decode/one flush
//! and hand it back together with the outcome, which gives "no lock held
//! between frames" for free instead of wrapping the transport in a mutex.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::id::IdCounter;
use super::message::{decode_frame, encode_frame, Frame, ResponseOutcome};

/// A method call with its arguments, carried in both directions.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub params: Value,
}

/// A fire-and-forget method call with its arguments, carried in both
/// directions.
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// The result of a completed call: exactly one of `result`/`error` is
/// meaningful, signalled by `error` being non-null.
#[derive(Debug, Clone, Default)]
pub struct RpcResponse {
    pub result: Value,
    pub error: Value,
}

impl RpcResponse {
    pub fn result(result: Value) -> Self {
        Self { result, error: Value::Null }
    }

    pub fn error(error: Value) -> Self {
        Self { result: Value::Null, error }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }
}

/// The single-use sink an inbound request's handler writes its response
/// into.
pub type ResponseSink = oneshot::Sender<RpcResponse>;

/// Errors that terminate the engine. Matches the taxonomy where only
/// transport failures, decode failures, and cancellation are fatal —
/// encode failures and unmatched response IDs are not engine errors at
/// all, they are silently dropped by design.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport read error: {0}")]
    Read(#[source] std::io::Error),
    #[error("transport write error: {0}")]
    Write(#[source] std::io::Error),
    #[error("frame decode error: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("engine context cancelled")]
    Cancelled,
}

struct PendingCall {
    request: Request,
    respond_to: ResponseSink,
}

enum WriteOutcome<W> {
    Done(W),
    Err(EngineError),
}

enum ReadOutcome<R> {
    Frame(BufReader<R>, Frame),
    Err(EngineError),
}

/// A clonable, `Send` handle for application code to drive one [`Engine`]:
/// send requests and notifications, and receive inbound ones. Cheap to
/// clone — the underlying channel senders are reference-counted.
#[derive(Clone)]
pub struct EngineHandle {
    send_requests_tx: mpsc::Sender<PendingCall>,
    send_notifications_tx: mpsc::Sender<Notification>,
    recv_requests_rx: Arc<AsyncMutex<mpsc::Receiver<(Request, ResponseSink)>>>,
    recv_notifications_rx: Arc<AsyncMutex<mpsc::Receiver<Notification>>>,
}

impl EngineHandle {
    /// Sends a request and waits for the matched response. Returns `None`
    /// if the engine terminated (or was never able to accept the call)
    /// before a response arrived.
    pub async fn send_request(&self, method: impl Into<String>, params: Value) -> Option<RpcResponse> {
        let (respond_to, response) = oneshot::channel();
        let call = PendingCall { request: Request { method: method.into(), params }, respond_to };
        if self.send_requests_tx.send(call).await.is_err() {
            return None;
        }
        response.await.ok()
    }

    /// Enqueues a notification for transmission. Returns `false` if the
    /// engine has already terminated and can no longer accept it.
    pub async fn send_notification(&self, method: impl Into<String>, params: Value) -> bool {
        let n = Notification { method: method.into(), params };
        self.send_notifications_tx.send(n).await.is_ok()
    }

    /// Waits for the next inbound request, returning it paired with the
    /// sink its response must be written to. Returns `None` once the
    /// engine has terminated and no further requests will arrive.
    pub async fn recv_request(&self) -> Option<(Request, ResponseSink)> {
        self.recv_requests_rx.lock().await.recv().await
    }

    /// Waits for the next inbound notification. Returns `None` once the
    /// engine has terminated.
    pub async fn recv_notification(&self) -> Option<Notification> {
        self.recv_notifications_rx.lock().await.recv().await
    }
}

/// The event-loop half of an engine: not clonable, driven to completion by
/// a single call to [`Engine::serve`].
pub struct Engine<R, W> {
    ctx: CancellationToken,

    reader: Option<BufReader<R>>,
    writer: Option<W>,

    pending: HashMap<String, ResponseSink>,
    ids: IdCounter,

    writer_backlog: Vec<Vec<u8>>,
    writer_in_flight: bool,

    send_requests_rx: mpsc::Receiver<PendingCall>,
    send_requests_open: bool,
    send_notifications_rx: mpsc::Receiver<Notification>,
    send_notifications_open: bool,

    recv_requests_tx: mpsc::Sender<(Request, ResponseSink)>,
    recv_notifications_tx: mpsc::Sender<Notification>,

    id_responses_tx: mpsc::UnboundedSender<(Value, RpcResponse)>,
    id_responses_rx: mpsc::UnboundedReceiver<(Value, RpcResponse)>,

    write_done_tx: mpsc::UnboundedSender<WriteOutcome<W>>,
    write_done_rx: mpsc::UnboundedReceiver<WriteOutcome<W>>,

    read_done_tx: mpsc::UnboundedSender<ReadOutcome<R>>,
    read_done_rx: mpsc::UnboundedReceiver<ReadOutcome<R>>,
}

impl<R, W> Engine<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Builds a new engine over `reader`/`writer`, plus the handle
    /// application code uses to talk to it. `recv_capacity` bounds the
    /// inbound request/notification channels; `send_capacity` bounds the
    /// outbound ones. The engine does not run until [`serve`](Self::serve)
    /// is called.
    pub fn new(
        ctx: CancellationToken,
        reader: R,
        writer: W,
        recv_capacity: usize,
        send_capacity: usize,
    ) -> (Self, EngineHandle) {
        let (send_requests_tx, send_requests_rx) = mpsc::channel(send_capacity.max(1));
        let (send_notifications_tx, send_notifications_rx) = mpsc::channel(send_capacity.max(1));
        let (recv_requests_tx, recv_requests_rx) = mpsc::channel(recv_capacity.max(1));
        let (recv_notifications_tx, recv_notifications_rx) = mpsc::channel(recv_capacity.max(1));
        let (id_responses_tx, id_responses_rx) = mpsc::unbounded_channel();
        let (write_done_tx, write_done_rx) = mpsc::unbounded_channel();
        let (read_done_tx, read_done_rx) = mpsc::unbounded_channel();

        let engine = Engine {
            ctx,
            reader: Some(BufReader::new(reader)),
            writer: Some(writer),
            pending: HashMap::new(),
            ids: IdCounter::new(),
            writer_backlog: Vec::new(),
            writer_in_flight: false,
            send_requests_rx,
            send_requests_open: true,
            send_notifications_rx,
            send_notifications_open: true,
            recv_requests_tx,
            recv_notifications_tx,
            id_responses_tx,
            id_responses_rx,
            write_done_tx,
            write_done_rx,
            read_done_tx,
            read_done_rx,
        };
        let handle = EngineHandle {
            send_requests_tx,
            send_notifications_tx,
            recv_requests_rx: Arc::new(AsyncMutex::new(recv_requests_rx)),
            recv_notifications_rx: Arc::new(AsyncMutex::new(recv_notifications_rx)),
        };
        (engine, handle)
    }

    /// Runs the event loop until the transport hits end-of-stream, a
    /// transport write fails, a decode error occurs, or `ctx` is
    /// cancelled. Consumes the engine — there is only ever one dispatcher
    /// per engine instance.
    #[tracing_attributes::instrument(skip_all)]
    pub async fn serve(mut self) -> Result<(), EngineError> {
        self.launch_read();

        loop {
            tokio::select! {
                _ = self.ctx.cancelled() => {
                    debug!("engine context cancelled");
                    return Err(EngineError::Cancelled);
                }

                maybe = self.send_requests_rx.recv(), if self.send_requests_open => {
                    match maybe {
                        Some(call) => self.handle_send_request(call),
                        None => self.send_requests_open = false,
                    }
                }

                maybe = self.send_notifications_rx.recv(), if self.send_notifications_open => {
                    match maybe {
                        Some(n) => self.handle_send_notification(n),
                        None => self.send_notifications_open = false,
                    }
                }

                Some(outcome) = self.write_done_rx.recv() => {
                    match outcome {
                        WriteOutcome::Done(writer) => {
                            self.writer = Some(writer);
                            self.writer_in_flight = false;
                            if !self.writer_backlog.is_empty() {
                                self.launch_writer();
                            }
                        }
                        WriteOutcome::Err(e) => {
                            warn!("transport write failed: {e}");
                            return Err(e);
                        }
                    }
                }

                Some(outcome) = self.read_done_rx.recv() => {
                    match outcome {
                        ReadOutcome::Frame(reader, frame) => {
                            self.reader = Some(reader);
                            self.handle_inbound_frame(frame).await;
                            self.launch_read();
                        }
                        ReadOutcome::Err(e) => {
                            debug!("read loop terminating: {e}");
                            return Err(e);
                        }
                    }
                }

                Some((id, response)) = self.id_responses_rx.recv() => {
                    let outcome = if response.is_error() {
                        ResponseOutcome::Error(response.error)
                    } else {
                        ResponseOutcome::Result(response.result)
                    };
                    self.encode_and_enqueue(&Frame::Response { id, outcome });
                }
            }
        }
    }

    fn handle_send_request(&mut self, call: PendingCall) {
        let id = self.ids.next();
        let frame =
            Frame::Request { id: Value::String(id.clone()), method: call.request.method, params: call.request.params };
        match encode_frame(&frame) {
            Ok(bytes) => {
                self.writer_add(bytes);
                self.pending.insert(id, call.respond_to);
            }
            Err(e) => {
                // Dropping `call.respond_to` here (by letting it go out of
                // scope unused) closes the caller's oneshot immediately,
                // which is strictly better than the caller hanging until
                // engine termination.
                warn!("dropping outbound request, encode failed: {e}");
            }
        }
    }

    fn handle_send_notification(&mut self, n: Notification) {
        let frame = Frame::Notification { method: n.method, params: n.params };
        self.encode_and_enqueue(&frame);
    }

    async fn handle_inbound_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Request { id, method, params } => {
                let (respond_to, response) = oneshot::channel();
                if self.recv_requests_tx.send((Request { method, params }, respond_to)).await.is_err() {
                    trace!("no one is consuming inbound requests, dropping");
                    return;
                }
                let id_responses_tx = self.id_responses_tx.clone();
                tokio::spawn(async move {
                    if let Ok(response) = response.await {
                        let _ = id_responses_tx.send((id, response));
                    }
                });
            }
            Frame::Notification { method, params } => {
                let _ = self.recv_notifications_tx.send(Notification { method, params }).await;
            }
            Frame::Response { id, outcome } => {
                let Value::String(id) = id else {
                    trace!("dropping response with non-string id");
                    return;
                };
                let Some(sink) = self.pending.remove(&id) else {
                    trace!("dropping response for unknown id {id}");
                    return;
                };
                let response = match outcome {
                    ResponseOutcome::Result(r) => RpcResponse::result(r),
                    ResponseOutcome::Error(e) => RpcResponse::error(e),
                };
                let _ = sink.send(response);
            }
        }
    }

    fn encode_and_enqueue(&mut self, frame: &Frame) {
        match encode_frame(frame) {
            Ok(bytes) => self.writer_add(bytes),
            Err(e) => warn!("dropping outbound frame, encode failed: {e}"),
        }
    }

    fn writer_add(&mut self, bytes: Vec<u8>) {
        self.writer_backlog.push(bytes);
        if !self.writer_in_flight {
            self.launch_writer();
        }
    }

    fn launch_writer(&mut self) {
        let snapshot = std::mem::take(&mut self.writer_backlog);
        self.writer_in_flight = true;
        let mut writer = self.writer.take().expect("writer task already in flight");
        let tx = self.write_done_tx.clone();
        tokio::spawn(async move {
            for buf in &snapshot {
                if let Err(e) = writer.write_all(buf).await {
                    let _ = tx.send(WriteOutcome::Err(EngineError::Write(e)));
                    return;
                }
            }
            match writer.flush().await {
                Ok(()) => {
                    let _ = tx.send(WriteOutcome::Done(writer));
                }
                Err(e) => {
                    let _ = tx.send(WriteOutcome::Err(EngineError::Write(e)));
                }
            }
        });
    }

    fn launch_read(&mut self) {
        let mut reader = self.reader.take().expect("read task already in flight");
        let tx = self.read_done_tx.clone();
        tokio::spawn(async move {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "transport closed");
                    let _ = tx.send(ReadOutcome::Err(EngineError::Read(eof)));
                }
                Ok(_) => match decode_frame(&line) {
                    Ok(frame) => {
                        let _ = tx.send(ReadOutcome::Frame(reader, frame));
                    }
                    Err(e) => {
                        let _ = tx.send(ReadOutcome::Err(EngineError::Decode(e)));
                    }
                },
                Err(e) => {
                    let _ = tx.send(ReadOutcome::Err(EngineError::Read(e)));
                }
            }
        });
    }
}
