//! TCP ingestion server: listener lifecycle, accept loop, and per-connection
//! framing, decode, and dispatch.
//!
//! One `TcpIngestServer` owns at most one listening socket at a time. Each
//! accepted fixture connection gets its own task and its own
//! `FrameAssembler`; messages from one connection are decoded and dispatched
//! strictly in extraction order. Nothing here is fatal to the process: every
//! failure is scoped to one connection or one operation and reported through
//! the `EventSink`.

use crate::copy::CopyStats;
use crate::decode::{self, DecodedMessage};
use crate::dispatch::Dispatcher;
use crate::events::EventSink;
use crate::frame::{FrameAssembler, DEFAULT_MAX_PENDING};
use crate::ingest_log::{IngestLog, IngestLogEntry, IngestStatus};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};

/// Lifecycle of the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
}

enum Lifecycle {
    Stopped,
    Starting,
    Running(RunningServer),
}

struct RunningServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    shared: Arc<Shared>,
}

/// State one server run shares with its accept loop and connection tasks.
struct Shared {
    sink: Arc<dyn EventSink>,
    dispatcher: Dispatcher,
    max_pending: usize,
    ingest_log: Option<IngestLog>,
    connections: Mutex<HashMap<SocketAddr, AbortHandle>>,
}

pub struct TcpIngestServer {
    sink: Arc<dyn EventSink>,
    dispatcher: Dispatcher,
    max_pending: usize,
    ingest_log: Option<IngestLog>,
    state: Mutex<Lifecycle>,
}

impl TcpIngestServer {
    pub fn new(dispatcher: Dispatcher, sink: Arc<dyn EventSink>) -> Self {
        TcpIngestServer {
            sink,
            dispatcher,
            max_pending: DEFAULT_MAX_PENDING,
            ingest_log: None,
            state: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Cap on unterminated bytes buffered per connection; exceeding it tears
    /// that connection down.
    pub fn max_pending(mut self, bytes: usize) -> Self {
        self.max_pending = bytes;
        self
    }

    /// Record every ingested message in a JSONL log.
    pub fn ingest_log(mut self, log: IngestLog) -> Self {
        self.ingest_log = Some(log);
        self
    }

    pub fn state(&self) -> ServerState {
        match &*self.state.lock() {
            Lifecycle::Stopped => ServerState::Stopped,
            Lifecycle::Starting => ServerState::Starting,
            Lifecycle::Running(_) => ServerState::Running,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            Lifecycle::Running(r) => Some(r.local_addr),
            _ => None,
        }
    }

    pub fn connection_count(&self) -> usize {
        match &*self.state.lock() {
            Lifecycle::Running(r) => r.shared.connections.lock().len(),
            _ => 0,
        }
    }

    /// Bind the listener and begin accepting fixture connections. Fails fast
    /// if this server is already running; the live listener is untouched.
    /// Bind failures revert the state to stopped and surface the underlying
    /// error to both the caller and the observer.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        {
            let mut state = self.state.lock();
            match &*state {
                Lifecycle::Stopped => *state = Lifecycle::Starting,
                Lifecycle::Starting | Lifecycle::Running(_) => {
                    let msg = "server is already running";
                    self.sink.server_error(msg);
                    bail!(msg);
                }
            }
        }

        let listener = match TcpListener::bind((host, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.lock() = Lifecycle::Stopped;
                self.sink.server_error(&format!("bind {host}:{port}: {e}"));
                return Err(e).with_context(|| format!("bind {host}:{port}"));
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                *self.state.lock() = Lifecycle::Stopped;
                self.sink.server_error(&format!("local addr: {e}"));
                return Err(e).context("query bound address");
            }
        };

        let shared = Arc::new(Shared {
            sink: Arc::clone(&self.sink),
            dispatcher: self.dispatcher.clone(),
            max_pending: self.max_pending,
            ingest_log: self.ingest_log.clone(),
            connections: Mutex::new(HashMap::new()),
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        {
            let mut state = self.state.lock();
            if !matches!(&*state, Lifecycle::Starting) {
                // stop() intervened while we were binding; it already came to
                // rest at Stopped and must win.
                accept_task.abort();
                let msg = "server stopped during startup";
                self.sink.server_error(msg);
                bail!(msg);
            }
            *state = Lifecycle::Running(RunningServer {
                local_addr,
                accept_task,
                shared,
            });
        }

        self.sink
            .server_running(&local_addr.ip().to_string(), local_addr.port());
        Ok(local_addr)
    }

    /// Stop the listener and forcibly destroy every active connection, with
    /// no graceful drain. Idempotent: stopping a stopped server still emits
    /// the stopped status exactly once.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.state.lock();
            // Always come to rest at Stopped: a start() cancelled mid-bind
            // leaves the state mid-transition, and stop() must recover it.
            match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Running(r) => Some(r),
                _ => None,
            }
        };

        if let Some(running) = running {
            running.accept_task.abort();
            let _ = running.accept_task.await;
            let handles: Vec<AbortHandle> = {
                let mut connections = running.shared.connections.lock();
                connections.drain().map(|(_, handle)| handle).collect()
            };
            for handle in handles {
                handle.abort();
            }
        }
        self.sink.server_stopped();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                let conn_shared = Arc::clone(&shared);
                // Hold the registry lock across spawn-plus-insert: the task
                // deregisters itself on exit, and that removal must not be
                // able to run before the peer is registered.
                let mut connections = shared.connections.lock();
                let task = tokio::spawn(async move {
                    handle_connection(stream, peer, &conn_shared).await;
                });
                connections.insert(peer, task.abort_handle());
            }
            Err(e) => {
                // Accept errors are transient (fd exhaustion and the like);
                // the listener itself stays up.
                shared.sink.server_error(&format!("accept: {e}"));
            }
        }
    }
}

/// Read loop for one fixture connection. Runs until EOF, socket error, or
/// pending-buffer overflow; other connections are unaffected either way.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: &Shared) {
    let client = peer.to_string();
    shared.sink.client_connected(&client);

    let mut assembler = FrameAssembler::with_max_pending(shared.max_pending);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(overflow) = assembler.feed(&buf[..n]) {
                    shared.sink.server_error(&format!("{client}: {overflow}"));
                    break;
                }
                // Drain every currently complete message before the next
                // read so one connection's messages stay in order.
                let messages: Vec<String> = assembler.messages().collect();
                for raw in messages {
                    process_message(&client, &raw, shared).await;
                }
            }
            Err(e) => {
                shared.sink.server_error(&format!("socket error from {client}: {e}"));
                break;
            }
        }
    }

    shared.connections.lock().remove(&peer);
    shared.sink.client_disconnected(&client);
}

/// Handle one complete message: report the raw text, decode, dispatch the
/// file copies, and record the outcome. A decode failure is reported and
/// leaves the connection ready for the next message.
async fn process_message(client: &str, raw: &str, shared: &Shared) {
    shared.sink.data(client, raw);
    shared.dispatcher.logger().message(client, raw.len());

    match decode::decode(raw) {
        Ok(msg) => {
            let stats = shared.dispatcher.dispatch(&msg).await;
            record_ingest(shared, client, raw, IngestStatus::Decoded, Some((&msg, &stats)), None);
        }
        Err(e) => {
            let message = format!("XML parsing error: {e:#}");
            shared.sink.decode_error(&message);
            record_ingest(shared, client, raw, IngestStatus::DecodeFailed, None, Some(message));
        }
    }
}

fn record_ingest(
    shared: &Shared,
    client: &str,
    raw: &str,
    status: IngestStatus,
    decoded: Option<(&DecodedMessage, &CopyStats)>,
    error: Option<String>,
) {
    let Some(log) = &shared.ingest_log else {
        return;
    };
    let (blocks, files_copied, copy_errors) = match decoded {
        Some((DecodedMessage::TestResult(result), stats)) => {
            (result.blocks.len(), stats.files_copied, stats.errors.len())
        }
        Some((DecodedMessage::Other(_), stats)) => (0, stats.files_copied, stats.errors.len()),
        None => (0, 0, 0),
    };
    let entry = IngestLogEntry {
        timestamp: Utc::now().to_rfc3339(),
        client: client.to_string(),
        bytes: raw.len(),
        status,
        blocks,
        files_copied,
        copy_errors,
        error,
    };
    if let Err(e) = log.add_entry(entry) {
        eprintln!("ingest log write failed: {e:#}");
    }
}
