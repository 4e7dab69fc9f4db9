//! # Connection Server
//!
//! One OS thread per shard owns its `Shard` outright and never shares it:
//! a plain `std::sync::mpsc` channel carries requests in, a
//! `tokio::sync::oneshot` carries the reply back out. The shard thread
//! blocks on `recv_timeout` so it can also run its periodic expiration
//! sweep between requests without a separate timer thread.
//!
//! The tokio runtime only does I/O: each accepted connection is an async
//! task that parses RESP requests off the socket, asks [`crate::router`]
//! which shard owns the request's keys, forwards it, and awaits the
//! reply. No lock is ever held across shards; cross-shard commands are
//! rejected before they reach a shard at all.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use corekv_resp::{ParseError, Reply, RequestParser};
use corekv_store::shard::Shard;

use crate::config::ServerConfig;
use crate::dispatcher;
use crate::metrics::Metrics;
use crate::router;

/// One request in flight to a shard thread, paired with the channel its
/// reply comes back on.
struct ShardRequest {
    request: Vec<Vec<u8>>,
    reply_tx: oneshot::Sender<Reply>,
}

/// A shard's mailbox, as seen by the connection-handling side.
#[derive(Clone)]
struct ShardHandle {
    sender: std_mpsc::Sender<ShardRequest>,
}

impl ShardHandle {
    /// Sends `request` to this shard and awaits its reply. Only fails if
    /// the shard thread has exited, which only happens at shutdown.
    async fn call(&self, request: Vec<Vec<u8>>) -> Reply {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.send(ShardRequest { request, reply_tx }).is_err() {
            return Reply::Error("ERR shard unavailable".to_string());
        }
        match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => Reply::Error("ERR shard unavailable".to_string()),
        }
    }
}

/// Spawns the OS thread that owns shard `id`. The thread owns its
/// `Shard` and `SmallRng` for its entire lifetime; nothing outside this
/// thread ever touches them directly.
fn spawn_shard(id: usize, sweep_interval: std::time::Duration) -> ShardHandle {
    let (sender, receiver) = std_mpsc::channel::<ShardRequest>();
    std::thread::Builder::new()
        .name(format!("corekv-shard-{id}"))
        .spawn(move || {
            let mut shard = Shard::new(id);
            let mut rng = SmallRng::from_entropy();
            loop {
                match receiver.recv_timeout(sweep_interval) {
                    Ok(msg) => {
                        let now = Instant::now();
                        let reply = dispatcher::dispatch(&mut shard, &msg.request, now, &mut rng);
                        let _ = msg.reply_tx.send(reply);
                    }
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {
                        let expired = shard.sweep_expired(Instant::now());
                        if expired > 0 {
                            debug!(shard = id, expired, "swept expired keys");
                        }
                    }
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .expect("failed to spawn shard thread");
    ShardHandle { sender }
}

/// Shared state every connection task holds a clone (by `Arc`) of.
struct ServerState {
    shards: Vec<ShardHandle>,
    metrics: Arc<Metrics>,
    next_connection_id: AtomicUsize,
}

impl ServerState {
    fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Binds `config.bind_addr` and serves connections until the process is
/// killed. Spawns all shard threads up front so the first connection
/// never races shard startup.
pub async fn run(config: ServerConfig) -> io::Result<()> {
    let listener = bind_listener(&config.bind_addr, config.backlog)?;
    serve(listener, config).await
}

/// Binds `addr` through `socket2` so `backlog` actually reaches
/// `listen(2)` instead of the OS default: `tokio::net::TcpListener::bind`
/// has no way to pass a backlog of its own.
fn bind_listener(addr: &str, backlog: u32) -> io::Result<TcpListener> {
    let addr: SocketAddr = addr.parse().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid bind address"))?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    TcpListener::from_std(socket.into())
}

/// Serves connections on an already-bound `listener` until the process is
/// killed or the listener errors out. Split from [`run`] so tests can bind
/// an ephemeral port (`127.0.0.1:0`), read back the real address with
/// `TcpListener::local_addr`, and drive the server exactly as a deployed
/// process would without racing a fixed port.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> io::Result<()> {
    let shards: Vec<ShardHandle> = (0..config.shard_count).map(|id| spawn_shard(id, config.expire_sweep_interval)).collect();
    info!(shard_count = config.shard_count, bind_addr = %config.bind_addr, "starting server");

    let state = Arc::new(ServerState { shards, metrics: Arc::new(Metrics::new()), next_connection_id: AtomicUsize::new(0) });

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        let connection_id = state.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            debug!(connection_id, %peer, "connection accepted");
            if let Err(err) = handle_connection(stream, state).await {
                warn!(connection_id, %peer, error = %err, "connection ended with error");
            }
        });
    }
}

/// Reads requests off `stream` until EOF or a protocol error, dispatches
/// each to its owning shard, and writes back the reply.
async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let mut parser = RequestParser::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut out = Vec::with_capacity(256);

    loop {
        let request = loop {
            match parser.parse(&mut buf) {
                Ok(Some(request)) => break request,
                Ok(None) => {
                    let mut chunk = [0u8; 4096];
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Ok(());
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(err) => {
                    write_parse_error(&mut out, err);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        };

        if request.is_empty() {
            continue;
        }

        state.metrics.record_request_start();
        let started = Instant::now();
        let reply = dispatch_request(&state, request).await;
        state.metrics.record_request_end(started.elapsed());
        if matches!(reply, Reply::Error(_)) {
            state.metrics.record_error();
        }

        out.clear();
        reply.write_to(&mut out);
        stream.write_all(&out).await?;
    }
}

/// Routes one parsed request to the shard owning its keys, or replies
/// with an error if the keys span more than one shard.
async fn dispatch_request(state: &ServerState, request: Vec<Vec<u8>>) -> Reply {
    let shard_id = router::single_shard(&request[0], &request[1..], state.shard_count());
    match shard_id {
        Some(shard_id) => state.shards[shard_id].call(request).await,
        None => Reply::Error("ERR keys in request don't hash to the same shard".to_string()),
    }
}

fn write_parse_error(out: &mut Vec<u8>, err: ParseError) {
    let message = match err {
        ParseError::Protocol(detail) => format!("ERR Protocol error: {detail}"),
        ParseError::InlineTooLong => "ERR Protocol error: too big inline request".to_string(),
    };
    error!(%message, "closing connection after protocol error");
    Reply::Error(message).write_to(out);
}
