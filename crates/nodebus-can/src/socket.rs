//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "TCP simulated bus client and relay."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Socket-backed simulated bus.
//!
//! Nodes connect a [`SocketBus`] to a [`SocketRelay`]; the relay forwards
//! every frame from one client to all other clients, playing the role of the
//! physical wire. Framing lives in [`crate::wire`].

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nodebus_msg::Frame;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::transport::{BusOptions, BusTransport, OpenError, ReceiveError, SendError};
use crate::wire::{encode_frame, FrameDecoder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RELAY_POLL: Duration = Duration::from_millis(20);
/// A client that cannot take a frame within this long is dropped from the relay.
const RELAY_WRITE_TIMEOUT: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 512;

struct ReadSide {
    stream: TcpStream,
    decoder: FrameDecoder,
}

/// Client endpoint of the simulated socket bus.
pub struct SocketBus {
    peer: SocketAddr,
    reader: Mutex<ReadSide>,
    writer: Mutex<TcpStream>,
    options: BusOptions,
    closed: AtomicBool,
}

impl SocketBus {
    /// Connect to a relay at `addr`.
    pub fn open(addr: SocketAddr, options: BusOptions) -> Result<Self, OpenError> {
        let connect_err = |source| OpenError::Connect { addr, source };
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        let timeout = options.receive_timeout.max(Duration::from_millis(1));
        stream.set_read_timeout(Some(timeout)).map_err(connect_err)?;
        let writer = stream.try_clone().map_err(connect_err)?;
        info!(peer = %addr, "connected to socket bus");
        Ok(Self {
            peer: addr,
            reader: Mutex::new(ReadSide {
                stream,
                decoder: FrameDecoder::new(),
            }),
            writer: Mutex::new(writer),
            options,
            closed: AtomicBool::new(false),
        })
    }

    /// Relay address this endpoint is connected to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl BusTransport for SocketBus {
    fn send(&self, arbitration_id: u32, payload: &[u8]) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.options.check_len(payload.len())?;
        let frame =
            Frame::new(arbitration_id, payload).map_err(|err| SendError::Fault(err.to_string()))?;
        let mut writer = self.writer.lock();
        writer
            .write_all(&encode_frame(&frame))
            .map_err(|err| SendError::Fault(err.to_string()))
    }

    fn receive(&self) -> Result<Frame, ReceiveError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReceiveError::Closed);
        }
        let mut side = self.reader.lock();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = side
                .decoder
                .next_frame()
                .map_err(|err| ReceiveError::Fault(err.to_string()))?
            {
                return Ok(frame);
            }
            match side.stream.read(&mut chunk) {
                Ok(0) => return Err(ReceiveError::Closed),
                Ok(n) => side.decoder.push(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return if self.closed.load(Ordering::Acquire) {
                        Err(ReceiveError::Closed)
                    } else {
                        Err(ReceiveError::Empty)
                    };
                }
                Err(_) if self.closed.load(Ordering::Acquire) => return Err(ReceiveError::Closed),
                Err(err) => return Err(ReceiveError::Fault(err.to_string())),
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblocks a reader waiting in `read`.
        let _ = self.writer.lock().shutdown(Shutdown::Both);
        debug!(peer = %self.peer, "socket bus closed");
    }

    fn name(&self) -> &'static str {
        "socket"
    }
}

impl Drop for SocketBus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write side of one relay client. Its own lock keeps frames whole without
/// holding up writes to the other clients.
type ClientWriter = Arc<Mutex<TcpStream>>;
type ClientList = Arc<Mutex<Vec<(usize, ClientWriter)>>>;

/// Relay server forming the simulated bus wire.
pub struct SocketRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl SocketRelay {
    /// Bind the listening socket.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run on a background thread.
    pub fn spawn(self) -> io::Result<RelayHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let local_addr = self.local_addr;
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("nodebus-relay".into())
            .spawn(move || self.run(&flag))?;
        Ok(RelayHandle {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Accept clients and relay frames until `shutdown` is set.
    pub fn run(self, shutdown: &AtomicBool) -> io::Result<()> {
        self.listener.set_nonblocking(true)?;
        info!(addr = %self.local_addr, "socket relay listening");
        let clients: ClientList = Arc::default();
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();
        let mut next_id = 0usize;

        while !shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = next_id;
                    next_id += 1;
                    match register_client(id, stream, &clients, &stop) {
                        Ok(worker) => {
                            info!(client = id, %peer, "relay client connected");
                            workers.push(worker);
                        }
                        Err(err) => warn!(%peer, error = %err, "failed to register relay client"),
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(RELAY_POLL),
                Err(err) => return Err(err),
            }
        }

        stop.store(true, Ordering::Release);
        let drained: Vec<_> = clients.lock().drain(..).collect();
        for (_, writer) in drained {
            let _ = writer.lock().shutdown(Shutdown::Both);
        }
        for worker in workers {
            let _ = worker.join();
        }
        info!(addr = %self.local_addr, "socket relay stopped");
        Ok(())
    }
}

fn register_client(
    id: usize,
    stream: TcpStream,
    clients: &ClientList,
    stop: &Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(RELAY_POLL))?;
    stream.set_write_timeout(Some(RELAY_WRITE_TIMEOUT))?;
    let writer = stream.try_clone()?;
    clients.lock().push((id, Arc::new(Mutex::new(writer))));
    let clients = Arc::clone(clients);
    let stop = Arc::clone(stop);
    thread::Builder::new()
        .name(format!("nodebus-relay-{id}"))
        .spawn(move || relay_client(id, stream, &clients, &stop))
}

fn relay_client(id: usize, mut stream: TcpStream, clients: &ClientList, stop: &AtomicBool) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK];
    while !stop.load(Ordering::Acquire) {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => decoder.push(&chunk[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(client = id, error = %err, "relay client read failed");
                break;
            }
        }
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => forward(id, &frame, clients),
                Ok(None) => break,
                Err(err) => {
                    warn!(client = id, error = %err, "malformed stream, dropping client");
                    clients.lock().retain(|(other, _)| *other != id);
                    return;
                }
            }
        }
    }
    clients.lock().retain(|(other, _)| *other != id);
    info!(client = id, "relay client disconnected");
}

fn forward(from: usize, frame: &Frame, clients: &ClientList) {
    let bytes = encode_frame(frame);
    let peers: Vec<(usize, ClientWriter)> = clients
        .lock()
        .iter()
        .filter(|(id, _)| *id != from)
        .map(|(id, writer)| (*id, Arc::clone(writer)))
        .collect();

    let mut unreachable = Vec::new();
    for (id, writer) in peers {
        let mut stream = writer.lock();
        if let Err(err) = stream.write_all(&bytes) {
            debug!(client = id, error = %err, "dropping unreachable relay client");
            let _ = stream.shutdown(Shutdown::Both);
            unreachable.push(id);
        }
    }
    if !unreachable.is_empty() {
        clients.lock().retain(|(id, _)| !unreachable.contains(id));
    }
}

/// Handle to a relay running on its own thread.
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl RelayHandle {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, disconnect every client and wait for the relay thread.
    pub fn shutdown(mut self) -> io::Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> io::Result<()> {
        self.shutdown.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| io::Error::other("relay thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
