//! Byte channels the simulator answers on.
//!
//! A [`Session`] is one open serial port or one TCP listener. Its read loop runs
//! on a dedicated thread, polls with a bounded timeout so a stop request is seen
//! within [`POLL_INTERVAL`], and hands every received chunk to a
//! [`FrameHandler`]. Writes go through a cloneable [`Link`] so responses can be
//! sent from other threads while the loop keeps reading.

use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::events::EventLog;
use crate::frame::ascii_lossy;
use crate::hex::hex_dump;

mod serial;
mod tcp;

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParams {
    pub dev: String,
    pub baud: u32,
    pub rtscts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpParams {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParams {
    Serial(SerialParams),
    Tcp(TcpParams),
}

impl fmt::Display for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportParams::Serial(p) => write!(f, "serial {} @ {}", p.dev, p.baud),
            TransportParams::Tcp(p) => write!(f, "tcp {}:{}", p.host, p.port),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already open")]
    AlreadyOpen,
    #[error("open {dev}: {source}")]
    Serial {
        dev: String,
        #[source]
        source: serialport::Error,
    },
    #[error("listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("starting read loop: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no peer connected")]
    NotConnected,
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("link lock poisoned")]
    Poisoned,
}

/// Receives raw chunks from a session's read loop. Runs on that loop's thread,
/// so it is the only writer of whatever state it owns.
pub trait FrameHandler: Send + 'static {
    fn on_chunk(&mut self, bytes: &[u8], link: &Link);

    /// Called once when the read loop exits.
    fn on_close(&mut self) {}
}

type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Shared write side of a session.
///
/// The slot lock is only held to look up or swap the writer, never across a
/// write, so `detach` returns even while a send is blocked on a slow peer.
#[derive(Clone, Default)]
pub struct Link {
    slot: Arc<Mutex<Option<Writer>>>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Link {
    pub fn send(&self, bytes: &[u8]) -> Result<(), SendError> {
        let writer = self
            .slot
            .lock()
            .map_err(|_| SendError::Poisoned)?
            .clone()
            .ok_or(SendError::NotConnected)?;
        // serializes concurrent responses on the same channel
        let mut w = writer.lock().map_err(|_| SendError::Poisoned)?;
        w.write_all(bytes)?;
        w.flush()?;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    pub(crate) fn attach(&self, w: Box<dyn Write + Send>) {
        let writer = Arc::new(Mutex::new(w));
        match self.slot.lock() {
            Ok(mut g) => *g = Some(writer),
            Err(poisoned) => *poisoned.into_inner() = Some(writer),
        }
    }

    pub(crate) fn detach(&self) {
        match self.slot.lock() {
            Ok(mut g) => {
                g.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }
}

/// State shared between the session owner and its read loop.
struct LoopCtx {
    stop: Arc<AtomicBool>,
    link: Link,
    events: EventLog,
    handler: Box<dyn FrameHandler>,
}

impl LoopCtx {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn deliver(&mut self, label: &str, bytes: &[u8]) {
        self.events
            .info(format!("{label}RX [HEX]: {}", hex_dump(bytes)));
        self.events.info(format!(
            "{label}RX [ASCII]: {}",
            ascii_lossy(bytes).escape_debug()
        ));
        self.handler.on_chunk(bytes, &self.link);
    }
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub struct Session {
    params: TransportParams,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    link: Link,
    local_addr: Option<SocketAddr>,
}

impl Session {
    /// Open the channel and start its read loop.
    pub fn connect(
        params: &TransportParams,
        handler: Box<dyn FrameHandler>,
        events: EventLog,
    ) -> Result<Session, SessionError> {
        let stop = Arc::new(AtomicBool::new(false));
        let link = Link::default();
        let ctx = LoopCtx {
            stop: stop.clone(),
            link: link.clone(),
            events,
            handler,
        };

        let (worker, local_addr) = match params {
            TransportParams::Serial(p) => {
                let port = serial::open(p, &link)?;
                let h = thread::Builder::new()
                    .name("serial-rx".into())
                    .spawn(move || serial::read_loop(port, ctx))
                    .map_err(SessionError::Spawn)?;
                (h, None)
            }
            TransportParams::Tcp(p) => {
                let listener = tcp::bind(p)?;
                let addr = listener.local_addr().ok();
                let h = thread::Builder::new()
                    .name("tcp-accept".into())
                    .spawn(move || tcp::accept_loop(listener, ctx))
                    .map_err(SessionError::Spawn)?;
                (h, addr)
            }
        };

        Ok(Session {
            params: params.clone(),
            stop,
            worker: Some(worker),
            link,
            local_addr,
        })
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    #[cfg(test)]
    pub fn link(&self) -> Link {
        self.link.clone()
    }

    /// Bound address for TCP sessions.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the read loop and release the channel. Safe to call repeatedly.
    ///
    /// Responses already scheduled are not cancelled; they fail at send time.
    pub fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.worker.take() {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::debug!("{} read loop panicked", self.params);
                }
            } else {
                log::warn!(
                    "{} read loop still running after {:?}, detaching",
                    self.params,
                    JOIN_TIMEOUT
                );
            }
        }

        self.link.detach();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn link_send_requires_attachment() {
        let link = Link::default();
        assert!(matches!(link.send(b"x"), Err(SendError::NotConnected)));

        let (link, cap) = captured_link();
        link.send(b"@01*").unwrap();
        assert_eq!(cap.0.lock().unwrap().as_slice(), b"@01*");

        let other = link.clone();
        link.detach();
        assert!(!other.is_attached());
        assert!(matches!(other.send(b"x"), Err(SendError::NotConnected)));
    }

    #[test]
    fn serial_open_failure_is_reported() {
        let (events, _rx) = crate::events::channel();
        let (tx, _chunks) = std::sync::mpsc::channel();
        let params = TransportParams::Serial(SerialParams {
            dev: "/dev/does-not-exist-slave-sim".into(),
            baud: 115_200,
            rtscts: false,
        });
        let handler = Box::new(ChunkSink {
            chunks: tx,
            closed: Default::default(),
        });
        let err = Session::connect(&params, handler, events).err().unwrap();
        assert!(matches!(err, SessionError::Serial { .. }));
    }
}
