use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use super::{LoopCtx, POLL_INTERVAL, READ_CHUNK, SessionError, TcpParams, is_poll_timeout};

const ACCEPT_POLL: Duration = Duration::from_millis(20);
/// Bounds a response write to a client that stopped reading.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub(super) fn bind(params: &TcpParams) -> Result<TcpListener, SessionError> {
    let addr = format!("{}:{}", params.host, params.port);
    let err = |source| SessionError::Bind {
        addr: addr.clone(),
        source,
    };
    let listener = TcpListener::bind((params.host.as_str(), params.port)).map_err(err)?;
    // accept() is polled so the stop flag is honoured between clients
    listener.set_nonblocking(true).map_err(err)?;
    Ok(listener)
}

/// Serve one client at a time until stopped; the listener outlives clients.
pub(super) fn accept_loop(listener: TcpListener, mut ctx: LoopCtx) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    ctx.events
        .info(format!("TCP server listening on {local}, waiting for a client"));

    while !ctx.stopped() {
        match listener.accept() {
            Ok((stream, peer)) => {
                serve_client(stream, peer, &mut ctx);
                if !ctx.stopped() {
                    ctx.events
                        .info("TCP client gone, waiting for the next client");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                ctx.events.error(format!("TCP accept error: {e}"));
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    ctx.handler.on_close();
    log::debug!("TCP accept loop on {local} exited");
}

fn serve_client(mut stream: TcpStream, peer: SocketAddr, ctx: &mut LoopCtx) {
    // accepted sockets inherit non-blocking mode on some platforms
    let prepared = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(POLL_INTERVAL)))
        .and_then(|_| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
        .and_then(|_| stream.try_clone());
    let writer = match prepared {
        Ok(w) => w,
        Err(e) => {
            ctx.events
                .error(format!("TCP client {peer} rejected: {e}"));
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    ctx.link.attach(Box::new(writer));
    ctx.events.info(format!("TCP client connected: {peer}"));

    let mut buf = [0u8; READ_CHUNK];
    while !ctx.stopped() {
        match stream.read(&mut buf) {
            Ok(0) => {
                ctx.events.info(format!("TCP client {peer} disconnected"));
                break;
            }
            Ok(n) => ctx.deliver("TCP ", &buf[..n]),
            Err(e) if is_poll_timeout(&e) => continue,
            Err(e) => {
                ctx.events.error(format!("TCP read error from {peer}: {e}"));
                break;
            }
        }
    }

    ctx.link.detach();
    // also fails any response still blocked writing to this client
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        log::debug!("shutdown {peer}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    use super::super::testing::ChunkSink;
    use super::super::*;

    fn start() -> (Session, mpsc::Receiver<Vec<u8>>, Arc<AtomicBool>) {
        let (events, _rx) = crate::events::channel();
        let (tx, chunks) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let handler = Box::new(ChunkSink {
            chunks: tx,
            closed: closed.clone(),
        });
        let params = TransportParams::Tcp(TcpParams {
            host: "127.0.0.1".into(),
            port: 0,
        });
        let session = Session::connect(&params, handler, events).unwrap();
        (session, chunks, closed)
    }

    fn wait_until(f: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn serves_successive_clients() {
        let (session, chunks, _) = start();
        let addr = session.local_addr().unwrap();
        let link = session.link();

        for msg in [&b"first"[..], &b"second"[..]] {
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(msg).unwrap();
            let got = chunks.recv_timeout(Duration::from_secs(3)).unwrap();
            assert_eq!(got, msg);
            assert!(link.is_attached());
            drop(client);
            assert!(wait_until(|| !link.is_attached()));
        }
        assert!(session.is_open());
    }

    #[test]
    fn link_writes_reach_the_client() {
        let (session, _chunks, _) = start();
        let mut client = TcpStream::connect(session.local_addr().unwrap()).unwrap();
        let link = session.link();
        assert!(wait_until(|| link.is_attached()));

        link.send(b"@81*FF").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"@81*FF");
    }

    #[test]
    fn disconnect_is_bounded_and_idempotent() {
        let (mut session, _chunks, closed) = start();
        // park the loop in a client read
        let _client = TcpStream::connect(session.local_addr().unwrap()).unwrap();
        let link = session.link();
        assert!(wait_until(|| link.is_attached()));

        let t0 = Instant::now();
        session.disconnect();
        assert!(t0.elapsed() < JOIN_TIMEOUT);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!session.is_open());
        assert!(matches!(link.send(b"late"), Err(SendError::NotConnected)));

        session.disconnect();
    }

    #[test]
    fn disconnect_is_bounded_while_a_send_is_blocked() {
        let (mut session, _chunks, _) = start();
        // never reads, so the socket buffers fill up
        let _client = TcpStream::connect(session.local_addr().unwrap()).unwrap();
        let link = session.link();
        assert!(wait_until(|| link.is_attached()));

        let sender = thread::spawn(move || {
            let block = vec![b'A'; 1 << 20];
            loop {
                if let Err(e) = link.send(&block) {
                    return e;
                }
            }
        });
        thread::sleep(Duration::from_millis(300));

        let t0 = Instant::now();
        session.disconnect();
        assert!(t0.elapsed() < JOIN_TIMEOUT);
        assert!(!session.is_open());

        let err = sender.join().unwrap();
        assert!(matches!(err, SendError::Io(_) | SendError::NotConnected));
    }

    #[test]
    fn bind_conflict_is_a_connect_error() {
        let (session, _chunks, _) = start();
        let taken = session.local_addr().unwrap().port();
        let (events, _rx) = crate::events::channel();
        let (tx, _c) = mpsc::channel();
        let handler = Box::new(ChunkSink {
            chunks: tx,
            closed: Default::default(),
        });
        let params = TransportParams::Tcp(TcpParams {
            host: "127.0.0.1".into(),
            port: taken,
        });
        let err = Session::connect(&params, handler, events).err().unwrap();
        assert!(matches!(err, SessionError::Bind { .. }));
    }
}
