//! Single-threaded Modbus TCP server loop.
//!
//! One thread owns the listener and every accepted connection. All
//! sockets are nonblocking; each pass accepts whatever is pending, drains
//! whatever is readable through the per-connection [`DataService`], and
//! writes the responses. Nothing in the loop blocks on I/O, so one stalled
//! peer cannot starve the rest. Closing a connection frees its deframer
//! buffer immediately.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use mb_common::{MbError, MbResult, ServerConfig};
use mb_data::SharedDataStore;

use crate::metrics::ServerMetrics;
use crate::service::DataService;

/// Idle pause between loop passes when no socket had work.
const IDLE_TICK: Duration = Duration::from_millis(1);

/// Bytes read per pass; the deframer buffers partial frames across reads,
/// so a frame larger than one chunk completes on a later pass.
const READ_CHUNK: usize = 256;

/// Listen backlog.
#[cfg(unix)]
const LISTEN_BACKLOG: libc::c_int = 10;

/// Create the listening socket with SO_REUSEADDR set and a backlog of 10.
///
/// `std::net::TcpListener::bind` exposes neither knob, so the socket is
/// built through libc and handed to the standard listener afterwards.
#[cfg(unix)]
#[allow(unsafe_code)]
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    use std::os::fd::FromRawFd;

    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let setup = || {
        let one: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                (&one as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let rc = match addr {
            SocketAddr::V4(v4) => {
                let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                unsafe {
                    libc::bind(
                        fd,
                        (&sin as *const libc::sockaddr_in).cast(),
                        std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    )
                }
            }
            SocketAddr::V6(v6) => {
                let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_scope_id = v6.scope_id();
                unsafe {
                    libc::bind(
                        fd,
                        (&sin6 as *const libc::sockaddr_in6).cast(),
                        std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    )
                }
            }
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }

        if unsafe { libc::listen(fd, LISTEN_BACKLOG) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    };

    match setup() {
        Ok(()) => Ok(unsafe { TcpListener::from_raw_fd(fd) }),
        Err(err) => {
            unsafe { libc::close(fd) };
            Err(err)
        }
    }
}

/// Fallback without the reuse-address and backlog knobs.
#[cfg(not(unix))]
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr)
}

/// What one poll pass found on a connection.
enum Poll {
    /// Nothing readable.
    Idle,
    /// Bytes were drained and any responses written.
    Busy,
    /// The peer closed its end.
    Eof,
}

/// One accepted connection.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    service: DataService,
    reported_discards: u64,
}

impl Connection {
    /// Drain available bytes and answer every complete request.
    ///
    /// An I/O failure or a protocol breakdown comes back as an error; the
    /// caller drops the connection either way.
    fn poll(&mut self, metrics: &ServerMetrics) -> MbResult<Poll> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.stream.read(&mut chunk) {
            Ok(0) => return Ok(Poll::Eof),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Poll::Idle),
            Err(e) => return Err(e.into()),
        };

        let mut responses = Vec::new();
        self.service
            .feed(&chunk[..n], |bytes| responses.push(bytes.to_vec()))?;

        let discards = self.service.resync_discards();
        if discards > self.reported_discards {
            metrics.record_resync_discards(discards - self.reported_discards);
            self.reported_discards = discards;
        }

        for response in responses {
            metrics.record_response(response[7] & 0x80 != 0);
            self.stream.write_all(&response)?;
        }
        Ok(Poll::Busy)
    }
}

/// The Modbus TCP slave endpoint.
pub struct ModbusTcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Vec<Connection>,
    store: SharedDataStore,
    metrics: Arc<ServerMetrics>,
    stop: Arc<AtomicBool>,
}

impl ModbusTcpServer {
    /// Bind the listening socket with SO_REUSEADDR and a backlog of 10.
    /// The listener and all accepted sockets run nonblocking.
    pub fn bind(config: &ServerConfig, store: SharedDataStore) -> MbResult<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MbError::Config(format!("cannot resolve {}", config.host)))?;
        let listener = bind_listener(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Modbus TCP server bound");

        Ok(Self {
            listener,
            local_addr,
            connections: Vec::new(),
            store,
            metrics: Arc::new(ServerMetrics::new()),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound address (useful with an ephemeral port).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The server's counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Flag that makes [`ModbusTcpServer::run`] return; shareable with a
    /// signal handler.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the event loop until the stop flag is raised.
    pub fn run(&mut self) -> MbResult<()> {
        info!(addr = %self.local_addr, "Modbus TCP server running");
        while !self.stop.load(Ordering::Relaxed) {
            let mut busy = self.accept_pending();

            let mut index = 0;
            while index < self.connections.len() {
                match self.connections[index].poll(&self.metrics) {
                    Ok(Poll::Busy) => {
                        busy = true;
                        index += 1;
                    }
                    Ok(Poll::Idle) => index += 1,
                    Ok(Poll::Eof) => {
                        let conn = self.connections.swap_remove(index);
                        self.metrics.record_close();
                        info!(peer = %conn.peer, "connection closed");
                    }
                    Err(err) => {
                        let conn = self.connections.swap_remove(index);
                        self.metrics.record_close();
                        warn!(peer = %conn.peer, error = %err, "connection dropped");
                    }
                }
            }

            if !busy {
                std::thread::sleep(IDLE_TICK);
            }
        }
        info!(metrics = ?self.metrics.snapshot(), "Modbus TCP server stopped");
        Ok(())
    }

    /// Accept every connection the listener has ready.
    fn accept_pending(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        error!(%peer, error = %e, "failed to configure socket");
                        continue;
                    }
                    info!(%peer, "new connection");
                    self.metrics.record_accept();
                    self.connections.push(Connection {
                        stream,
                        peer,
                        service: DataService::new(Arc::clone(&self.store)),
                        reported_discards: 0,
                    });
                    accepted = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
        accepted
    }

    /// Run the loop on a background thread; the returned handle stops and
    /// joins it.
    #[must_use]
    pub fn spawn(mut self) -> ServerHandle {
        let local_addr = self.local_addr;
        let stop = self.stop_flag();
        let metrics = self.metrics();
        let thread = std::thread::spawn(move || {
            if let Err(e) = self.run() {
                error!(error = %e, "server loop failed");
            }
        });
        ServerHandle {
            local_addr,
            stop,
            metrics,
            thread: Some(thread),
        }
    }
}

/// Handle to a server running on a background thread.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    metrics: Arc<ServerMetrics>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The server's counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Raise the stop flag and wait for the loop to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_data::{shared, DataStore};
    use std::io::{Read, Write};

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        }
    }

    fn start_server(store: DataStore) -> ServerHandle {
        let server = ModbusTcpServer::bind(&test_config(), shared(store)).unwrap();
        server.spawn()
    }

    fn request_response(stream: &mut TcpStream, request: &[u8], response_len: usize) -> Vec<u8> {
        stream.write_all(request).unwrap();
        let mut response = vec![0u8; response_len];
        stream.read_exact(&mut response).unwrap();
        response
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let server = ModbusTcpServer::bind(&test_config(), shared(DataStore::new(4, 4, 4, 4)))
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn test_serves_read_request() {
        let mut store = DataStore::new(0, 0, 0, 20);
        let values: Vec<u16> = (11..=20).collect();
        store.write_input_registers(0, &values).unwrap();
        let handle = start_server(store);

        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let request = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x00, 0x00, 0x0A,
        ];
        let response = request_response(&mut stream, &request, 29);
        assert_eq!(response[7], 0x04);
        assert_eq!(response[8], 0x14);
        assert_eq!(&response[9..11], [0x00, 0x0B]);

        handle.stop();
    }

    #[test]
    fn test_two_requests_in_one_segment() {
        let handle = start_server(DataStore::new(16, 0, 16, 0));

        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let first = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
        ];
        let second = [
            0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        let mut both = first.to_vec();
        both.extend_from_slice(&second);
        stream.write_all(&both).unwrap();

        // Responses come back in request order: 11 bytes then 10.
        let mut response = vec![0u8; 21];
        stream.read_exact(&mut response).unwrap();
        assert_eq!(&response[0..2], [0x00, 0x01]);
        assert_eq!(response[7], 0x03);
        assert_eq!(&response[11..13], [0x00, 0x02]);
        assert_eq!(response[18], 0x01);

        let metrics = handle.metrics().snapshot();
        assert_eq!(metrics.frames_received, 2);
        assert_eq!(metrics.responses_sent, 2);

        handle.stop();
    }

    #[test]
    fn test_split_request_across_segments() {
        let handle = start_server(DataStore::new(0, 0, 8, 0));

        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let request = [
            0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02,
        ];
        stream.write_all(&request[..5]).unwrap();
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        stream.write_all(&request[5..]).unwrap();

        let mut response = vec![0u8; 13];
        stream.read_exact(&mut response).unwrap();
        assert_eq!(&response[0..2], [0x00, 0x07]);
        assert_eq!(response[8], 0x04);

        handle.stop();
    }

    #[test]
    fn test_resync_then_recover() {
        let handle = start_server(DataStore::new(0, 0, 8, 0));

        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        // Impossible length field: silently discarded, no response, the
        // connection survives.
        let garbage = [0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0x01, 0x03];
        stream.write_all(&garbage).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let request = [
            0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
        ];
        let response = request_response(&mut stream, &request, 11);
        assert_eq!(&response[0..2], [0x00, 0x02]);
        assert_eq!(response[7], 0x03);

        let metrics = handle.metrics().snapshot();
        assert_eq!(metrics.resync_discards, 1);

        handle.stop();
    }

    #[test]
    fn test_concurrent_connections() {
        let mut store = DataStore::new(0, 0, 4, 0);
        store.write_holding_registers(0, &[42]).unwrap();
        let handle = start_server(store);
        let addr = handle.local_addr();

        let workers: Vec<_> = (0u8..3)
            .map(|i| {
                std::thread::spawn(move || {
                    let mut stream = TcpStream::connect(addr).unwrap();
                    stream
                        .set_read_timeout(Some(Duration::from_secs(5)))
                        .unwrap();
                    let request = [
                        0x00, i, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
                    ];
                    let response = request_response(&mut stream, &request, 11);
                    assert_eq!(response[1], i);
                    u16::from_be_bytes([response[9], response[10]])
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), 42);
        }

        let metrics = handle.metrics().snapshot();
        assert_eq!(metrics.connections_accepted, 3);

        handle.stop();
    }

    #[test]
    fn test_unit_id_echoed_not_dispatched_on() {
        let handle = start_server(DataStore::new(0, 0, 4, 0));

        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        for unit_id in [0x01, 0x42, 0xFF] {
            let request = [
                0x00, 0x01, 0x00, 0x00, 0x00, 0x06, unit_id, 0x03, 0x00, 0x00, 0x00, 0x01,
            ];
            let response = request_response(&mut stream, &request, 11);
            assert_eq!(response[6], unit_id);
            assert_eq!(response[7], 0x03);
        }

        handle.stop();
    }
}
