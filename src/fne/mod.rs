//! FNE peer session
//!
//! Maintains the authenticated UDP session with the DVMProject FNE and
//! serializes all outbound traffic.
//!
//! # Thread Model
//!
//! 1. **Handshake** runs on the caller's thread inside [`FneSession::connect`],
//!    serialized by a connect mutex: RPTL login, RPTK salted-SHA-256 key,
//!    RPTC peer configuration, each awaited with a 5-second deadline.
//!
//! 2. **Heartbeat thread** sends a 43-byte PING every 5 seconds while
//!    connected, sleeping in 1-second steps so shutdown stays bounded.
//!
//! 3. **Receive thread** drains inbound datagrams on a 1-second deadline. It
//!    only recognizes PONG; a receive error marks the session disconnected,
//!    fires the connection callback, and exits.
//!
//! 4. **Reconnect supervisor** (optional) retries `connect` whenever the
//!    session is down, sleeping the reconnect interval in 1-second steps.
//!
//! # Synchronization Strategy
//!
//! One send mutex guards the socket handle and the RTP sequence/timestamp
//! counters; header builds happen only under it, so the outbound byte stream
//! is totally ordered and the counters never race. The connection callback is
//! always invoked outside every lock.

pub mod codec;
pub mod constants;

use crate::call::StreamSink;
use crate::error::{Error, Result};
use codec::{TxCounters, VoiceGroup};
use constants::*;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Connection-state notification, single slot
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Socket handle plus RTP counters, guarded by the send mutex
struct TxState {
    socket: Option<Arc<UdpSocket>>,
    counters: TxCounters,
}

#[derive(Default)]
struct SessionThreads {
    heartbeat: Option<JoinHandle<()>>,
    receive: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

/// Authenticated peer session with the FNE
pub struct FneSession {
    host: String,
    port: u16,
    peer_id: u32,
    password: String,
    identity: String,
    wacn: u32,
    system_id: u16,

    tx: Arc<Mutex<TxState>>,
    stream_id: AtomicU32,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    reconnect_enabled: Arc<AtomicBool>,
    reconnect_interval: AtomicU64,
    connect_lock: Mutex<()>,
    threads: Mutex<SessionThreads>,
    callback: Arc<Mutex<Option<ConnectionCallback>>>,
}

impl FneSession {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        peer_id: u32,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            peer_id,
            password: password.into(),
            identity: DEFAULT_IDENTITY.to_string(),
            wacn: DEFAULT_WACN,
            system_id: DEFAULT_SYSTEM_ID,
            tx: Arc::new(Mutex::new(TxState {
                socket: None,
                counters: TxCounters::new(),
            })),
            stream_id: AtomicU32::new(0),
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            reconnect_enabled: Arc::new(AtomicBool::new(false)),
            reconnect_interval: AtomicU64::new(DEFAULT_RECONNECT_INTERVAL_SECS),
            connect_lock: Mutex::new(()),
            threads: Mutex::new(SessionThreads::default()),
            callback: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = identity.into();
    }

    pub fn set_wacn(&mut self, wacn: u32) {
        self.wacn = wacn;
    }

    pub fn set_system_id(&mut self, system_id: u16) {
        self.system_id = system_id;
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(callback);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Connect and authenticate
    ///
    /// Tears down any previous socket generation, resolves the FNE address,
    /// runs the three-step handshake, then starts the heartbeat and receive
    /// threads. Fires the connection callback with `true` on success.
    pub fn connect(&self) -> Result<()> {
        let guard = self.connect_lock.lock().map_err(|_| Error::MutexPoisoned)?;

        if self.connected.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Tear down the previous generation before rebuilding
        if self.running.swap(false, Ordering::Relaxed) {
            self.join_io_threads();
        }
        {
            let mut tx = self.lock_tx()?;
            tx.socket = None;
        }

        log::info!("FNE: connecting to {}:{}", self.host, self.port);

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Handshake(format!("failed to resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| Error::Handshake(format!("no address for {}", self.host)))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;

        self.authenticate(&socket)?;

        socket.set_read_timeout(Some(Duration::from_secs(RECV_TIMEOUT_SECS)))?;
        let socket = Arc::new(socket);
        {
            let mut tx = self.lock_tx()?;
            tx.socket = Some(Arc::clone(&socket));
        }

        self.connected.store(true, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);

        {
            let mut threads = self.threads.lock().map_err(|_| Error::MutexPoisoned)?;

            let tx = Arc::clone(&self.tx);
            let running = Arc::clone(&self.running);
            let connected = Arc::clone(&self.connected);
            let callback = Arc::clone(&self.callback);
            let peer_id = self.peer_id;
            threads.heartbeat = Some(
                thread::Builder::new()
                    .name("fne-heartbeat".to_string())
                    .spawn(move || heartbeat_loop(tx, running, connected, callback, peer_id))
                    .map_err(|e| Error::Other(format!("failed to spawn heartbeat: {}", e)))?,
            );

            let running = Arc::clone(&self.running);
            let connected = Arc::clone(&self.connected);
            let callback = Arc::clone(&self.callback);
            threads.receive = Some(
                thread::Builder::new()
                    .name("fne-receive".to_string())
                    .spawn(move || receive_loop(socket, running, connected, callback))
                    .map_err(|e| Error::Other(format!("failed to spawn receive: {}", e)))?,
            );
        }

        log::info!("FNE: connected");

        drop(guard);
        fire_callback(&self.callback, true);
        Ok(())
    }

    /// Disconnect, join all session threads, and notify
    pub fn disconnect(&self) {
        self.reconnect_enabled.store(false, Ordering::Relaxed);
        let was_connected = self.connected.swap(false, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);

        if let Ok(mut tx) = self.tx.lock() {
            tx.socket = None;
        }

        self.join_io_threads();
        let reconnect = match self.threads.lock() {
            Ok(mut threads) => threads.reconnect.take(),
            Err(_) => None,
        };
        if let Some(handle) = reconnect {
            let _ = handle.join();
        }

        if was_connected {
            fire_callback(&self.callback, false);
        }
        log::info!("FNE: disconnected");
    }

    /// Start the reconnection supervisor
    ///
    /// The supervisor holds only a weak reference, so dropping the last
    /// session handle ends the thread on its next wakeup.
    pub fn enable_auto_reconnect(self: &Arc<Self>, interval_secs: u64) {
        self.reconnect_interval.store(interval_secs, Ordering::Relaxed);
        self.reconnect_enabled.store(true, Ordering::Relaxed);

        let Ok(mut threads) = self.threads.lock() else {
            return;
        };
        if threads.reconnect.is_none() {
            let session = Arc::downgrade(self);
            threads.reconnect = thread::Builder::new()
                .name("fne-reconnect".to_string())
                .spawn(move || reconnect_loop(session))
                .ok();
        }
    }

    fn lock_tx(&self) -> Result<MutexGuard<'_, TxState>> {
        self.tx.lock().map_err(|_| Error::MutexPoisoned)
    }

    fn join_io_threads(&self) {
        let (heartbeat, receive) = match self.threads.lock() {
            Ok(mut threads) => (threads.heartbeat.take(), threads.receive.take()),
            Err(_) => (None, None),
        };
        if let Some(handle) = heartbeat {
            let _ = handle.join();
        }
        if let Some(handle) = receive {
            let _ = handle.join();
        }
    }

    /// Three-step login handshake on a fresh socket
    ///
    /// One random login stream id covers all three requests, as the FNE
    /// correlates the exchange by peer id.
    fn authenticate(&self, socket: &UdpSocket) -> Result<()> {
        socket.set_read_timeout(Some(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)))?;
        let login_stream_id = random_stream_id();
        let mut reply = [0u8; 256];

        // Step 1: RPTL login request, answered with an ACK carrying the salt
        let mut rptl = [0u8; RPTL_FRAME_LEN];
        {
            let mut tx = self.lock_tx()?;
            let header = codec::build_transport_header(
                &mut tx.counters,
                NET_FUNC_RPTL,
                NET_SUBFUNC_NOP,
                login_stream_id,
                self.peer_id,
                8,
                false,
            );
            rptl[..DVM_HEADER_LEN].copy_from_slice(&header);
        }
        rptl[32..36].copy_from_slice(b"RPTL");
        rptl[36..40].copy_from_slice(&self.peer_id.to_be_bytes());
        codec::insert_crc(&mut rptl);
        send_all(socket, &rptl)?;

        let len = recv_step(socket, &mut reply, "login challenge")?;
        if len < LOGIN_CHALLENGE_MIN_LEN || reply[ACK_FUNC_OFFSET] != NET_FUNC_ACK {
            return Err(Error::Handshake("login rejected".into()));
        }
        let salt = u32::from_be_bytes([
            reply[SALT_OFFSET],
            reply[SALT_OFFSET + 1],
            reply[SALT_OFFSET + 2],
            reply[SALT_OFFSET + 3],
        ]);

        // Step 2: RPTK with SHA-256(salt || password)
        let mut hasher = Sha256::new();
        hasher.update(salt.to_be_bytes());
        hasher.update(self.password.as_bytes());
        let digest = hasher.finalize();

        let mut rptk = [0u8; RPTK_FRAME_LEN];
        {
            let mut tx = self.lock_tx()?;
            let header = codec::build_transport_header(
                &mut tx.counters,
                NET_FUNC_RPTK,
                NET_SUBFUNC_NOP,
                login_stream_id,
                self.peer_id,
                40,
                false,
            );
            rptk[..DVM_HEADER_LEN].copy_from_slice(&header);
        }
        rptk[32..36].copy_from_slice(b"RPTK");
        rptk[36..40].copy_from_slice(&self.peer_id.to_be_bytes());
        rptk[40..72].copy_from_slice(&digest);
        codec::insert_crc(&mut rptk);
        send_all(socket, &rptk)?;

        let len = recv_step(socket, &mut reply, "auth ack")?;
        if len < DVM_HEADER_LEN || reply[ACK_FUNC_OFFSET] != NET_FUNC_ACK {
            return Err(Error::Handshake("authentication rejected".into()));
        }

        log::info!("FNE: authentication accepted, sending peer configuration");

        // Step 3: RPTC peer configuration
        let body = serde_json::to_vec(&serde_json::json!({
            "identity": self.identity,
            "rxFrequency": 449_000_000u32,
            "txFrequency": 444_000_000u32,
            "info": { "latitude": 0.0, "longitude": 0.0 },
            "channel": { "txPower": 1 },
            "software": SOFTWARE_ID,
        }))?;

        let mut rptc = vec![0u8; 40 + body.len()];
        {
            let mut tx = self.lock_tx()?;
            let header = codec::build_transport_header(
                &mut tx.counters,
                NET_FUNC_RPTC,
                NET_SUBFUNC_NOP,
                login_stream_id,
                self.peer_id,
                (8 + body.len()) as u32,
                false,
            );
            rptc[..DVM_HEADER_LEN].copy_from_slice(&header);
        }
        rptc[32..36].copy_from_slice(b"RPTC");
        rptc[40..].copy_from_slice(&body);
        codec::insert_crc(&mut rptc);
        send_all(socket, &rptc)?;

        let len = recv_step(socket, &mut reply, "config ack")?;
        if len < DVM_HEADER_LEN || reply[ACK_FUNC_OFFSET] != NET_FUNC_ACK {
            return Err(Error::Handshake("configuration rejected".into()));
        }

        Ok(())
    }

    /// Encode and send one protocol frame under the send mutex
    ///
    /// A failed or short send marks the session disconnected and fires the
    /// callback; the reconnect supervisor takes it from there.
    fn send_payload(&self, func: u8, sub_func: u8, payload: &[u8], end_of_call: bool) {
        let sent = {
            let Ok(mut tx) = self.tx.lock() else {
                log::error!("FNE: send mutex poisoned, dropping frame");
                return;
            };
            let header = codec::build_transport_header(
                &mut tx.counters,
                func,
                sub_func,
                self.stream_id.load(Ordering::Relaxed),
                self.peer_id,
                payload.len() as u32,
                end_of_call,
            );
            let mut frame = Vec::with_capacity(DVM_HEADER_LEN + payload.len());
            frame.extend_from_slice(&header);
            frame.extend_from_slice(payload);
            codec::insert_crc(&mut frame);
            send_frame_locked(&tx, &frame)
        };

        if !sent && self.connected.swap(false, Ordering::Relaxed) {
            log::error!("FNE: send failed, connection lost");
            fire_callback(&self.callback, false);
        }
    }

    fn send_tdu(&self, src_id: u32, dst_id: u32, grant_demand: bool) {
        if !self.is_connected() {
            return;
        }

        let tdu = codec::build_tdu(src_id, dst_id, self.wacn, self.system_id, grant_demand);
        self.send_payload(NET_FUNC_PROTOCOL, NET_SUBFUNC_P25, &tdu, !grant_demand);

        if grant_demand {
            log::debug!("FNE: sent TDU with grant demand");
        } else {
            log::debug!("FNE: sent TDU (call termination)");
        }
    }
}

impl StreamSink for FneSession {
    fn start_stream(&self, src_id: u32, dst_id: u32) {
        let stream_id = random_stream_id();
        self.stream_id.store(stream_id, Ordering::Relaxed);

        log::info!(
            "FNE: starting voice stream src={} dst={} stream_id=0x{:08X}",
            src_id,
            dst_id,
            stream_id
        );

        self.send_tdu(src_id, dst_id, true);
    }

    fn send_ldu1(&self, voice: &VoiceGroup, src_id: u32, dst_id: u32, first_ldu: bool) {
        if !self.is_connected() {
            return;
        }

        let ldu = codec::build_ldu1(voice, src_id, dst_id, self.wacn, self.system_id, first_ldu);
        self.send_payload(NET_FUNC_PROTOCOL, NET_SUBFUNC_P25, &ldu, false);
        log::debug!("FNE: sent LDU1");
    }

    fn send_ldu2(&self, voice: &VoiceGroup, src_id: u32, dst_id: u32) {
        if !self.is_connected() {
            return;
        }

        let ldu = codec::build_ldu2(voice, src_id, dst_id, self.wacn, self.system_id);
        self.send_payload(NET_FUNC_PROTOCOL, NET_SUBFUNC_P25, &ldu, false);
        log::debug!("FNE: sent LDU2");
    }

    fn end_stream(&self, src_id: u32, dst_id: u32) {
        log::info!("FNE: ending voice stream");
        self.send_tdu(src_id, dst_id, false);
    }
}

impl Drop for FneSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// 31-bit non-zero stream identifier
fn random_stream_id() -> u32 {
    (rand::rng().random::<u32>() & 0x7FFF_FFFF) | 0x0000_0001
}

fn send_frame_locked(tx: &TxState, frame: &[u8]) -> bool {
    match tx.socket.as_ref() {
        Some(socket) => matches!(socket.send(frame), Ok(n) if n == frame.len()),
        None => false,
    }
}

fn send_all(socket: &UdpSocket, frame: &[u8]) -> Result<()> {
    let sent = socket.send(frame)?;
    if sent != frame.len() {
        return Err(Error::Handshake("short send".into()));
    }
    Ok(())
}

fn recv_step(socket: &UdpSocket, buf: &mut [u8], what: &str) -> Result<usize> {
    socket.recv(buf).map_err(|e| match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            Error::Handshake(format!("timeout waiting for {}", what))
        }
        _ => Error::Io(e),
    })
}

fn fire_callback(slot: &Mutex<Option<ConnectionCallback>>, state: bool) {
    let callback = match slot.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    };
    // Invoked with no lock held; the callback may call back into the session
    if let Some(callback) = callback {
        callback(state);
    }
}

fn heartbeat_loop(
    tx: Arc<Mutex<TxState>>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<ConnectionCallback>>>,
    peer_id: u32,
) {
    while running.load(Ordering::Relaxed) {
        if connected.load(Ordering::Relaxed) {
            let sent = {
                let Ok(mut tx) = tx.lock() else {
                    log::error!("FNE: heartbeat mutex poisoned, exiting");
                    break;
                };
                let mut ping = [0u8; PING_FRAME_LEN];
                let header = codec::build_transport_header(
                    &mut tx.counters,
                    NET_FUNC_PING,
                    NET_SUBFUNC_NOP,
                    random_stream_id(),
                    peer_id,
                    (PING_FRAME_LEN - DVM_HEADER_LEN) as u32,
                    false,
                );
                ping[..DVM_HEADER_LEN].copy_from_slice(&header);
                ping[39..43].copy_from_slice(&peer_id.to_be_bytes());
                codec::insert_crc(&mut ping);
                send_frame_locked(&tx, &ping)
            };

            if sent {
                log::trace!("FNE: sent PING");
            } else if connected.swap(false, Ordering::Relaxed) {
                log::error!("FNE: ping send failed, connection lost");
                fire_callback(&callback, false);
            }
        }

        for _ in 0..PING_INTERVAL_SECS {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    log::info!("FNE: heartbeat thread exiting");
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<ConnectionCallback>>>,
) {
    let mut buf = [0u8; 1024];

    while running.load(Ordering::Relaxed) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                // Only PONG is recognized inbound; ACK/NAK after startup and
                // any server-originated traffic are ignored
                if len >= DVM_HEADER_LEN && buf[ACK_FUNC_OFFSET] == NET_FUNC_PONG {
                    log::debug!("FNE: received PONG");
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    log::error!("FNE: receive error, connection lost: {}", e);
                    fire_callback(&callback, false);
                }
                break;
            }
        }
    }

    log::info!("FNE: receive thread exiting");
}

fn reconnect_loop(session: std::sync::Weak<FneSession>) {
    log::info!("FNE: reconnection supervisor started");

    'outer: loop {
        let interval = {
            let Some(session) = session.upgrade() else {
                break;
            };
            if !session.reconnect_enabled.load(Ordering::Relaxed) {
                break;
            }

            if !session.connected.load(Ordering::Relaxed) {
                log::info!("FNE: attempting connection...");
                match session.connect() {
                    Ok(()) => log::info!("FNE: reconnection successful"),
                    Err(e) => log::warn!(
                        "FNE: connection failed ({}), retrying in {} seconds",
                        e,
                        session.reconnect_interval.load(Ordering::Relaxed)
                    ),
                }
            }

            session.reconnect_interval.load(Ordering::Relaxed)
        };

        // Sleep in 1-second steps so shutdown stays responsive
        for _ in 0..interval {
            let Some(session) = session.upgrade() else {
                break 'outer;
            };
            if !session.reconnect_enabled.load(Ordering::Relaxed) {
                break 'outer;
            }
            drop(session);
            thread::sleep(Duration::from_secs(1));
        }
    }

    log::info!("FNE: reconnection supervisor stopped");
}
