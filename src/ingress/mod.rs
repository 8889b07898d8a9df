//! UDP ingress receiver
//!
//! Binds the OP25 listen port and runs a dedicated reader thread. Each
//! datagram that parses as a [`VoiceFrame`] is handed synchronously to the
//! call manager on this thread; short datagrams and wrong-magic datagrams
//! are counted and dropped. A 1-second receive timeout keeps shutdown
//! bounded.

pub mod frame;

pub use frame::VoiceFrame;

use crate::call::CallManager;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Monotonic ingress counters, shared with the stats reporter
#[derive(Debug, Default)]
pub struct IngressStats {
    pub received: AtomicU64,
    pub invalid: AtomicU64,
}

/// OP25 ingress receiver with a dedicated reader thread
pub struct IngressReceiver {
    port: u16,
    running: Arc<AtomicBool>,
    stats: Arc<IngressStats>,
    handle: Option<JoinHandle<()>>,
}

impl IngressReceiver {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(IngressStats::default()),
            handle: None,
        }
    }

    pub fn stats(&self) -> Arc<IngressStats> {
        Arc::clone(&self.stats)
    }

    /// Bind the listen socket and start the reader thread
    ///
    /// A bind failure is fatal and is returned to the launcher.
    pub fn start(&mut self, calls: Arc<CallManager>) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        socket
            .bind(&addr.into())
            .map_err(|e| Error::Other(format!("failed to bind ingress port {}: {}", self.port, e)))?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        self.running.store(true, Ordering::Relaxed);

        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        self.handle = Some(
            thread::Builder::new()
                .name("ingress-rx".to_string())
                .spawn(move || receive_loop(socket, running, stats, calls))
                .map_err(|e| Error::Other(format!("failed to spawn ingress thread: {}", e)))?,
        );

        log::info!("OP25: listening on UDP port {}", self.port);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        log::info!("OP25: receiver stopped");
    }
}

impl Drop for IngressReceiver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn receive_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    stats: Arc<IngressStats>,
    calls: Arc<CallManager>,
) {
    let mut buf = [0u8; 256];

    while running.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    log::error!("OP25: receive error: {}", e);
                }
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        let Some(frame) = VoiceFrame::parse(&buf[..len]) else {
            let invalid = stats.invalid.fetch_add(1, Ordering::Relaxed) + 1;
            if invalid % 100 == 1 {
                log::warn!("OP25: invalid packet (len={}, total invalid={})", len, invalid);
            }
            continue;
        };

        let received = stats.received.fetch_add(1, Ordering::Relaxed) + 1;
        if received <= 5 || received % 1000 == 0 {
            log::debug!(
                "OP25: packet #{} NAC=0x{:03X} TG={} SRC={} type={} index={}",
                received,
                frame.nac,
                frame.talkgroup,
                frame.source_id,
                frame.frame_type,
                frame.voice_index
            );
        }

        calls.handle_frame(&frame);
    }
}
