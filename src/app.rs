//! Application orchestration for the gateway daemon
//!
//! Owns the FNE session, the call manager, and the ingress receiver in that
//! order - the session outlives the call manager that emits through it, and
//! the receiver that feeds the call manager is torn down first.

use crate::call::{CallManager, StreamSink};
use crate::config::Config;
use crate::error::Result;
use crate::fne::constants::DEFAULT_RECONNECT_INTERVAL_SECS;
use crate::fne::FneSession;
use crate::ingress::IngressReceiver;
use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Seconds to wait for the first FNE connection before starting anyway
const STARTUP_CONNECT_WAIT_SECS: u64 = 30;

/// Main application structure that manages all components
pub struct GatewayApp {
    session: Arc<FneSession>,
    calls: Arc<CallManager>,
    receiver: IngressReceiver,
    shutdown: Arc<AtomicBool>,
}

impl GatewayApp {
    pub fn new(config: &Config) -> Self {
        let session = Arc::new(FneSession::new(
            config.fne.host.clone(),
            config.fne.port,
            config.fne.peer_id,
            config.fne.password.clone(),
        ));

        let calls = Arc::new(CallManager::new(
            Arc::clone(&session) as Arc<dyn StreamSink>,
            config.gateway.talkgroup_override,
            config.gateway.source_override,
            Duration::from_millis(config.gateway.call_timeout_ms),
        ));

        let receiver = IngressReceiver::new(config.ingress.port);

        Self {
            session,
            calls,
            receiver,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start all components and run until a shutdown signal arrives
    pub fn run(&mut self) -> Result<()> {
        self.setup_signal_handler();

        self.session.set_connection_callback(Arc::new(|connected| {
            if connected {
                info!("FNE connection established");
            } else {
                warn!("FNE connection lost");
            }
        }));

        self.session
            .enable_auto_reconnect(DEFAULT_RECONNECT_INTERVAL_SECS);

        info!("Waiting for FNE connection...");
        for _ in 0..STARTUP_CONNECT_WAIT_SECS {
            if self.shutdown.load(Ordering::Relaxed) || self.session.is_connected() {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
        if !self.session.is_connected() && !self.shutdown.load(Ordering::Relaxed) {
            warn!("Could not connect to FNE, continuing anyway (will auto-reconnect)");
        }

        self.calls.start()?;
        self.receiver.start(Arc::clone(&self.calls))?;

        info!("Gateway running - press Ctrl+C to stop");

        let ingress_stats = self.receiver.stats();
        let call_stats = self.calls.stats();
        let mut last_stats = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));

            if last_stats.elapsed().as_secs() >= 60 {
                info!(
                    "Stats: OP25 packets={} calls={} LDU1={} LDU2={} FNE={}",
                    ingress_stats.received.load(Ordering::Relaxed),
                    call_stats.calls.load(Ordering::Relaxed),
                    call_stats.ldu1.load(Ordering::Relaxed),
                    call_stats.ldu2.load(Ordering::Relaxed),
                    if self.session.is_connected() {
                        "connected"
                    } else {
                        "disconnected"
                    }
                );
                last_stats = Instant::now();
            }
        }

        info!("Shutting down...");
        self.receiver.stop();
        self.calls.stop();
        self.session.disconnect();
        info!("Shutdown complete");

        Ok(())
    }

    /// Setup signal handler for graceful shutdown
    fn setup_signal_handler(&self) {
        let shutdown = Arc::clone(&self.shutdown);

        thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                let mut signals =
                    Signals::new([SIGINT, SIGTERM]).expect("Failed to register signal handlers");

                if let Some(sig) = signals.forever().next() {
                    info!("Received signal {:?}, initiating shutdown...", sig);
                    shutdown.store(true, Ordering::Relaxed);
                }
            })
            .expect("Failed to spawn signal handler thread");
    }
}
