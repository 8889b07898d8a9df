//! Call state machine
//!
//! Groups ingress voice frames into calls and drives the outbound frame
//! sequence through a [`StreamSink`]:
//!
//! ```text
//! ┌─────────────┐  valid frame           ┌──────────────────┐
//! │ Idle        │ ──────────────────────▶│ Active           │
//! │             │◀────────────────────── │                  │
//! └─────────────┘  idle timeout / stop   └──────────────────┘
//!     • buffer zeroed                       • grant TDU sent at start
//!                                           • LDU1/LDU2 alternate per group
//!                                           • terminating TDU at end
//! ```
//!
//! A frame whose effective source or destination differs from the current
//! call's ends that call and opens a new one under the same lock, so the
//! terminating and starting TDUs of successive calls never interleave.
//!
//! The machine has no thread of its own: its methods run on the ingress
//! thread and on a 100 ms timeout supervisor started by [`CallManager::start`].

use crate::error::Error;
use crate::fne::codec::VoiceGroup;
use crate::fne::constants::IMBE_FRAME_LEN;
use crate::ingress::VoiceFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Outbound voice traffic, implemented by the FNE session
///
/// Frames sent while the session is disconnected are dropped silently; the
/// call stays logically active so traffic resumes when the session returns.
pub trait StreamSink: Send + Sync {
    fn start_stream(&self, src_id: u32, dst_id: u32);
    fn send_ldu1(&self, voice: &VoiceGroup, src_id: u32, dst_id: u32, first_ldu: bool);
    fn send_ldu2(&self, voice: &VoiceGroup, src_id: u32, dst_id: u32);
    fn end_stream(&self, src_id: u32, dst_id: u32);
}

/// Call counters, shared with the stats reporter
#[derive(Debug, Default)]
pub struct CallStats {
    pub calls: AtomicU64,
    pub ldu1: AtomicU64,
    pub ldu2: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallStatus {
    Idle,
    Active,
}

struct CallState {
    status: CallStatus,
    src_id: u32,
    dst_id: u32,
    first_ldu: bool,
    expecting_ldu2: bool,
    frames_in_group: u32,
    voice: VoiceGroup,
    last_frame: Instant,
}

impl CallState {
    fn new() -> Self {
        Self {
            status: CallStatus::Idle,
            src_id: 0,
            dst_id: 0,
            first_ldu: true,
            expecting_ldu2: false,
            frames_in_group: 0,
            voice: [[0u8; IMBE_FRAME_LEN]; 9],
            last_frame: Instant::now(),
        }
    }
}

/// Groups ingress frames into calls and emits them through the sink
pub struct CallManager {
    sink: Arc<dyn StreamSink>,
    state: Arc<Mutex<CallState>>,
    stats: Arc<CallStats>,
    talkgroup_override: u32,
    source_override: u32,
    call_timeout: Duration,
    running: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl CallManager {
    pub fn new(
        sink: Arc<dyn StreamSink>,
        talkgroup_override: u32,
        source_override: u32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            state: Arc::new(Mutex::new(CallState::new())),
            stats: Arc::new(CallStats::default()),
            talkgroup_override,
            source_override,
            call_timeout,
            running: Arc::new(AtomicBool::new(false)),
            supervisor: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> Arc<CallStats> {
        Arc::clone(&self.stats)
    }

    /// Start the idle-timeout supervisor thread
    pub fn start(&self) -> crate::error::Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let timeout = self.call_timeout;

        let handle = match thread::Builder::new()
            .name("call-timeout".to_string())
            .spawn(move || timeout_loop(state, sink, stats, timeout, running))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Relaxed);
                return Err(Error::Other(format!("failed to spawn timeout thread: {}", e)));
            }
        };

        if let Ok(mut supervisor) = self.supervisor.lock() {
            *supervisor = Some(handle);
        }

        log::info!("CallManager: started");
        Ok(())
    }

    /// Join the supervisor and end any active call with a terminating TDU
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);

        let handle = match self.supervisor.lock() {
            Ok(mut supervisor) => supervisor.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        if let Ok(mut state) = self.state.lock() {
            if state.status == CallStatus::Active {
                end_call(&mut state, self.sink.as_ref(), &self.stats);
            }
        }

        log::info!("CallManager: stopped");
    }

    /// Process one ingress voice frame
    pub fn handle_frame(&self, frame: &VoiceFrame) {
        let src_id = if self.source_override > 0 {
            self.source_override
        } else {
            frame.source_id
        };
        let dst_id = if self.talkgroup_override > 0 {
            self.talkgroup_override
        } else {
            frame.talkgroup
        };

        let Ok(mut state) = self.state.lock() else {
            log::error!("CallManager: state mutex poisoned, dropping frame");
            return;
        };

        if state.status == CallStatus::Idle {
            start_call(&mut state, src_id, dst_id, self.sink.as_ref(), &self.stats);
        }

        state.last_frame = Instant::now();

        if state.status == CallStatus::Active && (src_id != state.src_id || dst_id != state.dst_id)
        {
            log::info!(
                "CallManager: call parameters changed (src={} dst={}), restarting",
                src_id,
                dst_id
            );
            end_call(&mut state, self.sink.as_ref(), &self.stats);
            start_call(&mut state, src_id, dst_id, self.sink.as_ref(), &self.stats);
        }

        if frame.voice_index > 8 {
            log::warn!("CallManager: invalid voice index {}", frame.voice_index);
            return;
        }

        state.voice[frame.voice_index as usize] = frame.imbe;
        state.frames_in_group += 1;

        log::debug!(
            "CallManager: frame {} (type={}) count={}",
            frame.voice_index,
            frame.frame_type,
            state.frames_in_group
        );

        // Index 8 closes the group even when earlier slots never arrived;
        // unfilled slots go out as zeros
        if frame.voice_index == 8 {
            emit_group(&mut state, self.sink.as_ref(), &self.stats);
            state.frames_in_group = 0;
        }
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        if self.running.load(Ordering::Relaxed) {
            self.stop();
        }
    }
}

fn start_call(
    state: &mut CallState,
    src_id: u32,
    dst_id: u32,
    sink: &dyn StreamSink,
    stats: &CallStats,
) {
    state.status = CallStatus::Active;
    state.src_id = src_id;
    state.dst_id = dst_id;
    state.first_ldu = true;
    state.expecting_ldu2 = false;
    state.frames_in_group = 0;
    state.last_frame = Instant::now();

    let count = stats.calls.fetch_add(1, Ordering::Relaxed) + 1;
    log::info!(
        "CallManager: call started src={} dst={} (call #{})",
        src_id,
        dst_id,
        count
    );

    sink.start_stream(src_id, dst_id);
}

fn end_call(state: &mut CallState, sink: &dyn StreamSink, stats: &CallStats) {
    if state.status == CallStatus::Idle {
        return;
    }

    log::info!(
        "CallManager: call ended src={} dst={} (LDU1={} LDU2={})",
        state.src_id,
        state.dst_id,
        stats.ldu1.load(Ordering::Relaxed),
        stats.ldu2.load(Ordering::Relaxed)
    );

    sink.end_stream(state.src_id, state.dst_id);

    state.status = CallStatus::Idle;
    state.src_id = 0;
    state.dst_id = 0;
    state.first_ldu = true;
    state.expecting_ldu2 = false;
    state.frames_in_group = 0;
    state.voice = [[0u8; IMBE_FRAME_LEN]; 9];
}

fn emit_group(state: &mut CallState, sink: &dyn StreamSink, stats: &CallStats) {
    if state.status != CallStatus::Active {
        return;
    }

    if !state.expecting_ldu2 {
        sink.send_ldu1(&state.voice, state.src_id, state.dst_id, state.first_ldu);
        stats.ldu1.fetch_add(1, Ordering::Relaxed);
        state.first_ldu = false;
        state.expecting_ldu2 = true;
    } else {
        sink.send_ldu2(&state.voice, state.src_id, state.dst_id);
        stats.ldu2.fetch_add(1, Ordering::Relaxed);
        state.expecting_ldu2 = false;
    }

    state.voice = [[0u8; IMBE_FRAME_LEN]; 9];
}

fn timeout_loop(
    state: Arc<Mutex<CallState>>,
    sink: Arc<dyn StreamSink>,
    stats: Arc<CallStats>,
    timeout: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));

        let Ok(mut state) = state.lock() else {
            log::error!("CallManager: timeout supervisor mutex poisoned, exiting");
            break;
        };

        if state.status == CallStatus::Active && state.last_frame.elapsed() > timeout {
            log::info!("CallManager: call timeout, ending call");
            end_call(&mut state, sink.as_ref(), &stats);
        }
    }

    log::info!("CallManager: timeout supervisor exiting");
}
