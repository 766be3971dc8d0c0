use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use crate::core::RawFrame;
use crate::decode::{decode_message, IdResolver};
use crate::error::{IcError, Result};
use crate::hardware::can_interface::{BusTransport, TransportError};
use crate::store::RealTimeStore;

/// How often `join`/`wait_until_settled` re-check the thread
const POLL_STEP: Duration = Duration::from_millis(5);

/// Lifecycle of the ingestion thread
///
/// `Created -> Binding -> Listening -> {Closed | Error}`; both end states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Created,
    Binding,
    Listening,
    Closed,
    Error,
}

impl ListenerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ListenerStatus::Closed | ListenerStatus::Error)
    }

    /// Human-readable status for logs and status bars
    pub fn describe(self) -> &'static str {
        match self {
            ListenerStatus::Created => "created",
            ListenerStatus::Binding => "binding socket",
            ListenerStatus::Listening => "listening",
            ListenerStatus::Closed => "closed",
            ListenerStatus::Error => "error",
        }
    }
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Interface name, used for thread naming and logs
    pub interface: String,
    /// Give up (status `Closed`) after this many failed reads in a row
    pub max_consecutive_read_errors: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            interface: "vcan0".to_string(),
            max_consecutive_read_errors: 16,
        }
    }
}

/// Counters kept by the ingestion thread
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub frames_received: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub frames_unknown: AtomicU64,
    pub signals_written: AtomicU64,
    pub signals_inactive: AtomicU64,
    /// Writes refused by the store (poisoned cell)
    pub write_failures: AtomicU64,
    pub read_errors: AtomicU64,
    pub started_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_unknown: u64,
    pub signals_written: u64,
    pub signals_inactive: u64,
    pub write_failures: u64,
    pub read_errors: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_unknown: self.frames_unknown.load(Ordering::Relaxed),
            signals_written: self.signals_written.load(Ordering::Relaxed),
            signals_inactive: self.signals_inactive.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared between the handle and the ingestion thread
struct Shared {
    status: Mutex<ListenerStatus>,
    last_error: Mutex<Option<String>>,
    stats: ListenerStats,
    stop_signal: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: ListenerStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn fail(&self, err: &IcError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
        self.set_status(ListenerStatus::Error);
    }
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rejected,
    Unknown,
    Decoded {
        written: usize,
        inactive: usize,
        failed: usize,
    },
}

/// Validate, resolve and decode one frame into the store
///
/// Bad frames and unknown identifiers are normal traffic and only counted.
/// A cell the store refuses (poisoned lock) is counted and skipped; the
/// frame's other signals are still written.
pub fn ingest_frame(
    frame: &RawFrame,
    resolver: &IdResolver,
    store: &RealTimeStore,
    stats: &ListenerStats,
) -> FrameOutcome {
    stats.frames_received.fetch_add(1, Ordering::Relaxed);

    if let Err(rejection) = frame.check() {
        stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
        debug!("Dropping frame 0x{:X}: {}", frame.id, rejection);
        return FrameOutcome::Rejected;
    }

    let Some(message) = resolver.lookup(frame.id) else {
        stats.frames_unknown.fetch_add(1, Ordering::Relaxed);
        trace!("Ignoring unknown CAN ID 0x{:X}", frame.id);
        return FrameOutcome::Unknown;
    };

    let mut failed = 0;
    let outcome = decode_message(message, frame.payload(), |signal, value| {
        if let Err(e) = store.write(signal, value) {
            failed += 1;
            // Loud once, then quiet: a poisoned cell fails on every frame
            if stats.write_failures.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!("Store write failed in message '{}': {}", message.name, e);
            } else {
                trace!("Store write failed in message '{}': {}", message.name, e);
            }
        }
    });

    if outcome.unfit > 0 {
        trace!(
            "Message '{}' (0x{:X}): {} signals beyond the {}-byte payload",
            message.name,
            frame.id,
            outcome.unfit,
            frame.len
        );
    }

    let written = outcome.decoded - failed;
    stats.signals_written.fetch_add(written as u64, Ordering::Relaxed);
    stats.signals_inactive.fetch_add(outcome.inactive as u64, Ordering::Relaxed);

    FrameOutcome::Decoded {
        written,
        inactive: outcome.inactive,
        failed,
    }
}

/// Handle to the frame ingestion thread
///
/// The thread owns the transport; the handle only sees status, counters and
/// the stop flag. Dropping the handle requests a stop without waiting.
pub struct CanListener {
    interface: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl CanListener {
    /// Start the ingestion thread
    ///
    /// `open` runs on the new thread while the status is `Binding`; its
    /// error moves the listener to `Error` and is kept in [`CanListener::last_error`].
    pub fn spawn<F, T>(
        config: ListenerConfig,
        resolver: Arc<IdResolver>,
        store: Arc<RealTimeStore>,
        open: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: BusTransport + 'static,
    {
        let shared = Arc::new(Shared {
            status: Mutex::new(ListenerStatus::Created),
            last_error: Mutex::new(None),
            stats: ListenerStats::default(),
            stop_signal: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let max_errors = config.max_consecutive_read_errors;
        let handle = thread::Builder::new()
            .name(format!("can-rx-{}", config.interface))
            .spawn(move || {
                thread_shared.set_status(ListenerStatus::Binding);
                let transport = match open() {
                    Ok(transport) => transport,
                    Err(e) => {
                        error!("CAN listener failed to start: {}", e);
                        thread_shared.fail(&e);
                        return;
                    }
                };
                run_loop(transport, &resolver, &store, &thread_shared, max_errors);
            })?;

        Ok(Self {
            interface: config.interface,
            shared,
            handle: Some(handle),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn status(&self) -> ListenerStatus {
        *self.shared.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Message of the error that moved the listener to `Error`
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.shared.stats
    }

    /// Poll until the listener has left `Created`/`Binding`, or `timeout` passes
    pub fn wait_until_settled(&self, timeout: Duration) -> ListenerStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if !matches!(status, ListenerStatus::Created | ListenerStatus::Binding) || Instant::now() >= deadline {
                return status;
            }
            thread::sleep(POLL_STEP);
        }
    }

    /// Poll until the listener reaches `Closed` or `Error`, or `timeout` passes
    ///
    /// Unlike [`CanListener::join`] this does not ask the thread to stop, so a
    /// transport that runs dry gets to deliver everything first.
    pub fn wait_until_terminal(&self, timeout: Duration) -> ListenerStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if status.is_terminal() || Instant::now() >= deadline {
                return status;
            }
            thread::sleep(POLL_STEP);
        }
    }

    /// Ask the thread to stop after its current read
    pub fn stop(&self) {
        self.shared.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop and wait up to `timeout` for the thread to finish
    ///
    /// Returns `false` if the thread is still stuck in a read; it is then
    /// detached and exits on its own once the read returns.
    pub fn join(&mut self, timeout: Duration) -> bool {
        self.stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "CAN listener on {} did not stop within {:?}, detaching",
                    self.interface, timeout
                );
                return false;
            }
            thread::sleep(POLL_STEP);
        }

        if handle.join().is_err() {
            error!("CAN listener thread on {} panicked", self.interface);
            self.shared.set_status(ListenerStatus::Error);
        }
        true
    }
}

impl Drop for CanListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<T: BusTransport>(
    mut transport: T,
    resolver: &IdResolver,
    store: &RealTimeStore,
    shared: &Shared,
    max_errors: u32,
) {
    *shared.stats.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    shared.set_status(ListenerStatus::Listening);
    info!("CAN listener started on {}", transport.name());

    let mut consecutive_errors = 0u32;

    loop {
        if shared.stop_signal.load(Ordering::SeqCst) {
            info!("CAN listener on {} stopping on request", transport.name());
            break;
        }

        let frame = match transport.read_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                frame
            }
            Ok(None) => continue,
            Err(TransportError::Closed) => {
                info!("CAN transport {} closed", transport.name());
                break;
            }
            Err(TransportError::Read(reason)) => {
                shared.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                warn!(
                    "Read error on {} ({}/{}): {}",
                    transport.name(),
                    consecutive_errors,
                    max_errors,
                    reason
                );
                if consecutive_errors >= max_errors {
                    error!("Too many consecutive read errors on {}, closing", transport.name());
                    break;
                }
                continue;
            }
        };

        ingest_frame(&frame, resolver, store, &shared.stats);
    }

    let stats = shared.stats.snapshot();
    debug!(
        "CAN listener stats: {} frames, {} rejected, {} unknown, {} signal writes, {} failed writes",
        stats.frames_received,
        stats.frames_rejected,
        stats.frames_unknown,
        stats.signals_written,
        stats.write_failures
    );
    shared.set_status(ListenerStatus::Closed);
}
