/// Scan lifecycle scheduler.
///
/// Starting a scan while a flash write is in flight is unsafe on the target
/// (the radio and the flash controller share the bus), so a start request
/// made while storage is busy is parked in `DeferredForStorage` and replayed
/// when the storage subsystem reports completion.
///
/// The radio and storage collaborators sit behind [`ScanRadio`] and
/// [`FlashStorage`] so the state machine runs on the host.
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;

/// Scan interval in units of 0.625 ms (500 ms).
pub const SCAN_INTERVAL: u16 = 0x0320;

/// Scan window in units of 0.625 ms. Equal to the interval: listen continuously.
pub const SCAN_WINDOW: u16 = 0x0320;

/// Scan duration in units of 10 ms. Zero scans until explicitly stopped.
pub const SCAN_DURATION: u16 = 0x0000;

/// Passive scanning (no scan requests sent).
pub const SCAN_ACTIVE: bool = false;

/// Microseconds per scan interval/window unit.
const SCAN_UNIT_US: u64 = 625;

/// Scan interval in microseconds.
pub const fn scan_interval_us() -> u64 {
    SCAN_INTERVAL as u64 * SCAN_UNIT_US
}

/// Scan window in microseconds.
pub const fn scan_window_us() -> u64 {
    SCAN_WINDOW as u64 * SCAN_UNIT_US
}

/// Scan duration in milliseconds, `None` for an unbounded scan.
pub const fn scan_duration_ms() -> Option<u64> {
    if SCAN_DURATION == 0 {
        None
    } else {
        Some(SCAN_DURATION as u64 * 10)
    }
}

/// Radio side of the scheduler.
pub trait ScanRadio {
    /// Ask the stack to (re)start scanning. An error means the stack is
    /// misconfigured; it is never retried.
    fn start_scan(&mut self) -> Result<(), Error>;
}

/// Persistent-storage side of the scheduler.
pub trait FlashStorage {
    /// True while a flash operation is in flight.
    fn is_busy(&self) -> bool;
}

/// Busy flag bracketing flash operations.
///
/// Writers call [`begin`](Self::begin) before touching flash and
/// [`finish`](Self::finish) when the controller reports completion; the
/// returned trigger goes to the scheduler.
pub struct FlashGuard {
    busy: AtomicBool,
}

impl FlashGuard {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    pub fn begin(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub fn finish(&self, outcome: StorageOutcome) -> ScanTrigger {
        self.busy.store(false, Ordering::Release);
        ScanTrigger::StorageComplete(outcome)
    }
}

impl FlashStorage for FlashGuard {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Default for FlashGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a completed flash operation. Both resume a deferred scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOutcome {
    Success,
    Error,
}

/// Notifications that drive the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    /// First start at boot.
    Startup,
    /// The radio reported the scan window elapsed.
    ScanTimeout,
    /// A flash operation finished.
    StorageComplete(StorageOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// A scan request has been issued.
    Scanning,
    /// A start was requested while storage was busy.
    DeferredForStorage,
}

/// Two-state scan controller.
pub struct ScanScheduler {
    state: ScanState,
}

impl ScanScheduler {
    /// Starts in `Scanning` intent; the caller issues [`ScanTrigger::Startup`].
    pub const fn new() -> Self {
        Self {
            state: ScanState::Scanning,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Start scanning now, or defer if storage is busy.
    pub fn request_scan_start<R, F>(&mut self, radio: &mut R, storage: &F) -> Result<ScanState, Error>
    where
        R: ScanRadio + ?Sized,
        F: FlashStorage + ?Sized,
    {
        if storage.is_busy() {
            if self.state != ScanState::DeferredForStorage {
                log::info!("Flash busy, deferring scan start");
            }
            self.state = ScanState::DeferredForStorage;
            return Ok(self.state);
        }

        radio.start_scan()?;
        self.state = ScanState::Scanning;
        log::info!("Scan started");
        Ok(self.state)
    }

    /// Dispatch one trigger. Storage completion only matters while deferred.
    pub fn handle<R, F>(&mut self, trigger: ScanTrigger, radio: &mut R, storage: &F) -> Result<ScanState, Error>
    where
        R: ScanRadio + ?Sized,
        F: FlashStorage + ?Sized,
    {
        match trigger {
            ScanTrigger::Startup | ScanTrigger::ScanTimeout => {
                self.request_scan_start(radio, storage)
            }
            ScanTrigger::StorageComplete(outcome) => {
                if self.state != ScanState::DeferredForStorage {
                    return Ok(self.state);
                }
                log::info!("Flash operation finished ({:?}), resuming scan", outcome);
                self.request_scan_start(radio, storage)
            }
        }
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        Self::new()
    }
}
