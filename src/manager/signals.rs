//! Deferred signal handling
//!
//! The installed handler does one thing: record the delivery (signal
//! number, sender pid/uid, code, errno, status) into a fixed ring of
//! atomics. It never allocates, locks, or logs. The run loop drains the
//! ring on its poll tick and makes every decision outside handler context,
//! including the pid-1 SIGTERM rule in [`should_ignore`].

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use thiserror::Error;
use tracing::{debug, warn};

/// Signals routed through the catcher.
///
/// SIGKILL and SIGSTOP cannot be caught and are deliberately absent.
pub const CAUGHT_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGPIPE,
];

/// Ring capacity. Deliveries beyond this between two drains overwrite the
/// oldest slot, mirroring the kernel's own collapse of pending signals.
const RING_SLOTS: usize = 16;

/// Signal-catcher errors
#[derive(Debug, Error)]
pub enum SignalError {
    /// sigaction refused the handler installation.
    #[error("failed to install handler for {signal}: {errno}")]
    Install {
        /// Signal whose handler could not be installed
        signal: Signal,
        /// Underlying errno
        errno: Errno,
    },
}

/// One recorded signal delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaughtSignal {
    /// Raw signal number
    pub signo: i32,

    /// Pid of the sender (0 when the kernel sent it)
    pub sender_pid: i32,

    /// Uid of the sender
    pub sender_uid: u32,

    /// si_code as delivered
    pub code: i32,

    /// si_errno as delivered
    pub errno: i32,

    /// si_status as delivered (meaningful for child-state signals only)
    pub status: i32,
}

impl CaughtSignal {
    /// Typed signal, when the number maps to one.
    pub fn signal(&self) -> Option<Signal> {
        Signal::try_from(self.signo).ok()
    }
}

/// The pid-1 rule: a SIGTERM sent by init is part of normal service
/// shutdown ordering and must not take the login manager down. Everything
/// else drained from the ring terminates the run loop.
pub fn should_ignore(signal: &CaughtSignal) -> bool {
    signal.signo == libc::SIGTERM && signal.sender_pid == 1
}

struct Slot {
    ready: AtomicBool,
    signo: AtomicI32,
    sender_pid: AtomicI32,
    sender_uid: AtomicU32,
    code: AtomicI32,
    errno: AtomicI32,
    status: AtomicI32,
}

impl Slot {
    const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            signo: AtomicI32::new(0),
            sender_pid: AtomicI32::new(0),
            sender_uid: AtomicU32::new(0),
            code: AtomicI32::new(0),
            errno: AtomicI32::new(0),
            status: AtomicI32::new(0),
        }
    }
}

const EMPTY_SLOT: Slot = Slot::new();
static RING: [Slot; RING_SLOTS] = [EMPTY_SLOT; RING_SLOTS];
static WRITE_INDEX: AtomicUsize = AtomicUsize::new(0);
static READ_INDEX: AtomicUsize = AtomicUsize::new(0);

/// Deliveries that overwrote an undrained record, reported on drain.
static OVERFLOWED: AtomicUsize = AtomicUsize::new(0);

/// Serializes tests that send signals or drain the process-global ring.
#[cfg(test)]
pub(crate) static TEST_SIGNAL_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

extern "C" fn record_signal(
    signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    let (pid, uid, code, errno, status) = if info.is_null() {
        (0, 0, 0, 0, 0)
    } else {
        // SAFETY: the kernel passes a valid siginfo_t to SA_SIGINFO
        // handlers; the accessors read plain integer fields.
        #[allow(unsafe_code)]
        let fields = unsafe {
            let info = &*info;
            (
                info.si_pid(),
                info.si_uid(),
                info.si_code,
                info.si_errno,
                info.si_status(),
            )
        };
        fields
    };

    let sequence = WRITE_INDEX.fetch_add(1, Ordering::AcqRel);
    if sequence.wrapping_sub(READ_INDEX.load(Ordering::Acquire)) >= RING_SLOTS {
        // This delivery overwrites a record nobody has drained yet
        OVERFLOWED.fetch_add(1, Ordering::AcqRel);
    }

    let slot = &RING[sequence % RING_SLOTS];
    slot.ready.store(false, Ordering::Release);
    slot.signo.store(signo, Ordering::Relaxed);
    slot.sender_pid.store(pid, Ordering::Relaxed);
    slot.sender_uid.store(uid, Ordering::Relaxed);
    slot.code.store(code, Ordering::Relaxed);
    slot.errno.store(errno, Ordering::Relaxed);
    slot.status.store(status, Ordering::Relaxed);
    slot.ready.store(true, Ordering::Release);
}

/// Installed signal catcher
///
/// Owning a value of this type proves the handlers are in place; the ring
/// itself is process-global.
pub struct SignalCatcher {
    _installed: (),
}

impl SignalCatcher {
    /// Install the recording handler for all caught signals.
    pub fn install() -> Result<Self, SignalError> {
        let action = SigAction::new(
            SigHandler::SigAction(record_signal),
            SaFlags::SA_SIGINFO | SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for signal in CAUGHT_SIGNALS {
            // SAFETY: the handler only stores integers into static atomics,
            // which is async-signal-safe.
            #[allow(unsafe_code)]
            let installed = unsafe { sigaction(signal, &action) };
            installed.map_err(|errno| SignalError::Install { signal, errno })?;
        }

        debug!("Signal catcher installed for {:?}", CAUGHT_SIGNALS);
        Ok(Self { _installed: () })
    }

    /// Re-install the handler for one signal.
    ///
    /// sigaction handlers stay installed on their own; this is called after
    /// an ignored delivery so a broken registration cannot go unnoticed.
    pub fn rearm(&self, signal: Signal) {
        let action = SigAction::new(
            SigHandler::SigAction(record_signal),
            SaFlags::SA_SIGINFO | SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: same handler as install.
        #[allow(unsafe_code)]
        if let Err(errno) = unsafe { sigaction(signal, &action) } {
            warn!("Failed to re-arm handler for {}: {}", signal, errno);
        }
    }

    /// Take every recorded delivery out of the ring, oldest first.
    ///
    /// Records lost to ring overflow since the previous drain are counted
    /// and logged here, so a flood never passes silently.
    pub fn drain(&self) -> Vec<CaughtSignal> {
        let lost = OVERFLOWED.swap(0, Ordering::AcqRel);
        if lost > 0 {
            warn!("{} signal deliveries were overwritten before this drain", lost);
        }

        let mut drained = Vec::new();
        loop {
            let write = WRITE_INDEX.load(Ordering::Acquire);
            let mut read = READ_INDEX.load(Ordering::Acquire);
            if read == write {
                break;
            }
            if write.wrapping_sub(read) > RING_SLOTS {
                // The writer lapped us; anything older than one ring is gone
                read = write.wrapping_sub(RING_SLOTS);
                READ_INDEX.store(read, Ordering::Release);
            }

            let slot = &RING[read % RING_SLOTS];
            if !slot.ready.load(Ordering::Acquire) {
                // Writer claimed the slot but has not finished storing
                break;
            }

            drained.push(CaughtSignal {
                signo: slot.signo.load(Ordering::Relaxed),
                sender_pid: slot.sender_pid.load(Ordering::Relaxed),
                sender_uid: slot.sender_uid.load(Ordering::Relaxed),
                code: slot.code.load(Ordering::Relaxed),
                errno: slot.errno.load(Ordering::Relaxed),
                status: slot.status.load(Ordering::Relaxed),
            });
            slot.ready.store(false, Ordering::Release);
            READ_INDEX.store(read + 1, Ordering::Release);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;
    use std::time::{Duration, Instant};

    #[test]
    fn test_pid1_sigterm_is_ignored() {
        let from_init = CaughtSignal {
            signo: libc::SIGTERM,
            sender_pid: 1,
            sender_uid: 0,
            code: 0,
            errno: 0,
            status: 0,
        };
        assert!(should_ignore(&from_init));

        let from_shell = CaughtSignal {
            sender_pid: 4321,
            ..from_init
        };
        assert!(!should_ignore(&from_shell));

        let sigint_from_init = CaughtSignal {
            signo: libc::SIGINT,
            ..from_init
        };
        assert!(!should_ignore(&sigint_from_init));
    }

    #[test]
    fn test_ignoring_pid1_sigterm_is_repeatable() {
        let from_init = CaughtSignal {
            signo: libc::SIGTERM,
            sender_pid: 1,
            sender_uid: 0,
            code: 0,
            errno: 0,
            status: 0,
        };
        for _ in 0..100 {
            assert!(should_ignore(&from_init));
        }
    }

    #[test]
    fn test_caught_signal_maps_to_typed_signal() {
        let caught = CaughtSignal {
            signo: libc::SIGHUP,
            sender_pid: 0,
            sender_uid: 0,
            code: 0,
            errno: 0,
            status: 0,
        };
        assert_eq!(caught.signal(), Some(Signal::SIGHUP));

        let bogus = CaughtSignal { signo: 4096, ..caught };
        assert_eq!(bogus.signal(), None);
    }

    // Delivers a real signal to the test process and drains it. SIGPIPE is
    // used because the Rust runtime already ignores it, so a lost race
    // cannot kill the harness.
    #[test]
    fn test_ring_records_real_delivery() {
        let _guard = TEST_SIGNAL_LOCK.lock();
        let catcher = SignalCatcher::install().unwrap();
        // Flush anything a sibling test may have left behind
        let _ = catcher.drain();

        let own_pid = Pid::this();
        nix::sys::signal::kill(own_pid, Signal::SIGPIPE).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut caught = None;
        while Instant::now() < deadline {
            if let Some(signal) = catcher
                .drain()
                .into_iter()
                .find(|s| s.signo == libc::SIGPIPE)
            {
                caught = Some(signal);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let caught = caught.expect("SIGPIPE was not recorded within 2s");
        assert_eq!(caught.sender_pid, own_pid.as_raw());
        assert!(!should_ignore(&caught));

        // The ring is empty again afterwards
        assert!(catcher.drain().is_empty());

        catcher.rearm(Signal::SIGPIPE);
    }

    // Overrunning the ring must surface in the overflow counter instead of
    // silently shrinking the drain. raise() delivers to the calling thread
    // before returning, so every iteration lands exactly one record.
    #[test]
    fn test_ring_overflow_is_counted_and_drain_recovers() {
        let _guard = TEST_SIGNAL_LOCK.lock();
        let catcher = SignalCatcher::install().unwrap();
        let _ = catcher.drain();
        OVERFLOWED.store(0, Ordering::SeqCst);

        for _ in 0..RING_SLOTS + 4 {
            nix::sys::signal::raise(Signal::SIGPIPE).unwrap();
        }

        assert_eq!(OVERFLOWED.load(Ordering::SeqCst), 4);

        let drained = catcher.drain();
        assert_eq!(drained.len(), RING_SLOTS);
        assert!(drained.iter().all(|s| s.signo == libc::SIGPIPE));
        // The loss was reported and reset, and the ring is usable again
        assert_eq!(OVERFLOWED.load(Ordering::SeqCst), 0);
        assert!(catcher.drain().is_empty());

        nix::sys::signal::raise(Signal::SIGPIPE).unwrap();
        assert_eq!(catcher.drain().len(), 1);

        catcher.rearm(Signal::SIGPIPE);
    }
}
