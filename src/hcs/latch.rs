//! Completion latch bridging engine callback threads and the orchestrating thread.
//!
//! Engine requests return "pending" immediately and complete later through a
//! callback on an engine-owned thread. The callback can legally fire before
//! the issuing thread reaches its wait call, so a plain condvar could miss
//! the wakeup. The latch closes that race with an arm/wait split: [`NotificationLatch::arm`]
//! takes the mutex *before* the request is issued and hands the held guard to
//! the caller as an [`ArmedLatch`]; [`ArmedLatch::wait`] adopts it and blocks
//! until the kind's fired flag is set.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{Error, Result};

/// Native notification codes, as the engine reports them.
pub const NOTIFY_SYSTEM_EXIT: u32 = 0x0000_0001;
pub const NOTIFY_SYSTEM_CREATE_COMPLETE: u32 = 0x0000_0002;
pub const NOTIFY_SYSTEM_START_COMPLETE: u32 = 0x0000_0003;
pub const NOTIFY_PROCESS_EXIT: u32 = 0x0001_0000;
pub const NOTIFY_SERVICE_DISCONNECT: u32 = 0x0100_0000;

/// Notification kinds the orchestrator waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    SystemCreateComplete,
    SystemStartComplete,
    SystemExit,
    ProcessExit,
    /// Anything else the engine may emit (service disconnects and the like).
    Unsupported,
}

impl NotificationKind {
    /// Map a native notification code onto a kind.
    pub fn from_code(code: u32) -> Self {
        match code {
            NOTIFY_SYSTEM_CREATE_COMPLETE => NotificationKind::SystemCreateComplete,
            NOTIFY_SYSTEM_START_COMPLETE => NotificationKind::SystemStartComplete,
            NOTIFY_SYSTEM_EXIT => NotificationKind::SystemExit,
            NOTIFY_PROCESS_EXIT => NotificationKind::ProcessExit,
            _ => NotificationKind::Unsupported,
        }
    }

    /// Native code for this kind; `Unsupported` reports as zero.
    pub fn code(self) -> u32 {
        match self {
            NotificationKind::SystemCreateComplete => NOTIFY_SYSTEM_CREATE_COMPLETE,
            NotificationKind::SystemStartComplete => NOTIFY_SYSTEM_START_COMPLETE,
            NotificationKind::SystemExit => NOTIFY_SYSTEM_EXIT,
            NotificationKind::ProcessExit => NOTIFY_PROCESS_EXIT,
            NotificationKind::Unsupported => 0,
        }
    }

    fn slot(self) -> Option<usize> {
        match self {
            NotificationKind::SystemCreateComplete => Some(0),
            NotificationKind::SystemStartComplete => Some(1),
            NotificationKind::SystemExit => Some(2),
            NotificationKind::ProcessExit => Some(3),
            NotificationKind::Unsupported => None,
        }
    }
}

struct Slot {
    fired: AtomicBool,
    cond: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            cond: Condvar::new(),
        }
    }
}

/// One-shot-per-kind completion gate for a single in-flight handle.
///
/// Fired flags only ever transition false to true; a latch instance guards
/// at most one wait cycle per kind over its lifetime.
pub struct NotificationLatch {
    mutex: Mutex<()>,
    slots: [Slot; 4],
}

impl Default for NotificationLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationLatch {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            slots: [Slot::new(), Slot::new(), Slot::new(), Slot::new()],
        }
    }

    /// Take the latch mutex ahead of issuing the asynchronous request.
    ///
    /// The returned token keeps the guard held; pass it to
    /// [`ArmedLatch::wait`] once the request is in flight. A completion that
    /// lands in between is recorded in the fired flag and observed by `wait`.
    pub fn arm(&self) -> ArmedLatch<'_> {
        ArmedLatch {
            latch: self,
            guard: self.mutex.lock(),
        }
    }

    /// Record a notification from the engine callback thread.
    ///
    /// Exactly one signal per kind broadcasts, even if the engine redelivers
    /// the same notification. Unknown kinds are ignored.
    pub fn signal(&self, kind: NotificationKind) {
        let Some(index) = kind.slot() else {
            tracing::trace!(code = kind.code(), "ignoring notification kind");
            return;
        };
        let slot = &self.slots[index];
        if slot
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _guard = self.mutex.lock();
            slot.cond.notify_all();
        }
    }
}

/// Held-lock token produced by [`NotificationLatch::arm`].
pub struct ArmedLatch<'a> {
    latch: &'a NotificationLatch,
    guard: MutexGuard<'a, ()>,
}

impl ArmedLatch<'_> {
    /// Block until `kind` fires, then release the mutex.
    ///
    /// Errors with [`Error::UnsupportedNotification`] (without blocking) if
    /// `kind` is not one of the recognized kinds.
    pub fn wait(mut self, kind: NotificationKind) -> Result<()> {
        let index = kind
            .slot()
            .ok_or(Error::UnsupportedNotification(kind.code()))?;
        let slot = &self.latch.slots[index];
        while !slot.fired.load(Ordering::Acquire) {
            slot.cond.wait(&mut self.guard);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            NotificationKind::from_code(NOTIFY_SYSTEM_CREATE_COMPLETE),
            NotificationKind::SystemCreateComplete
        );
        assert_eq!(
            NotificationKind::from_code(NOTIFY_PROCESS_EXIT),
            NotificationKind::ProcessExit
        );
        assert_eq!(
            NotificationKind::from_code(NOTIFY_SERVICE_DISCONNECT),
            NotificationKind::Unsupported
        );
        assert_eq!(NotificationKind::from_code(0xdead_beef), NotificationKind::Unsupported);
    }

    #[test]
    fn test_signal_before_wait_does_not_lose_wakeup() {
        let latch = NotificationLatch::new();
        latch.signal(NotificationKind::SystemCreateComplete);
        let armed = latch.arm();
        armed.wait(NotificationKind::SystemCreateComplete).unwrap();
    }

    #[test]
    fn test_signal_between_arm_and_wait() {
        let latch = Arc::new(NotificationLatch::new());
        let armed = latch.arm();

        let signaller = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            // Fires while the arming thread still holds the guard.
            signaller.signal(NotificationKind::SystemStartComplete);
        });

        // Give the signaller a chance to reach the CAS before we wait.
        thread::sleep(Duration::from_millis(20));
        armed.wait(NotificationKind::SystemStartComplete).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_from_callback_thread_wakes_waiter() {
        let latch = Arc::new(NotificationLatch::new());
        let armed = latch.arm();

        let signaller = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            signaller.signal(NotificationKind::ProcessExit);
        });

        armed.wait(NotificationKind::ProcessExit).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_duplicate_signal_is_idempotent() {
        let latch = Arc::new(NotificationLatch::new());
        latch.signal(NotificationKind::SystemExit);
        latch.signal(NotificationKind::SystemExit);

        let armed = latch.arm();
        armed.wait(NotificationKind::SystemExit).unwrap();

        // Redelivery after the wait must not deadlock either.
        latch.signal(NotificationKind::SystemExit);
    }

    #[test]
    fn test_wait_unsupported_kind_fails_without_blocking() {
        let latch = NotificationLatch::new();
        let armed = latch.arm();
        let err = armed.wait(NotificationKind::Unsupported).unwrap_err();
        assert!(matches!(err, Error::UnsupportedNotification(0)));
        // The guard was released; arming again must not deadlock.
        drop(latch.arm());
    }

    #[test]
    fn test_signal_unsupported_kind_is_ignored() {
        let latch = NotificationLatch::new();
        latch.signal(NotificationKind::Unsupported);
    }

    #[test]
    fn test_kinds_are_independent() {
        let latch = Arc::new(NotificationLatch::new());
        latch.signal(NotificationKind::SystemExit);

        let armed = latch.arm();
        let signaller = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            signaller.signal(NotificationKind::ProcessExit);
        });

        // SystemExit having fired must not satisfy a ProcessExit wait.
        armed.wait(NotificationKind::ProcessExit).unwrap();
        handle.join().unwrap();
    }
}
