//! Admission control over ffmpeg subprocesses.
//!
//! The process cap is derived from installed memory and re-checked against
//! live memory pressure on every acquisition. Deferred uploads wait in a
//! strict FIFO: freed slots hand off to the queue head, and a newcomer is
//! never admitted while anyone is queued. Permits release on `Drop`, so
//! every exit path (success, failure, timeout, panic) returns the slot.
//!
//! A queued upload waits indefinitely for a busy slot; only memory pressure
//! with a free slot counts against it, and two such failed checks 30 s
//! apart drop it from the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{info, warn};

use clipstream_core::{models::UploadId, Error, Result};

/// Memory-pressure ceiling; above this no new transcode is admitted.
const MAX_USED_MEMORY_PERCENT: f64 = 85.0;
/// Wait between deferred admission checks.
const DEFERRED_RETRY_WAIT: Duration = Duration::from_secs(30);
/// A deferred upload is dropped after this many memory-pressure failures.
const DEFERRED_MAX_STRIKES: u32 = 2;

const GIB: u64 = 1024 * 1024 * 1024;

/// Transcode process cap for a host with `total_bytes` of installed memory.
#[must_use]
pub fn max_processes_for(total_bytes: u64) -> usize {
    if total_bytes >= 8 * GIB {
        6
    } else if total_bytes >= 4 * GIB {
        4
    } else if total_bytes >= 2 * GIB {
        2
    } else {
        1
    }
}

/// Live memory readings. Abstracted so tests can dial pressure up and down.
pub trait MemoryProbe: Send + Sync {
    fn total_bytes(&self) -> u64;
    fn used_bytes(&self) -> u64;
}

/// sysinfo-backed probe used in production.
pub struct SystemMemoryProbe {
    system: Mutex<sysinfo::System>,
}

impl SystemMemoryProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn total_bytes(&self) -> u64 {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.total_memory()
    }

    fn used_bytes(&self) -> u64 {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.used_memory()
    }
}

/// Snapshot of the live admission gate.
#[derive(Debug, Clone, Copy)]
struct MemoryGate {
    max_processes: usize,
    memory_ok: bool,
}

/// Outcome of one admission check by the queue head.
enum HeadAttempt {
    Admitted(AdmissionPermit),
    /// Woken while someone else is at the head; keep waiting.
    NotHead,
    /// Every slot is held by a running transcode; wait for a release.
    SlotBusy,
    /// A slot is free but memory pressure blocks it; this counts a strike.
    MemoryPressure,
}

struct Waiter {
    token: u64,
    notify: Arc<Notify>,
}

struct Inner {
    active: usize,
    next_token: u64,
    queue: VecDeque<Waiter>,
}

pub struct Admission {
    inner: Mutex<Inner>,
    probe: Box<dyn MemoryProbe>,
}

/// A held transcode slot. Dropping it releases the slot and wakes the next
/// queued upload.
pub struct AdmissionPermit {
    admission: Arc<Admission>,
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.admission.release();
    }
}

impl Admission {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_probe(Box::new(SystemMemoryProbe::new()))
    }

    #[must_use]
    pub fn with_probe(probe: Box<dyn MemoryProbe>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                active: 0,
                next_token: 0,
                queue: VecDeque::new(),
            }),
            probe,
        })
    }

    /// Currently held slots.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// Deferred uploads waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    fn memory_gate(&self) -> MemoryGate {
        let total = self.probe.total_bytes();
        let used = self.probe.used_bytes();
        let used_percent = if total == 0 {
            100.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        MemoryGate {
            max_processes: max_processes_for(total),
            memory_ok: used_percent <= MAX_USED_MEMORY_PERCENT,
        }
    }

    fn grant_locked(self: &Arc<Self>, inner: &mut MutexGuard<'_, Inner>) -> AdmissionPermit {
        inner.active += 1;
        AdmissionPermit {
            admission: self.clone(),
        }
    }

    /// Admit immediately if capacity and memory pressure allow.
    ///
    /// Refuses whenever anyone is queued: freed slots belong to the FIFO
    /// head, never to a barging newcomer.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let gate = self.memory_gate();
        let mut inner = self.inner.lock();
        if !inner.queue.is_empty() {
            return None;
        }
        if inner.active < gate.max_processes && gate.memory_ok {
            Some(self.grant_locked(&mut inner))
        } else {
            None
        }
    }

    /// One admission check by a queued waiter. Admission and dequeue happen
    /// under one lock so the slot and the queue slot move together.
    fn try_admit_head(self: &Arc<Self>, token: u64) -> HeadAttempt {
        let gate = self.memory_gate();
        let mut inner = self.inner.lock();
        if inner.queue.front().map(|w| w.token) != Some(token) {
            return HeadAttempt::NotHead;
        }
        if inner.active >= gate.max_processes {
            return HeadAttempt::SlotBusy;
        }
        if !gate.memory_ok {
            return HeadAttempt::MemoryPressure;
        }
        inner.queue.pop_front();
        let permit = self.grant_locked(&mut inner);
        // Capacity may remain (multi-slot hosts); let the new head check now
        // instead of waiting for its heartbeat.
        if inner.active < gate.max_processes {
            if let Some(next) = inner.queue.front() {
                next.notify.notify_one();
            }
        }
        HeadAttempt::Admitted(permit)
    }

    /// Acquire a slot, joining the FIFO when the host is saturated.
    ///
    /// The head is re-attempted whenever a pipeline run ends (and on a 30 s
    /// heartbeat); a busy slot just means more waiting, while a free slot
    /// blocked by memory pressure strikes the upload, twice being fatal.
    pub async fn admit(self: &Arc<Self>, upload_id: &UploadId) -> Result<AdmissionPermit> {
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }

        let notify = Arc::new(Notify::new());
        let token = {
            let mut inner = self.inner.lock();
            let token = inner.next_token;
            inner.next_token += 1;
            inner.queue.push_back(Waiter {
                token,
                notify: notify.clone(),
            });
            token
        };
        info!(upload_id = %upload_id, position = self.queued(), "Transcode deferred, queued");

        let mut pressure_strikes = 0u32;
        loop {
            let _ = tokio::time::timeout(DEFERRED_RETRY_WAIT, notify.notified()).await;

            match self.try_admit_head(token) {
                HeadAttempt::Admitted(permit) => {
                    info!(upload_id = %upload_id, "Deferred transcode admitted");
                    return Ok(permit);
                }
                HeadAttempt::NotHead | HeadAttempt::SlotBusy => {}
                HeadAttempt::MemoryPressure => {
                    pressure_strikes += 1;
                    if pressure_strikes >= DEFERRED_MAX_STRIKES {
                        self.remove_waiter(token);
                        // Give the next waiter its shot instead of stalling
                        // the queue.
                        self.wake_head();
                        warn!(
                            upload_id = %upload_id,
                            "Dropping deferred upload after repeated memory-pressure failures"
                        );
                        return Err(Error::TranscodeFailed(format!(
                            "transcoder saturated, upload {upload_id} dropped from queue"
                        )));
                    }
                }
            }
        }
    }

    fn remove_waiter(&self, token: u64) {
        self.inner.lock().queue.retain(|w| w.token != token);
    }

    fn wake_head(&self) {
        if let Some(waiter) = self.inner.lock().queue.front() {
            waiter.notify.notify_one();
        }
    }

    fn release(&self) {
        {
            let mut inner = self.inner.lock();
            inner.active = inner.active.saturating_sub(1);
        }
        self.wake_head();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeProbe {
        total: u64,
        used: AtomicU64,
    }

    impl FakeProbe {
        fn new(total: u64, used: u64) -> Self {
            Self {
                total,
                used: AtomicU64::new(used),
            }
        }
    }

    impl MemoryProbe for FakeProbe {
        fn total_bytes(&self) -> u64 {
            self.total
        }
        fn used_bytes(&self) -> u64 {
            self.used.load(Ordering::SeqCst)
        }
    }

    fn uid(s: &str) -> UploadId {
        UploadId::from_string(s.to_string())
    }

    #[test]
    fn test_max_processes_ladder() {
        assert_eq!(max_processes_for(16 * GIB), 6);
        assert_eq!(max_processes_for(8 * GIB), 6);
        assert_eq!(max_processes_for(6 * GIB), 4);
        assert_eq!(max_processes_for(4 * GIB), 4);
        assert_eq!(max_processes_for(3 * GIB), 2);
        assert_eq!(max_processes_for(2 * GIB), 2);
        assert_eq!(max_processes_for(GIB), 1);
    }

    #[test]
    fn test_memory_pressure_blocks_admission() {
        let admission = Admission::with_probe(Box::new(FakeProbe::new(8 * GIB, 7 * GIB)));
        assert!(admission.try_acquire().is_none());
    }

    #[test]
    fn test_permit_drop_releases_slot() {
        // 1 GiB host: single slot.
        let admission = Admission::with_probe(Box::new(FakeProbe::new(GIB, 0)));
        let permit = admission.try_acquire().expect("first acquire");
        assert_eq!(admission.active(), 1);
        assert!(admission.try_acquire().is_none());
        drop(permit);
        assert_eq!(admission.active(), 0);
        assert!(admission.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_fifo_queueing_with_single_slot() {
        let admission = Admission::with_probe(Box::new(FakeProbe::new(GIB, 0)));
        let first = admission.try_acquire().expect("first slot");

        let admission_b = admission.clone();
        let waiter = tokio::spawn(async move { admission_b.admit(&uid("b")).await });

        // Give the waiter time to enqueue before releasing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(admission.queued(), 1);

        drop(first);
        let permit = waiter.await.expect("join").expect("admitted");
        assert_eq!(admission.active(), 1);
        assert_eq!(admission.queued(), 0);
        drop(permit);
        assert_eq!(admission.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_transcode_does_not_strike_out_waiters() {
        // Single slot held well past two 30 s heartbeats: the queued upload
        // must keep waiting, not be dropped.
        let admission = Admission::with_probe(Box::new(FakeProbe::new(GIB, 0)));
        let holder = admission.try_acquire().expect("slot");

        let admission_b = admission.clone();
        let waiter = tokio::spawn(async move { admission_b.admit(&uid("b")).await });

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!waiter.is_finished());
        assert_eq!(admission.queued(), 1);

        drop(holder);
        let permit = waiter.await.expect("join").expect("admitted after release");
        assert_eq!(admission.active(), 1);
        drop(permit);
    }

    #[tokio::test]
    async fn test_newcomer_cannot_barge_past_queue() {
        let admission = Admission::with_probe(Box::new(FakeProbe::new(GIB, 0)));
        let holder = admission.try_acquire().expect("slot");

        let admission_b = admission.clone();
        let waiter = tokio::spawn(async move { admission_b.admit(&uid("b")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(admission.queued(), 1);

        // The freed slot belongs to the queued head, not to a newcomer.
        drop(holder);
        assert!(admission.try_acquire().is_none());

        let permit = waiter.await.expect("join").expect("head admitted");
        assert_eq!(admission.active(), 1);
        drop(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_upload_dropped_after_two_pressure_strikes() {
        // Slots are free but memory is pegged, so every deferred check is a
        // strike; the second one drops the upload.
        let admission = Admission::with_probe(Box::new(FakeProbe::new(8 * GIB, 8 * GIB)));
        let err = admission.admit(&uid("doomed")).await.unwrap_err();
        assert!(matches!(err, Error::TranscodeFailed(_)));
        assert_eq!(admission.queued(), 0);
    }

    #[tokio::test]
    async fn test_counters_return_to_zero_after_failure_paths() {
        let admission = Admission::with_probe(Box::new(FakeProbe::new(GIB, 0)));
        {
            let _permit = admission.try_acquire().expect("slot");
            assert_eq!(admission.active(), 1);
            // Simulated pipeline failure: permit dropped by unwinding scope.
        }
        assert_eq!(admission.active(), 0);
    }
}
