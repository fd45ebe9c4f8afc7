use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    NotStarted,
    InProgress,
    Done,
}

/// One-shot guard for effectful initialisation. The first caller of
/// [`OnceLatch::try_begin`] wins; every later caller gets `None`, whether the
/// winner is still running or has finished.
#[derive(Debug, Default)]
pub struct OnceLatch {
    state: AtomicU8,
}

impl OnceLatch {
    pub fn new() -> Self { Self::default() }

    pub fn try_begin(&self) -> Option<LatchGuard<'_>> {
        self.state
            .compare_exchange(NOT_STARTED, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LatchGuard { latch: self })
    }

    pub fn state(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => LatchState::NotStarted,
            IN_PROGRESS => LatchState::InProgress,
            _ => LatchState::Done,
        }
    }
}

/// Held by the winning caller. Marks the latch `Done` when finished or dropped,
/// including on unwind, so the latch never re-opens.
pub struct LatchGuard<'a> {
    latch: &'a OnceLatch,
}

impl LatchGuard<'_> {
    pub fn finish(self) {}
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.state.store(DONE, Ordering::Release);
    }
}

const MAX_TRACKED: usize = 1024;

/// Latches keyed by callback code, so two deliveries of the same callback URL
/// (reload, duplicate request) share one guard.
#[derive(Default)]
pub struct CallbackLatches {
    inner: Mutex<Tracked>,
}

#[derive(Default)]
struct Tracked {
    by_key: HashMap<String, Arc<OnceLatch>>,
    order: VecDeque<String>,
}

impl CallbackLatches {
    pub fn new() -> Self { Self::default() }

    pub fn latch_for(&self, key: &str) -> Arc<OnceLatch> {
        let mut t = self.inner.lock();
        if let Some(l) = t.by_key.get(key) {
            return l.clone();
        }
        let latch = Arc::new(OnceLatch::new());
        t.by_key.insert(key.to_string(), latch.clone());
        t.order.push_back(key.to_string());
        while t.order.len() > MAX_TRACKED {
            if let Some(old) = t.order.pop_front() {
                t.by_key.remove(&old);
            }
        }
        latch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
