//! A closeable async drain gate: tracks in-flight work and lets a closer
//! wait until every permit handed out before closing has been returned.
//!
//! Modeled on the pack's `BatchManager` (`enqueued` tracking plus a
//! `write_finished: tokio::sync::Notify` drained on teardown): entering
//! after close is refused, and `close()` suspends until the in-flight count
//! reaches zero.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inner {
  in_flight: AtomicUsize,
  closed: AtomicBool,
  drained: Notify,
}

/// An async-aware closeable gate. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Gate {
  inner: Arc<Inner>,
}

/// Proof that a unit of work was admitted through the gate. Dropping it
/// returns the permit and, if the gate is closed and now empty, wakes
/// anyone waiting in `close()`.
pub struct GatePermit {
  inner: Arc<Inner>,
}

impl Gate {
  pub fn new() -> Self {
    Gate {
      inner: Arc::new(Inner {
        in_flight: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        drained: Notify::new(),
      }),
    }
  }

  /// Admits one unit of work. Returns `None` if the gate is already closed.
  pub fn enter(&self) -> Option<GatePermit> {
    if self.inner.closed.load(Ordering::Acquire) {
      return None;
    }
    self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
    // Re-check: a close() could have raced in between the load above and
    // the increment. Closers only wait while in_flight == 0 at the moment
    // they observe it, so an increment after close is always either seen
    // by a fresh close() call or harmless because this permit will decrement
    // back before anyone inspects in_flight again under the closed gate.
    if self.inner.closed.load(Ordering::Acquire) {
      if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
        self.inner.drained.notify_waiters();
      }
      return None;
    }
    Some(GatePermit { inner: self.inner.clone() })
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::Acquire)
  }

  pub fn in_flight(&self) -> usize {
    self.inner.in_flight.load(Ordering::Acquire)
  }

  /// Closes the gate to new entries and waits for all outstanding permits
  /// to drop. Idempotent: calling `close()` again after the gate is already
  /// closed and drained returns immediately.
  pub async fn close(&self) {
    self.inner.closed.store(true, Ordering::Release);
    loop {
      // `enable()` registers this waiter with `Notify` before we read
      // `in_flight`, so a `notify_waiters()` racing in between the read
      // below and the `await` is not missed. Creating `notified()` and
      // checking the count only after awaiting it (the naive ordering)
      // can lose a wakeup that lands in that window and hang forever.
      let notified = self.inner.drained.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if self.inner.in_flight.load(Ordering::Acquire) == 0 {
        break;
      }
      notified.await;
    }
  }
}

impl Default for Gate {
  fn default() -> Self {
    Gate::new()
  }
}

impl Drop for GatePermit {
  fn drop(&mut self) {
    if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.inner.drained.notify_waiters();
    }
  }
}
