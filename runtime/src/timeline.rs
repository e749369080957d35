//! FIFO sequencing of patches.
//!
//! Every publish takes a ticket when it is enqueued and waits until the
//! timeline is serving that ticket. Turns are handed out strictly in ticket
//! order, so patches are applied in the order they were enqueued regardless
//! of which thread or task produced them.
//!
//! The turn is also recorded in a thread-local stack of active slices. A
//! second publish into the same slice from the thread that already holds the
//! turn (an observer, effect or reducer calling back in) would wait on itself
//! forever; it is detected up front and rejected instead.

use crate::error::SliceError;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

thread_local! {
    /// Ids of the slices whose turn is held on this thread
    static ACTIVE: RefCell<SmallVec<[u64; 4]>> = RefCell::new(SmallVec::new());
}

static NEXT_TIMELINE_ID: AtomicU64 = AtomicU64::new(0);

/// Ticket sequencer for one slice
pub(crate) struct Timeline {
    id: u64,
    next_ticket: AtomicU64,
    serving: Mutex<u64>,
    turn_changed: Condvar,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_TIMELINE_ID.fetch_add(1, Ordering::Relaxed),
            next_ticket: AtomicU64::new(0),
            serving: Mutex::new(0),
            turn_changed: Condvar::new(),
        }
    }

    /// Enqueue and block until it is this caller's turn
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::ReentrantPublish`] if this thread already holds
    /// the turn. No ticket is taken in that case.
    pub(crate) fn enter(&self) -> Result<Turn<'_>, SliceError> {
        let reentrant = ACTIVE.with(|active| active.borrow().contains(&self.id));
        if reentrant {
            return Err(SliceError::ReentrantPublish);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::AcqRel);
        let mut serving = self.serving.lock().unwrap_or_else(PoisonError::into_inner);
        while *serving != ticket {
            serving = self
                .turn_changed
                .wait(serving)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(serving);

        ACTIVE.with(|active| active.borrow_mut().push(self.id));
        tracing::trace!(ticket, "Acquired timeline turn");

        Ok(Turn { timeline: self })
    }

    /// Number of patches enqueued so far, including rejected ones
    pub(crate) fn enqueued(&self) -> u64 {
        self.next_ticket.load(Ordering::Acquire)
    }
}

/// Exclusive right to apply one patch
///
/// Dropping the turn (including while unwinding) hands the timeline to the
/// next ticket.
pub(crate) struct Turn<'a> {
    timeline: &'a Timeline,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let id = self.timeline.id;
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().rposition(|entry| *entry == id) {
                active.remove(position);
            }
        });

        let mut serving = self
            .timeline
            .serving
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *serving += 1;
        drop(serving);
        self.timeline.turn_changed.notify_all();
    }
}
