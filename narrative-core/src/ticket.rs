//! Invocation tickets for last-issued-wins result application.
//!
//! Every structured call takes a [`Ticket`] from a [`RequestSequencer`]
//! before it suspends. When the call resolves, its result goes through a
//! [`LatestSlot`], which only accepts it if no newer ticket has been issued
//! in the meantime. A slow call issued early can therefore never overwrite
//! the result of a faster call issued later.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Position of one invocation in issuance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues monotonically increasing tickets.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next ticket. The first ticket is `#1`.
    pub fn issue(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Most recently issued ticket, if any.
    pub fn latest(&self) -> Option<Ticket> {
        match self.issued.load(Ordering::SeqCst) {
            0 => None,
            n => Some(Ticket(n)),
        }
    }

    /// True if no ticket has been issued after `ticket`.
    pub fn is_latest(&self, ticket: Ticket) -> bool {
        self.latest() == Some(ticket)
    }
}

/// Holds the result of the latest-issued invocation.
#[derive(Debug)]
pub struct LatestSlot<T> {
    sequencer: RequestSequencer,
    value: Mutex<Option<(Ticket, T)>>,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            sequencer: RequestSequencer::new(),
            value: Mutex::new(None),
        }
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a new invocation.
    pub fn issue(&self) -> Ticket {
        self.sequencer.issue()
    }

    /// True if `ticket` is still the most recently issued one.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.sequencer.is_latest(ticket)
    }

    /// Store `value` if `ticket` is current. Returns whether it was applied.
    pub fn apply(&self, ticket: Ticket, value: T) -> bool {
        let mut slot = self.value.lock();
        if !self.sequencer.is_latest(ticket) {
            return false;
        }
        *slot = Some((ticket, value));
        true
    }

    /// The applied value, if any.
    pub fn get(&self) -> Option<T> {
        self.value.lock().as_ref().map(|(_, value)| value.clone())
    }

    /// Ticket of the applied value, if any.
    pub fn applied_ticket(&self) -> Option<Ticket> {
        self.value.lock().as_ref().map(|(ticket, _)| *ticket)
    }

    /// Drop the applied value.
    pub fn clear(&self) {
        *self.value.lock() = None;
    }
}

/// Counts an invocation as in flight until dropped, including on cancellation.
pub(crate) struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    pub(crate) fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
