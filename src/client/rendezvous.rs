use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use crate::error::{Result, Error};

/// Single-slot handoff between the receive path and a protocol sequence that waits for a reply.
///
/// At most one value is buffered. A value that was deposited before [`close()`][Self::close()]
/// is still delivered, after that every [`try_get()`][Self::try_get()] fails with
/// [`Error::ConnectionClosed`].
pub(super) struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    value_set: Notify,
    value_taken: Notify,
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Rendezvous {
            slot: Mutex::new(Slot { value: None, closed: false }),
            value_set: Notify::new(),
            value_taken: Notify::new(),
        }
    }

    /// Deposits `value` into the slot, waiting at most `timeout` for a previous value to be taken.
    ///
    /// Returns false if the slot stayed occupied or if it was closed.
    pub async fn try_set(&self, value: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = Some(value);
        loop {
            let taken = self.value_taken.notified();
            tokio::pin!(taken);
            taken.as_mut().enable();

            {
                let mut slot = self.slot.lock();
                if slot.closed {
                    return false
                }
                if slot.value.is_none() {
                    slot.value = value.take();
                    drop(slot);
                    self.value_set.notify_one();
                    return true
                }
            }

            if timeout_at(deadline, taken).await.is_err() {
                return false
            }
        }
    }

    /// Takes the value from the slot, waiting at most `timeout` for it to be deposited.
    pub async fn try_get(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let set = self.value_set.notified();
            tokio::pin!(set);
            set.as_mut().enable();

            {
                let mut slot = self.slot.lock();
                if let Some(value) = slot.value.take() {
                    drop(slot);
                    self.value_taken.notify_one();
                    return Ok(value)
                }
                if slot.closed {
                    return Err(Error::ConnectionClosed)
                }
            }

            if timeout_at(deadline, set).await.is_err() {
                return Err(Error::Timeout)
            }
        }
    }

    /// Closes the slot and wakes up all waiters.
    pub fn close(&self) {
        self.slot.lock().closed = true;
        self.value_set.notify_waiters();
        self.value_taken.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }
}
