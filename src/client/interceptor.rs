use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use crate::codec::Packet;
use crate::error::Result;
pub(super) use futures_core::future::BoxFuture;

/// What an [`Interceptor`] did with an offered packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum Verdict {
    /// The packet is not interesting for this interceptor, offer it to the next one.
    PassThrough,
    /// The packet was consumed.
    Consumed,
    /// The packet was consumed and the interceptor should be removed from the chain.
    Finished,
}

/// Handler of a sub-protocol that temporarily claims some packets from the receive path.
///
/// The receive path awaits [`offer()`][Self::offer()], so the interceptor can block further
/// packets until it has handled this one.
pub(super) trait Interceptor: Send + Sync {
    fn offer<'a>(&'a self, packet: &'a Packet) -> BoxFuture<'a, Result<Verdict>>;

    /// Called when the connection is closed, the interceptor should wake up anybody who waits
    /// for its packets.
    fn on_close(&self);
}

/// Ordered set of live interceptors.
pub(super) struct InterceptorChain {
    state: Mutex<ChainState>,
}

struct ChainState {
    next_id: u64,
    entries: Vec<Entry>,
    closed: bool,
}

#[derive(Clone)]
struct Entry {
    id: u64,
    interceptor: Arc<dyn Interceptor>,
}

/// Registration of an interceptor; the interceptor is removed from the chain when this handle
/// is dropped (unless you [`detach()`][Self::detach()] it).
#[must_use]
pub(super) struct InterceptorHandle {
    chain: Weak<InterceptorChain>,
    id: u64,
}

impl InterceptorChain {
    pub fn new() -> Arc<Self> {
        Arc::new(InterceptorChain {
            state: Mutex::new(ChainState { next_id: 0, entries: Vec::new(), closed: false }),
        })
    }

    /// Appends the interceptor to the end of the chain.
    ///
    /// If the chain is already closed, the interceptor is closed immediately.
    pub fn register(self: &Arc<Self>, interceptor: Arc<dyn Interceptor>) -> InterceptorHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.closed {
            drop(state);
            interceptor.on_close();
        } else {
            state.entries.push(Entry { id, interceptor });
        }
        InterceptorHandle { chain: Arc::downgrade(self), id }
    }

    /// Offers the packet to the interceptors in registration order.
    ///
    /// Returns true if some interceptor claimed the packet.
    pub async fn offer(&self, packet: &Packet) -> Result<bool> {
        let entries = self.state.lock().entries.clone();
        for entry in entries.iter() {
            match entry.interceptor.offer(packet).await? {
                Verdict::PassThrough => continue,
                Verdict::Consumed => return Ok(true),
                Verdict::Finished => {
                    self.remove(entry.id);
                    return Ok(true)
                },
            }
        }
        Ok(false)
    }

    /// Removes all interceptors and notifies them that the connection is closed.
    pub fn close(&self) {
        let entries = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.entries)
        };
        for entry in entries {
            entry.interceptor.on_close();
        }
    }

    fn remove(&self, id: u64) {
        self.state.lock().entries.retain(|entry| entry.id != id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl InterceptorHandle {
    /// Keeps the interceptor in the chain for the lifetime of the connection.
    pub fn detach(self) {
        std::mem::forget(self)
    }
}

impl Drop for InterceptorHandle {
    fn drop(&mut self) {
        if let Some(chain) = self.chain.upgrade() {
            chain.remove(self.id);
        }
    }
}
