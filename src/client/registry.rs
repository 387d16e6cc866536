use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use crate::error::{Error, Result};
use super::channel_state::ChannelCore;

/// Maps our channel ids to live channels.
pub(super) struct ChannelRegistry {
    state: Mutex<RegistryState>,
}

struct RegistryState {
    next_id: u32,
    channels: HashMap<u32, Arc<ChannelCore>>,
    closed: bool,
}

impl ChannelRegistry {
    pub fn new() -> ChannelRegistry {
        ChannelRegistry {
            state: Mutex::new(RegistryState { next_id: 0, channels: HashMap::new(), closed: false }),
        }
    }

    /// Allocates a fresh channel id and registers the channel created by `make_core`.
    pub fn allocate<F>(&self, make_core: F) -> Result<Arc<ChannelCore>>
        where F: FnOnce(u32) -> ChannelCore
    {
        let mut st = self.state.lock();
        if st.closed {
            return Err(Error::ConnectionClosed)
        }

        let mut local_id = st.next_id;
        while st.channels.contains_key(&local_id) {
            local_id = local_id.wrapping_add(1);
        }
        st.next_id = local_id.wrapping_add(1);

        let core = Arc::new(make_core(local_id));
        st.channels.insert(local_id, core.clone());
        Ok(core)
    }

    pub fn get(&self, local_id: u32) -> Option<Arc<ChannelCore>> {
        self.state.lock().channels.get(&local_id).cloned()
    }

    pub fn remove(&self, local_id: u32) {
        if self.state.lock().channels.remove(&local_id).is_some() {
            log::trace!("removed channel {} from the registry", local_id);
        }
    }

    /// Closes all channels because the connection is closed.
    ///
    /// No channel can be allocated after this.
    pub fn close_all(&self) {
        let channels = {
            let mut st = self.state.lock();
            st.closed = true;
            std::mem::take(&mut st.channels)
        };
        for (_, core) in channels {
            core.finalize(true);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().channels.len()
    }
}
