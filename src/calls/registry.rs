use std::sync::Mutex;

use vlcore::UserId;

/// The call currently holding the process-wide slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSlot {
    pub thread_id: String,
    pub peer: UserId,
}

/// Allows at most one live call per process, across all chat threads.
///
/// A thread claims the slot when it leaves Idle and releases it during
/// teardown. Claims by the thread already holding the slot succeed.
#[derive(Debug, Default)]
pub struct CallRegistry {
    slot: Mutex<Option<CallSlot>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self, thread_id: &str, peer: &UserId) -> bool {
        let mut slot = self.slot.lock().unwrap();
        match slot.as_ref() {
            Some(held) if held.thread_id != thread_id => false,
            _ => {
                *slot = Some(CallSlot {
                    thread_id: thread_id.to_string(),
                    peer: peer.clone(),
                });
                true
            }
        }
    }

    /// Releases the slot if `thread_id` holds it.
    pub fn release(&self, thread_id: &str) {
        let mut slot = self.slot.lock().unwrap();
        if slot.as_ref().is_some_and(|held| held.thread_id == thread_id) {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<CallSlot> {
        self.slot.lock().unwrap().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}
