//! Per-user state for the multi-step `/add` flow.
//!
//! Each user owns a slot guarded by its own mutex. A handler keeps the slot
//! locked while it processes one message, so two messages from the same user
//! are handled one after another while other users proceed independently.

use super::*;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ConversationStage {
    AwaitingText,
}

#[derive(Clone, Debug)]
pub(super) struct Conversation {
    stage: ConversationStage,
    expires_at: u64,
}

type Slot = Arc<Mutex<Option<Conversation>>>;

pub(super) struct ConversationStore {
    ttl: Duration,
    slots: Mutex<HashMap<u64, Slot>>,
}

impl ConversationStore {
    pub(super) fn new(ttl: Duration) -> Self {
        ConversationStore {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive access to `user_id`'s conversation.
    pub(super) async fn lock(&self, user_id: u64) -> ConversationGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            prune_idle(&mut slots);
            slots.entry(user_id).or_default().clone()
        };
        ConversationGuard {
            ttl: self.ttl,
            inner: slot.lock_owned().await,
        }
    }

    /// Unexpired conversations, counting slots locked by a handler as open.
    pub(super) async fn open_conversations(&self) -> usize {
        let now = now_ts();
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(conversation) => conversation
                    .as_ref()
                    .is_some_and(|conversation| conversation.expires_at > now),
                Err(_) => true,
            })
            .count()
    }

    #[cfg(test)]
    pub(super) async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

// Drops slots nobody holds and that carry no conversation.
fn prune_idle(slots: &mut HashMap<u64, Slot>) {
    slots.retain(|_, slot| {
        if Arc::strong_count(slot) > 1 {
            return true;
        }
        match slot.try_lock() {
            Ok(conversation) => conversation.is_some(),
            Err(_) => true,
        }
    });
}

pub(super) struct ConversationGuard {
    ttl: Duration,
    inner: OwnedMutexGuard<Option<Conversation>>,
}

impl ConversationGuard {
    /// Starts (or restarts) a conversation at `stage`.
    pub(super) fn begin(&mut self, stage: ConversationStage) {
        *self.inner = Some(Conversation {
            stage,
            expires_at: now_ts() + self.ttl.as_secs(),
        });
    }

    /// Current stage, discarding the conversation if it has expired.
    pub(super) fn active(&mut self) -> Option<ConversationStage> {
        let now = now_ts();
        match self.inner.as_ref() {
            Some(conversation) if conversation.expires_at > now => Some(conversation.stage),
            Some(_) => {
                debug!("discarding expired conversation");
                *self.inner = None;
                None
            }
            None => None,
        }
    }

    /// Ends the conversation; returns whether one was open.
    pub(super) fn end(&mut self) -> bool {
        self.inner.take().is_some()
    }
}
