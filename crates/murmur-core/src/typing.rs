//! Typing indicators.
//!
//! Indicators are ephemeral and never persisted. A `typing: true` update
//! arms an expiry timer keyed by `(sender, target)`; if no refresh arrives
//! before it fires, a `typing: false` frame is relayed on the sender's
//! behalf. An explicit `typing: false` cancels the timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::ChatError;
use crate::metrics;
use crate::protocol::ServerFrame;
use crate::registry::ConnectionRegistry;
use crate::store::ChatStore;
use crate::timer::ScheduledTask;
use crate::types::{Identity, Target};

/// Default time after which an unrefreshed indicator expires.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_millis(3000);

type TypingKey = (Identity, Target);

struct ActiveIndicator {
    generation: u64,
    recipients: Vec<Identity>,
    stop_frame: ServerFrame,
    // Held for its Drop: replacing or removing the entry cancels the expiry.
    _expiry: ScheduledTask,
}

/// Relays typing indicators and expires stale ones.
pub struct TypingTracker {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
    expiry: Duration,
    active: Arc<DashMap<TypingKey, ActiveIndicator>>,
    next_generation: AtomicU64,
}

impl TypingTracker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn ChatStore>,
        expiry: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            expiry,
            active: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Relay a typing update from `sender` about `target`.
    ///
    /// Updates from senders not allowed to message the target are dropped.
    #[instrument(name = "chat.typing", skip(self), fields(sender = %sender, target = %target))]
    pub async fn update(
        &self,
        sender: &Identity,
        target: &Target,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        if !self.store.is_authorized_to_message(sender, target).await? {
            debug!("Dropping typing update from unauthorized sender");
            return Ok(());
        }

        let recipients = match target {
            Target::Direct(recipient) => vec![recipient.clone()],
            Target::Group(group) => self
                .store
                .resolve_group_members(group)
                .await?
                .into_iter()
                .filter(|member| member != sender)
                .collect(),
        };

        let key = (sender.clone(), target.clone());
        self.relay(&recipients, typing_frame(sender, target, is_typing));

        if is_typing {
            self.arm_expiry(key, recipients, typing_frame(sender, target, false));
        } else {
            self.active.remove(&key);
        }
        Ok(())
    }

    /// Stop every indicator owned by `sender`, relaying `typing: false`.
    ///
    /// Called when the sender's connection goes away.
    pub fn clear_sender(&self, sender: &Identity) {
        let keys: Vec<TypingKey> = self
            .active
            .iter()
            .filter(|entry| &entry.key().0 == sender)
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if let Some((_, indicator)) = self.active.remove(&key) {
                self.relay(&indicator.recipients, indicator.stop_frame.clone());
            }
        }
    }

    /// Number of indicators currently armed.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn arm_expiry(&self, key: TypingKey, recipients: Vec<Identity>, stop_frame: ServerFrame) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let active = Arc::clone(&self.active);
        let registry = Arc::clone(&self.registry);
        let expired_key = key.clone();
        let expiry = ScheduledTask::after(self.expiry, async move {
            // Only the latest timer for a key may clear it.
            if let Some((_, indicator)) =
                active.remove_if(&expired_key, |_, entry| entry.generation == generation)
            {
                debug!(sender = %expired_key.0, "Typing indicator expired");
                for recipient in &indicator.recipients {
                    registry.send(recipient, indicator.stop_frame.clone());
                }
            }
        });

        // Replacing an existing entry drops (and so cancels) its timer.
        self.active.insert(
            key,
            ActiveIndicator {
                generation,
                recipients,
                stop_frame,
                _expiry: expiry,
            },
        );
    }

    fn relay(&self, recipients: &[Identity], frame: ServerFrame) {
        for recipient in recipients {
            let result = self.registry.send(recipient, frame.clone());
            metrics::record_relay(frame.name(), result.is_delivered());
            if !result.is_delivered() {
                debug!(recipient = %recipient, "Typing recipient unreachable");
            }
        }
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        // Pending timers hold the map; clearing cancels them and breaks the cycle.
        self.active.clear();
    }
}

fn typing_frame(sender: &Identity, target: &Target, is_typing: bool) -> ServerFrame {
    match target {
        Target::Direct(_) => ServerFrame::Typing {
            from_user_id: sender.clone(),
            is_typing,
        },
        Target::Group(group) => ServerFrame::GroupTyping {
            group_id: group.clone(),
            from_user_id: sender.clone(),
            is_typing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::GroupId;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<ConnectionRegistry>, Arc<MemoryStore>, TypingTracker) {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        store
            .add_friendship(&Identity::new("alice"), &Identity::new("bob"))
            .await;
        let tracker = TypingTracker::new(registry.clone(), store.clone(), DEFAULT_TYPING_EXPIRY);
        (registry, store, tracker)
    }

    fn is_typing(frame: &ServerFrame) -> bool {
        match frame {
            ServerFrame::Typing { is_typing, .. } | ServerFrame::GroupTyping { is_typing, .. } => {
                *is_typing
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_expires() {
        let (registry, _store, tracker) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob.clone(), tx);

        tracker.update(&alice, &Target::Direct(bob), true).await.unwrap();
        assert!(is_typing(&rx.recv().await.unwrap()));
        assert_eq!(tracker.active_count(), 1);

        tokio::time::sleep(DEFAULT_TYPING_EXPIRY + Duration::from_millis(10)).await;

        assert!(!is_typing(&rx.recv().await.unwrap()));
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_postpones_expiry() {
        let (registry, _store, tracker) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let target = Target::Direct(bob.clone());
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob, tx);

        tracker.update(&alice, &target, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        tracker.update(&alice, &target, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        // Two "typing" frames, no expiry yet.
        assert!(is_typing(&rx.recv().await.unwrap()));
        assert!(is_typing(&rx.recv().await.unwrap()));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!is_typing(&rx.recv().await.unwrap()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_cancels_expiry() {
        let (registry, _store, tracker) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let target = Target::Direct(bob.clone());
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob, tx);

        tracker.update(&alice, &target, true).await.unwrap();
        tracker.update(&alice, &target, false).await.unwrap();
        assert_eq!(tracker.active_count(), 0);

        tokio::time::sleep(DEFAULT_TYPING_EXPIRY * 2).await;

        assert!(is_typing(&rx.recv().await.unwrap()));
        assert!(!is_typing(&rx.recv().await.unwrap()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_group_typing_skips_sender() {
        let (registry, store, tracker) = setup().await;
        let alice = Identity::new("alice");
        let carol = Identity::new("carol");
        let group = GroupId::new("g1");
        store
            .add_group(group.clone(), vec![alice.clone(), carol.clone()])
            .await;

        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_c, mut rx_c) = mpsc::channel(16);
        registry.bind(alice.clone(), tx_a);
        registry.bind(carol, tx_c);

        tracker
            .update(&alice, &Target::Group(group.clone()), true)
            .await
            .unwrap();

        assert_eq!(
            rx_c.recv().await.unwrap(),
            ServerFrame::GroupTyping {
                group_id: group,
                from_user_id: alice,
                is_typing: true
            }
        );
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_sender_relays_stop() {
        let (registry, _store, tracker) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob.clone(), tx);

        tracker.update(&alice, &Target::Direct(bob), true).await.unwrap();
        tracker.clear_sender(&alice);

        assert!(is_typing(&rx.recv().await.unwrap()));
        assert!(!is_typing(&rx.recv().await.unwrap()));
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_typing_is_dropped() {
        let (registry, _store, tracker) = setup().await;
        let bob = Identity::new("bob");
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob.clone(), tx);

        tracker
            .update(&Identity::new("mallory"), &Target::Direct(bob), true)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.active_count(), 0);
    }
}
