//! Message fan-out router.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::types::{Message, NewMessage};
use crate::error::ChatError;
use crate::metrics;
use crate::protocol::ServerFrame;
use crate::registry::{ConnectionRegistry, Delivery};
use crate::store::ChatStore;
use crate::types::{Identity, Target};

/// Outcome of a fan-out.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// The persisted message
    pub message: Message,
    /// Targets whose connection accepted the frame
    pub delivered: Vec<Identity>,
    /// Targets that were skipped (no connection, full or closed queue)
    pub unreachable: Vec<Identity>,
}

/// Delivers chat events to every reachable party.
///
/// Group fan-out includes the sender itself, so a sender's other views see
/// their own message arrive the same way everyone else does.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    /// Authorize, persist, then push a message to all reachable targets.
    ///
    /// An authorization failure returns before anything is persisted or
    /// sent.
    #[instrument(
        name = "chat.message.deliver",
        skip(self, draft),
        fields(sender = %draft.sender_id, target = %draft.target)
    )]
    pub async fn deliver(&self, draft: NewMessage) -> Result<DeliveryReport, ChatError> {
        draft.validate()?;

        let authorized = self
            .store
            .is_authorized_to_message(&draft.sender_id, &draft.target)
            .await?;
        if !authorized {
            warn!("Message rejected by authorization");
            return Err(ChatError::Unauthorized {
                sender: draft.sender_id,
                target: draft.target,
            });
        }

        let message = self.store.persist_message(draft).await?;
        metrics::messages_accepted().add(1, &[]);

        let targets = self.resolve_targets(&message.target).await?;
        let sender_username = self.sender_username(&message.sender_id).await;

        let frame = ServerFrame::NewMessage {
            message: message.clone(),
            sender_id: message.sender_id.clone(),
            sender_username,
            group_id: message.target.group_id().cloned(),
            content: message.content.clone(),
        };

        let mut delivered = Vec::new();
        let mut unreachable = Vec::new();
        for (target, result) in self.registry.send_to_many(&targets, &frame) {
            match result {
                Delivery::Delivered => delivered.push(target),
                Delivery::Unreachable(reason) => {
                    debug!(target = %target, ?reason, "Skipping unreachable target");
                    unreachable.push(target);
                }
            }
        }

        metrics::messages_delivered().add(delivered.len() as u64, &[]);

        if delivered.iter().any(|t| t != &message.sender_id) {
            if let Err(e) = self.store.mark_delivered(&message.id).await {
                warn!(message_id = %message.id, error = %e, "Failed to mark message delivered");
            }
        }

        info!(
            message_id = %message.id,
            delivered = delivered.len(),
            unreachable = unreachable.len(),
            "Message fanned out"
        );

        Ok(DeliveryReport {
            message,
            delivered,
            unreachable,
        })
    }

    /// Record a read receipt and notify the original sender if reachable.
    #[instrument(name = "chat.message.read", skip(self), fields(reader = %reader))]
    pub async fn mark_read(&self, reader: &Identity, message_id: &str) -> Result<(), ChatError> {
        let Some(message) = self.store.mark_read(message_id, reader).await? else {
            debug!(message_id, "Read receipt for unknown message");
            return Ok(());
        };

        if &message.sender_id == reader {
            return Ok(());
        }

        let frame = ServerFrame::MessageRead {
            message_id: message.id.clone(),
            reader_id: reader.clone(),
        };
        let result = self.registry.send(&message.sender_id, frame);
        metrics::record_relay("message-read", result.is_delivered());
        Ok(())
    }

    /// Tell `blocked` that `blocker` blocked them. Best effort.
    pub fn notify_blocked(&self, blocker: &Identity, blocked: &Identity) -> Delivery {
        self.registry.send(
            blocked,
            ServerFrame::UserBlocked {
                blocked_by: blocker.clone(),
            },
        )
    }

    /// Tell `unblocked` that `blocker` lifted the block. Best effort.
    pub fn notify_unblocked(&self, blocker: &Identity, unblocked: &Identity) -> Delivery {
        self.registry.send(
            unblocked,
            ServerFrame::UserUnblocked {
                unblocked_by: blocker.clone(),
            },
        )
    }

    async fn resolve_targets(&self, target: &Target) -> Result<Vec<Identity>, ChatError> {
        match target {
            Target::Direct(recipient) => Ok(vec![recipient.clone()]),
            Target::Group(group) => Ok(self.store.resolve_group_members(group).await?),
        }
    }

    async fn sender_username(&self, sender: &Identity) -> String {
        match self.store.display_name(sender).await {
            Ok(Some(name)) => name,
            Ok(None) => sender.to_string(),
            Err(e) => {
                warn!(sender = %sender, error = %e, "Failed to look up display name");
                sender.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::GroupId;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<ConnectionRegistry>, Arc<MemoryStore>, MessageRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let router = MessageRouter::new(registry.clone(), store.clone());
        (registry, store, router)
    }

    #[tokio::test]
    async fn test_direct_message_to_connected_friend() {
        let (registry, store, router) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        store.add_friendship(&alice, &bob).await;
        store.set_display_name(&alice, "Alice").await;

        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob.clone(), tx);

        let report = router
            .deliver(NewMessage::new(alice.clone(), Target::Direct(bob.clone()), "hello"))
            .await
            .unwrap();

        assert_eq!(report.delivered, vec![bob.clone()]);
        assert!(report.unreachable.is_empty());

        match rx.recv().await.unwrap() {
            ServerFrame::NewMessage {
                sender_id,
                sender_username,
                group_id,
                content,
                ..
            } => {
                assert_eq!(sender_id, alice);
                assert_eq!(sender_username, "Alice");
                assert_eq!(group_id, None);
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let stored = store.message(&report.message.id).await.unwrap();
        assert!(stored.flags.delivered);
    }

    #[tokio::test]
    async fn test_offline_recipient_still_persisted() {
        let (_registry, store, router) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        store.add_friendship(&alice, &bob).await;

        let report = router
            .deliver(NewMessage::new(alice.clone(), Target::Direct(bob.clone()), "you there?"))
            .await
            .unwrap();

        assert!(report.delivered.is_empty());
        assert_eq!(report.unreachable, vec![bob.clone()]);

        let history = store.history(&bob, &Target::Direct(alice)).await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].flags.delivered);
    }

    #[tokio::test]
    async fn test_unauthorized_has_no_side_effects() {
        let (registry, store, router) = setup().await;
        let mallory = Identity::new("mallory");
        let bob = Identity::new("bob");
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob.clone(), tx);

        let result = router
            .deliver(NewMessage::new(mallory.clone(), Target::Direct(bob.clone()), "spam"))
            .await;

        assert!(matches!(result, Err(ChatError::Unauthorized { .. })));
        assert!(store.history(&bob, &Target::Direct(mallory)).await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_group_fanout_includes_sender() {
        let (registry, store, router) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let group = GroupId::new("g1");
        store
            .add_group(group.clone(), vec![alice.clone(), bob.clone()])
            .await;

        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        registry.bind(alice.clone(), tx_a);
        registry.bind(bob.clone(), tx_b);

        let report = router
            .deliver(NewMessage::new(alice.clone(), Target::Group(group.clone()), "hi all"))
            .await
            .unwrap();

        assert_eq!(report.delivered.len(), 2);
        assert!(matches!(
            rx_a.recv().await,
            Some(ServerFrame::NewMessage { group_id: Some(ref g), .. }) if g == &group
        ));
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_read_receipt_notifies_sender() {
        let (registry, store, router) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        store.add_friendship(&alice, &bob).await;

        let report = router
            .deliver(NewMessage::new(alice.clone(), Target::Direct(bob.clone()), "read me"))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(alice.clone(), tx);

        router.mark_read(&bob, &report.message.id).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ServerFrame::MessageRead {
                message_id: report.message.id.clone(),
                reader_id: bob,
            }
        );
        assert!(store.message(&report.message.id).await.unwrap().flags.read);
    }

    #[tokio::test]
    async fn test_block_notifications() {
        let (registry, _store, router) = setup().await;
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let (tx, mut rx) = mpsc::channel(16);
        registry.bind(bob.clone(), tx);

        assert!(router.notify_blocked(&alice, &bob).is_delivered());
        assert!(router.notify_unblocked(&alice, &bob).is_delivered());
        assert!(!router.notify_blocked(&bob, &alice).is_delivered());

        assert_eq!(
            rx.recv().await.unwrap(),
            ServerFrame::UserBlocked {
                blocked_by: alice.clone()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerFrame::UserUnblocked {
                unblocked_by: alice
            }
        );
    }
}
