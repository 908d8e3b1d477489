//! Server-side frame dispatch.
//!
//! The hub is what a connection handler calls for every frame received from
//! an authenticated client. Chat frames go to the fan-out router and typing
//! tracker; call frames are relayed verbatim to the named peer with the
//! sender's identity stamped on them. The server takes no part in the call
//! state machine.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{HubError, ProtocolError};
use crate::messages::{MessageRouter, NewMessage};
use crate::metrics;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::{ConnectionRegistry, Delivery};
use crate::store::ChatStore;
use crate::typing::TypingTracker;
use crate::types::{Identity, Target};

/// Routes client frames to the component that handles them.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    router: MessageRouter,
    typing: TypingTracker,
}

impl Hub {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn ChatStore>,
        typing_expiry: Duration,
    ) -> Self {
        Self {
            router: MessageRouter::new(Arc::clone(&registry), Arc::clone(&store)),
            typing: TypingTracker::new(Arc::clone(&registry), store, typing_expiry),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Handle one frame from `sender`.
    ///
    /// Failures are reported back to the sender as an `error` frame and
    /// never end the connection.
    #[instrument(name = "hub.handle", skip(self, frame), fields(sender = %sender, frame = frame.name()))]
    pub async fn handle(&self, sender: &Identity, frame: ClientFrame) {
        if let Err(e) = self.dispatch(sender, frame).await {
            debug!(error = %e, "Frame rejected");
            self.report(sender, &e);
        }
    }

    /// Release per-connection state once `identity` disconnects.
    pub fn connection_closed(&self, identity: &Identity) {
        self.typing.clear_sender(identity);
    }

    /// Send an `error` frame to `identity`.
    pub fn report(&self, identity: &Identity, error: &HubError) {
        let frame = ServerFrame::error(error.code(), error.to_string());
        if !self.registry.send(identity, frame).is_delivered() {
            debug!(identity = %identity, "Could not report error to sender");
        }
    }

    async fn dispatch(&self, sender: &Identity, frame: ClientFrame) -> Result<(), HubError> {
        match frame {
            ClientFrame::Auth { .. } => Err(ProtocolError::InvalidFrame(
                "connection is already authenticated".to_string(),
            )
            .into()),

            ClientFrame::SendMessage {
                to_user_id,
                group_id,
                content,
            } => {
                let target = ClientFrame::message_target(to_user_id, group_id)?;
                self.router
                    .deliver(NewMessage::new(sender.clone(), target, content))
                    .await?;
                Ok(())
            }

            ClientFrame::Typing {
                to_user_id,
                is_typing,
            } => {
                self.typing
                    .update(sender, &Target::Direct(to_user_id), is_typing)
                    .await?;
                Ok(())
            }

            ClientFrame::GroupTyping {
                group_id,
                is_typing,
            } => {
                self.typing
                    .update(sender, &Target::Group(group_id), is_typing)
                    .await?;
                Ok(())
            }

            ClientFrame::CallOffer {
                to_user_id,
                from_user_id,
                caller_name,
                is_video,
                offer,
            } => {
                if &from_user_id != sender {
                    warn!(claimed = %from_user_id, "Call offer claims a different caller");
                }
                self.relay(
                    &to_user_id,
                    ServerFrame::IncomingCall {
                        from_user_id: sender.clone(),
                        is_video,
                        offer,
                        caller_name,
                    },
                );
                Ok(())
            }

            ClientFrame::CallAnswer { to_user_id, answer } => {
                self.relay(
                    &to_user_id,
                    ServerFrame::CallAnswer {
                        from_user_id: sender.clone(),
                        answer,
                    },
                );
                Ok(())
            }

            ClientFrame::IceCandidate {
                to_user_id,
                candidate,
            } => {
                self.relay(
                    &to_user_id,
                    ServerFrame::IceCandidate {
                        from_user_id: sender.clone(),
                        candidate,
                    },
                );
                Ok(())
            }

            ClientFrame::CallEnd { to_user_id, reason } => {
                self.relay(
                    &to_user_id,
                    ServerFrame::CallEnded {
                        from_user_id: sender.clone(),
                        reason,
                    },
                );
                Ok(())
            }

            ClientFrame::MarkRead { message_id } => {
                self.router.mark_read(sender, &message_id).await?;
                Ok(())
            }
        }
    }

    // A miss is only logged; the other side's own timers handle it.
    fn relay(&self, recipient: &Identity, frame: ServerFrame) -> Delivery {
        let frame_type = frame.name();
        let result = self.registry.send(recipient, frame);
        metrics::record_relay(frame_type, result.is_delivered());
        if let Delivery::Unreachable(reason) = &result {
            debug!(recipient = %recipient, frame = frame_type, ?reason, "Signaling target unreachable");
        }
        result
    }
}
