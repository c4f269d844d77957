//! Ephemeral typing-state relay.
//!
//! No state is retained server-side: signals are forwarded to the target's
//! live handle (direct) or the group channel (group), relabeled with the
//! sender's id, and silently dropped when the target is offline.  Clients
//! are responsible for emitting the matching stop signal.

use courier_shared::protocol::TypingNotice;
use courier_shared::{ClientEvent, ServerEvent, UserId};

use crate::delivery::DeliveryRouter;

/// Forward one client-sent typing event to its recipients.
pub async fn relay(router: &DeliveryRouter, from: UserId, event: ClientEvent) {
    let notice = TypingNotice { user_id: from };

    match event {
        ClientEvent::Typing(target) => {
            router
                .push_direct(target.to_user_id, ServerEvent::Typing(notice))
                .await;
        }
        ClientEvent::StopTyping(target) => {
            router
                .push_direct(target.to_user_id, ServerEvent::StopTyping(notice))
                .await;
        }
        ClientEvent::GroupTyping(target) => {
            router
                .push_group(target.group_id, ServerEvent::Typing(notice))
                .await;
        }
        ClientEvent::GroupStopTyping(target) => {
            router
                .push_group(target.group_id, ServerEvent::StopTyping(notice))
                .await;
        }
    }
}
