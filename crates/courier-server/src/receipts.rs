//! Read-receipt reconciliation.
//!
//! Computes exactly which persisted messages transition from unseen to
//! seen for a viewer, persists the transition through the store's
//! conditional single-statement writes, and notifies whoever cares about
//! the delta.  A call that finds nothing to transition pushes nothing:
//! reconciliation fires on every conversation open and every incoming
//! message, so the wire payload must stay proportional to actual change.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use courier_shared::protocol::{GroupMessagesSeen, MessagesSeen};
use courier_shared::{GroupId, MessageId, ServerEvent, UserId};
use courier_store::Database;

use crate::delivery::DeliveryRouter;
use crate::error::ApiError;

/// Result of one reconciliation call, also the REST response body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub updated_count: usize,
    pub message_ids: Vec<MessageId>,
}

impl SeenReceipt {
    fn empty() -> Self {
        Self {
            updated_count: 0,
            message_ids: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ReceiptReconciler {
    db: Arc<Mutex<Database>>,
    router: DeliveryRouter,
}

impl ReceiptReconciler {
    pub fn new(db: Arc<Mutex<Database>>, router: DeliveryRouter) -> Self {
        Self { db, router }
    }

    /// Mark every unseen direct message from `other` to `viewer` as seen
    /// and notify `other` (the sender) if they are online.
    pub async fn reconcile_direct(
        &self,
        viewer: UserId,
        other: UserId,
    ) -> Result<SeenReceipt, ApiError> {
        let message_ids = {
            let db = self.db.lock().await;
            db.mark_direct_seen(viewer, other)?
        };

        if message_ids.is_empty() {
            return Ok(SeenReceipt::empty());
        }

        debug!(viewer = %viewer, sender = %other, count = message_ids.len(), "direct messages seen");

        self.router
            .push_direct(
                other,
                ServerEvent::MessagesSeen(MessagesSeen {
                    by_user_id: viewer,
                    message_ids: message_ids.clone(),
                }),
            )
            .await;

        Ok(SeenReceipt {
            updated_count: message_ids.len(),
            message_ids,
        })
    }

    /// Add `viewer` to the seen set of every group message they have not
    /// yet seen, then broadcast the delta to the whole group channel.
    /// Fails closed: callers who are not current members get `Forbidden`
    /// and no state changes.
    pub async fn reconcile_group(
        &self,
        viewer: UserId,
        group_id: GroupId,
    ) -> Result<SeenReceipt, ApiError> {
        let message_ids = {
            let db = self.db.lock().await;
            if !db.group_exists(group_id)? {
                return Err(ApiError::NotFound("Group not found".into()));
            }
            if !db.is_group_member(group_id, viewer)? {
                return Err(ApiError::Forbidden);
            }
            db.mark_group_seen(viewer, group_id)?
        };

        if message_ids.is_empty() {
            return Ok(SeenReceipt::empty());
        }

        debug!(viewer = %viewer, group = %group_id, count = message_ids.len(), "group messages seen");

        self.router
            .push_group(
                group_id,
                ServerEvent::GroupMessagesSeen(GroupMessagesSeen {
                    user_id: viewer,
                    message_ids: message_ids.clone(),
                    group_id,
                }),
            )
            .await;

        Ok(SeenReceipt {
            updated_count: message_ids.len(),
            message_ids,
        })
    }
}
