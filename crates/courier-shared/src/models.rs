//! Persisted domain models.
//!
//! These structs are stored by `courier-store` and pushed verbatim over the
//! realtime channel, so every field serializes with the camelCase names the
//! clients expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A chat user. Provisioning (signup, password, tokens) is owned by the
/// external auth service; this is the profile the core needs for routing
/// and contact lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    /// Avatar URL, empty string when unset.
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, direct or group.
///
/// Invariants:
/// - exactly one of `receiver_id` / `group_id` is set
/// - at least one of `text` / `image_url` is set
/// - `seen` / `seen_at` are meaningful only for direct messages
/// - `seen_by` is meaningful only for group messages and only ever grows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
    pub seen_at: Option<DateTime<Utc>>,
    pub seen_by: Vec<UserId>,
}

impl Message {
    /// Build a new direct message addressed to `receiver_id`.
    pub fn direct(
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id: Some(receiver_id),
            group_id: None,
            text,
            image_url,
            created_at: Utc::now(),
            seen: false,
            seen_at: None,
            seen_by: Vec::new(),
        }
    }

    /// Build a new group message. The sender is auto-included in `seen_by`.
    pub fn group(
        sender_id: UserId,
        group_id: GroupId,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id: None,
            group_id: Some(group_id),
            text,
            image_url,
            created_at: Utc::now(),
            seen: false,
            seen_at: None,
            seen_by: vec![sender_id],
        }
    }

    /// Whether the message carries any content at all.
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
            || self.image_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named group chat. The creator is always a member and an admin;
/// membership is append-only in this core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub created_by: UserId,
    pub members: Vec<UserId>,
    pub admins: Vec<UserId>,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Build a new group. `members` is deduplicated and the creator is
    /// inserted as both member and admin regardless of the input.
    pub fn new(name: String, created_by: UserId, members: Vec<UserId>, avatar: String) -> Self {
        let mut unique = vec![created_by];
        for m in members {
            if !unique.contains(&m) {
                unique.push(m);
            }
        }

        Self {
            id: GroupId::new(),
            name,
            created_by,
            members: unique,
            admins: vec![created_by],
            avatar,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }
}
