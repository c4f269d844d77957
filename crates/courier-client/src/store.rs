//! Local reconciliation store.
//!
//! Holds the state of the one conversation the user currently has open
//! and folds realtime events into it.  At most one conversation is active
//! at a time; selecting another clears messages and typing state, and the
//! caller re-subscribes by fetching history through the REST surface.
//!
//! Sends are optimistic: a placeholder appears immediately with
//! [`Delivery::Pending`], is swapped for the server's copy on success, and
//! is marked [`Delivery::Failed`] on error so the user can retry or
//! discard it.  Events for conversations other than the open one are
//! ignored here; unread tracking across conversations is the UI's concern.

use std::collections::HashSet;

use tracing::trace;

use courier_shared::protocol::{GroupMessagesSeen, MessagesSeen, TypingNotice};
use courier_shared::{GroupId, Message, MessageId, ServerEvent, UserId};

/// Which conversation is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversation {
    Direct(UserId),
    Group(GroupId),
}

/// Delivery state of a locally known message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic placeholder, not yet acknowledged by the server.
    Pending,
    /// Persisted server-side (fetched, pushed, or send-acknowledged).
    Confirmed,
    /// The send failed; the placeholder stays visible until retried or
    /// discarded.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    pub message: Message,
    pub delivery: Delivery,
}

pub struct ChatStore {
    me: UserId,
    selected: Option<Conversation>,
    messages: Vec<LocalMessage>,
    online: HashSet<UserId>,
    /// Direct conversations: whether the partner is currently typing.
    partner_typing: bool,
    /// Group conversations: which members are currently typing.
    group_typers: HashSet<UserId>,
}

impl ChatStore {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            selected: None,
            messages: Vec::new(),
            online: HashSet::new(),
            partner_typing: false,
            group_typers: HashSet::new(),
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn selected(&self) -> Option<Conversation> {
        self.selected
    }

    pub fn messages(&self) -> &[LocalMessage] {
        &self.messages
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    pub fn online_users(&self) -> &HashSet<UserId> {
        &self.online
    }

    pub fn is_partner_typing(&self) -> bool {
        self.partner_typing
    }

    pub fn group_typers(&self) -> &HashSet<UserId> {
        &self.group_typers
    }

    // -- conversation selection -------------------------------------------

    /// Open a direct conversation, dropping the previous conversation's
    /// messages and typing state.
    pub fn select_direct(&mut self, partner: UserId) {
        self.select(Conversation::Direct(partner));
    }

    /// Open a group conversation.
    pub fn select_group(&mut self, group: GroupId) {
        self.select(Conversation::Group(group));
    }

    /// Close whatever conversation is open.
    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.messages.clear();
        self.reset_typing();
    }

    fn select(&mut self, conversation: Conversation) {
        if self.selected == Some(conversation) {
            return;
        }
        self.selected = Some(conversation);
        self.messages.clear();
        self.reset_typing();
    }

    /// Replace the message list with freshly fetched history.
    pub fn load_history(&mut self, history: Vec<Message>) {
        self.messages = history
            .into_iter()
            .map(|message| LocalMessage {
                message,
                delivery: Delivery::Confirmed,
            })
            .collect();
    }

    // -- optimistic sends --------------------------------------------------

    /// Append an optimistic placeholder for a message being sent to the
    /// open conversation.  Returns its local id for the later
    /// [`confirm_send`](Self::confirm_send) / [`fail_send`](Self::fail_send).
    /// Returns `None` when no conversation is open.
    pub fn begin_send(&mut self, text: Option<String>, image_url: Option<String>) -> Option<MessageId> {
        let placeholder = match self.selected? {
            Conversation::Direct(partner) => Message::direct(self.me, partner, text, image_url),
            Conversation::Group(group) => Message::group(self.me, group, text, image_url),
        };

        let id = placeholder.id;
        self.messages.push(LocalMessage {
            message: placeholder,
            delivery: Delivery::Pending,
        });
        Some(id)
    }

    /// Swap a pending placeholder for the server's persisted copy.
    pub fn confirm_send(&mut self, local_id: MessageId, confirmed: Message) {
        if let Some(local) = self.find_mut(local_id) {
            local.message = confirmed;
            local.delivery = Delivery::Confirmed;
        }
    }

    /// Mark a pending placeholder as failed.
    pub fn fail_send(&mut self, local_id: MessageId) {
        if let Some(local) = self.find_mut(local_id) {
            local.delivery = Delivery::Failed;
        }
    }

    /// Drop a failed placeholder (the user discarded it).
    pub fn discard_failed(&mut self, local_id: MessageId) {
        self.messages
            .retain(|m| m.message.id != local_id || m.delivery != Delivery::Failed);
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut LocalMessage> {
        self.messages.iter_mut().find(|m| m.message.id == id)
    }

    // -- realtime reconciliation ------------------------------------------

    /// Fold one realtime event into local state.  Returns `true` when a
    /// new message was appended to the open conversation, which is the
    /// caller's cue to mark it seen through the REST surface.
    pub fn handle_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::OnlineUsers(users) => {
                self.apply_presence(users);
                false
            }
            ServerEvent::NewMessage(message) => self.apply_direct_message(message),
            ServerEvent::NewGroupMessage(message) => self.apply_group_message(message),
            ServerEvent::MessagesSeen(seen) => {
                self.apply_direct_seen(seen);
                false
            }
            ServerEvent::GroupMessagesSeen(seen) => {
                self.apply_group_seen(seen);
                false
            }
            ServerEvent::Typing(notice) => {
                self.apply_typing(notice, true);
                false
            }
            ServerEvent::StopTyping(notice) => {
                self.apply_typing(notice, false);
                false
            }
        }
    }

    /// Replace the online set.  Typing indicators for users who dropped
    /// out of the snapshot are cleared: the server sends no stop signal on
    /// disconnect.
    fn apply_presence(&mut self, users: Vec<UserId>) {
        self.online = users.into_iter().collect();

        if self.partner_typing {
            if let Some(Conversation::Direct(partner)) = self.selected {
                if !self.online.contains(&partner) {
                    self.partner_typing = false;
                }
            }
        }
        let online = &self.online;
        self.group_typers.retain(|typer| online.contains(typer));
    }

    fn apply_direct_message(&mut self, message: Message) -> bool {
        let Some(Conversation::Direct(partner)) = self.selected else {
            trace!("direct message outside the open conversation, ignored");
            return false;
        };
        if message.sender_id != partner {
            return false;
        }

        // An incoming message supersedes the partner's typing indicator.
        self.partner_typing = false;
        self.messages.push(LocalMessage {
            message,
            delivery: Delivery::Confirmed,
        });
        true
    }

    fn apply_group_message(&mut self, message: Message) -> bool {
        let Some(Conversation::Group(group)) = self.selected else {
            return false;
        };
        if message.group_id != Some(group) {
            return false;
        }

        // Room fan-out echoes our own sends back; reconcile them against
        // the optimistic placeholder instead of duplicating.
        if let Some(local) = self.find_mut(message.id) {
            local.message = message;
            local.delivery = Delivery::Confirmed;
            return false;
        }
        if message.sender_id == self.me {
            return false;
        }

        self.group_typers.remove(&message.sender_id);
        self.messages.push(LocalMessage {
            message,
            delivery: Delivery::Confirmed,
        });
        true
    }

    /// The partner read our messages: flip the seen flag on the ids named
    /// by the delta.
    fn apply_direct_seen(&mut self, seen: MessagesSeen) {
        let Some(Conversation::Direct(partner)) = self.selected else {
            return;
        };
        if seen.by_user_id != partner {
            return;
        }

        for local in &mut self.messages {
            if seen.message_ids.contains(&local.message.id) {
                local.message.seen = true;
            }
        }
    }

    /// A member read group messages: union their id into each named
    /// message's seen set.
    fn apply_group_seen(&mut self, seen: GroupMessagesSeen) {
        let Some(Conversation::Group(group)) = self.selected else {
            return;
        };
        if seen.group_id != group {
            return;
        }

        for local in &mut self.messages {
            if seen.message_ids.contains(&local.message.id)
                && !local.message.seen_by.contains(&seen.user_id)
            {
                local.message.seen_by.push(seen.user_id);
            }
        }
    }

    fn apply_typing(&mut self, notice: TypingNotice, started: bool) {
        if notice.user_id == self.me {
            return;
        }
        match self.selected {
            Some(Conversation::Direct(partner)) if notice.user_id == partner => {
                self.partner_typing = started;
            }
            Some(Conversation::Group(_)) => {
                if started {
                    self.group_typers.insert(notice.user_id);
                } else {
                    self.group_typers.remove(&notice.user_id);
                }
            }
            _ => {}
        }
    }

    fn reset_typing(&mut self) {
        self.partner_typing = false;
        self.group_typers.clear();
    }
}
