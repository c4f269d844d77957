use serde::{Deserialize, Serialize};

use crate::models::Message;
use crate::types::{GroupId, MessageId, UserId};

/// Events pushed from the server to connected clients.
///
/// Serialized as `{"event": "<name>", "data": <payload>}` JSON frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full presence snapshot, sent to every connection on each
    /// connect/disconnect.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),

    /// A direct message addressed to this connection's user.
    #[serde(rename = "newMessage")]
    NewMessage(Message),

    /// A message posted to a group this connection is subscribed to.
    #[serde(rename = "newGroupMessage")]
    NewGroupMessage(Message),

    /// Direct read-receipt delta, sent to the original sender only.
    #[serde(rename = "messagesSeen")]
    MessagesSeen(MessagesSeen),

    /// Group read-receipt delta, fanned out to the whole group channel.
    #[serde(rename = "groupMessagesSeen")]
    GroupMessagesSeen(GroupMessagesSeen),

    /// Ephemeral typing signal, relabeled with the typing user's id.
    /// Group receivers filter out their own id locally.
    #[serde(rename = "typing")]
    Typing(TypingNotice),

    #[serde(rename = "stopTyping")]
    StopTyping(TypingNotice),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesSeen {
    pub by_user_id: UserId,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessagesSeen {
    pub user_id: UserId,
    pub message_ids: Vec<MessageId>,
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: UserId,
}

/// Events a client sends to the server over the realtime channel.
///
/// Only typing signals travel this way; everything else goes through the
/// REST surface so it can be validated and persisted before any push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "typing")]
    Typing(DirectTypingTarget),

    #[serde(rename = "stopTyping")]
    StopTyping(DirectTypingTarget),

    #[serde(rename = "group:typing")]
    GroupTyping(GroupTypingTarget),

    #[serde(rename = "group:stopTyping")]
    GroupStopTyping(GroupTypingTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectTypingTarget {
    pub to_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupTypingTarget {
    pub group_id: GroupId,
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientEvent {
    /// Parse a JSON text frame received from a client.
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_users_wire_shape() {
        let user = UserId::new();
        let json = ServerEvent::OnlineUsers(vec![user]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "getOnlineUsers");
        assert_eq!(value["data"][0], user.to_string());
    }

    #[test]
    fn messages_seen_uses_camel_case_fields() {
        let event = ServerEvent::MessagesSeen(MessagesSeen {
            by_user_id: UserId::new(),
            message_ids: vec![MessageId::new()],
        });
        let value: serde_json::Value =
            serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], "messagesSeen");
        assert!(value["data"]["byUserId"].is_string());
        assert!(value["data"]["messageIds"].is_array());
    }

    #[test]
    fn group_seen_carries_group_id() {
        let group_id = GroupId::new();
        let event = ServerEvent::GroupMessagesSeen(GroupMessagesSeen {
            user_id: UserId::new(),
            message_ids: vec![],
            group_id,
        });
        let value: serde_json::Value =
            serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], "groupMessagesSeen");
        assert_eq!(value["data"]["groupId"], group_id.to_string());
    }

    #[test]
    fn client_typing_roundtrip() {
        let to = UserId::new();
        let frame = format!(
            r#"{{"event":"typing","data":{{"toUserId":"{to}"}}}}"#
        );
        let parsed = ClientEvent::from_json(&frame).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::Typing(DirectTypingTarget { to_user_id: to })
        );
    }

    #[test]
    fn group_typing_event_names() {
        let group_id = GroupId::new();
        let json = serde_json::to_string(&ClientEvent::GroupStopTyping(GroupTypingTarget {
            group_id,
        }))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "group:stopTyping");
    }

    #[test]
    fn new_message_roundtrip() {
        let msg = Message::direct(UserId::new(), UserId::new(), Some("hi".into()), None);
        let json = ServerEvent::NewMessage(msg.clone()).to_json().unwrap();
        let restored: ServerEvent = serde_json::from_str(&json).unwrap();

        match restored {
            ServerEvent::NewMessage(m) => {
                assert_eq!(m.id, msg.id);
                assert!(!m.seen);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
