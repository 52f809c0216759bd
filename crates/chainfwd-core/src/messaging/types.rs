use std::fmt;

use crate::domain::{ChatId, ChatTarget, MessageId, UserId};

/// A post delivered from a broadcast channel.
#[derive(Clone, Debug)]
pub struct ChannelPost {
    pub chat_id: ChatId,
    pub chat_title: Option<String>,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub caption: Option<String>,
}

/// A message delivered in a private chat with the bot.
#[derive(Clone, Debug)]
pub struct PrivateMessage {
    pub chat_id: ChatId,
    /// Username of the private chat peer (the sender), without `@`.
    pub chat_username: Option<String>,
    pub user_id: Option<UserId>,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub reply_to: Option<MessageId>,
    pub forwarded_from_chat: Option<ForwardedChat>,
}

/// Origin chat of a forwarded message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardedChat {
    pub chat_id: ChatId,
    pub title: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        };
        f.write_str(s)
    }
}

/// Chat details as reported by the transport.
#[derive(Clone, Debug)]
pub struct ChatInfo {
    pub id: ChatId,
    pub title: String,
    pub kind: ChatKind,
    pub username: Option<String>,
    pub members_count: Option<u32>,
    pub description: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    pub fn is_admin(self) -> bool {
        matches!(self, MemberStatus::Owner | MemberStatus::Administrator)
    }

    pub fn is_present(self) -> bool {
        !matches!(self, MemberStatus::Left | MemberStatus::Banned)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberStatus::Owner => "owner",
            MemberStatus::Administrator => "administrator",
            MemberStatus::Member => "member",
            MemberStatus::Restricted => "restricted",
            MemberStatus::Left => "left",
            MemberStatus::Banned => "banned",
        };
        f.write_str(s)
    }
}

/// What `/join` was asked to join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinTarget {
    /// Private invite link (`https://t.me/+...` or `https://t.me/joinchat/...`).
    InviteLink(String),
    Chat(ChatTarget),
}

/// Inline keyboard (buttons) used by the setup wizard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    /// One button per row.
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}
