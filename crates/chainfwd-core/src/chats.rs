//! `/join`, `/leave`, `/mychats` and `/chatinfo`.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::{
    domain::{ChatId, ChatTarget, UserId},
    formatting::{escape_html, split_text_chunks},
    messaging::{
        port::ChatTransport,
        types::{ChatInfo, ChatKind, JoinTarget},
    },
    store::ConfigStore,
};

const JOIN_USAGE: &str = "<b>Usage:</b> <code>/join https://t.me/+invite_link</code>\n\
<b>Or:</b> <code>/join @channel_username</code>";
const LEAVE_USAGE: &str = "<b>Usage:</b> <code>/leave @channel_username</code>\n\
<b>Or:</b> <code>/leave channel_id</code>";
const CHATINFO_USAGE: &str = "<b>Usage:</b> <code>/chatinfo @channel_username</code>\n\
<b>Or:</b> <code>/chatinfo channel_id</code>";

const DESCRIPTION_PREVIEW_CHARS: usize = 100;

const TME_LINK_PATTERN: &str =
    r"^(?:https?://)?(?:t\.me|telegram\.me)/(\+[\w-]+|joinchat/[\w-]+|[A-Za-z0-9_]+)";

fn tme_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(TME_LINK_PATTERN).expect("valid regex")
    })
}

/// Interpret a `/join` argument: invite link, public link, `@name` or bare name/id.
pub fn parse_join_target(arg: &str) -> Option<JoinTarget> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }
    if let Some(caps) = tme_link().captures(arg) {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if path.starts_with('+') || path.starts_with("joinchat/") {
            return Some(JoinTarget::InviteLink(arg.to_string()));
        }
        return Some(JoinTarget::Chat(ChatTarget::username(path)));
    }
    parse_chat_target(arg).map(JoinTarget::Chat)
}

/// Interpret a chat argument: numeric id, `@name`, bare name or public `t.me` link.
pub fn parse_chat_target(arg: &str) -> Option<ChatTarget> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }
    if let Ok(id) = arg.parse::<i64>() {
        return Some(ChatTarget::Id(ChatId(id)));
    }
    if let Some(caps) = tme_link().captures(arg) {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if path.starts_with('+') || path.starts_with("joinchat/") {
            return None;
        }
        return Some(ChatTarget::username(path));
    }
    let name = arg.trim_start_matches('@');
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some(ChatTarget::username(name))
}

fn members_label(info: &ChatInfo) -> String {
    info.members_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn username_label(username: Option<&str>) -> String {
    format!("@{}", escape_html(username.unwrap_or("None")))
}

pub struct ChatManager {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn ConfigStore>,
    safe_limit: usize,
}

impl ChatManager {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn ConfigStore>,
        safe_limit: usize,
    ) -> Self {
        Self {
            transport,
            store,
            safe_limit,
        }
    }

    pub async fn join(&self, arg: &str) -> String {
        let Some(target) = parse_join_target(arg) else {
            return JOIN_USAGE.to_string();
        };

        match self.transport.join_chat(&target).await {
            Ok(info) => format!(
                "✅ <b>Successfully joined!</b>\n\n\
<b>Chat:</b> {}\n\
<b>Type:</b> {}\n\
<b>Members:</b> {}",
                escape_html(&info.title),
                info.kind,
                members_label(&info)
            ),
            Err(e) => format!(
                "❌ <b>Error joining chat:</b> <code>{}</code>",
                escape_html(&e.to_string())
            ),
        }
    }

    pub async fn leave(&self, user_id: UserId, arg: &str) -> String {
        let Some(target) = parse_chat_target(arg) else {
            return LEAVE_USAGE.to_string();
        };

        let result = async {
            let info = self.transport.get_chat(&target).await?;
            self.transport.leave_chat(&target).await?;
            Ok::<_, crate::Error>(info)
        }
        .await;

        match result {
            Ok(info) => {
                if let Err(e) = self.store.remove_user_channel(user_id, info.id).await {
                    tracing::warn!(chat_id = info.id.0, "Failed to forget left channel: {e}");
                }
                tracing::info!(chat_id = info.id.0, "Left chat");
                format!(
                    "✅ <b>Successfully left!</b>\n\n<b>Chat:</b> {}\n<b>Type:</b> {}",
                    escape_html(&info.title),
                    info.kind
                )
            }
            Err(e) => format!(
                "❌ <b>Error leaving chat:</b> <code>{}</code>",
                escape_html(&e.to_string())
            ),
        }
    }

    /// Channels the bot administers on behalf of `user_id`, split for sending.
    pub async fn my_chats(&self, user_id: UserId) -> Vec<String> {
        let channels = match self.store.get_user_channels(user_id).await {
            Ok(v) => v,
            Err(e) => {
                return vec![format!(
                    "❌ <b>Error getting chats:</b> <code>{}</code>",
                    escape_html(&e.to_string())
                )]
            }
        };
        if channels.is_empty() {
            return vec!["No chats yet. Add this bot as an administrator to a channel.".to_string()];
        }

        let mut text = String::from("<b>📋 Your Chats:</b>\n\n");
        for channel in channels {
            let (title, kind, username) =
                match self.transport.get_chat(&ChatTarget::Id(channel.chat_id)).await {
                    Ok(info) => (info.title, info.kind, info.username),
                    Err(e) => {
                        tracing::debug!(chat_id = channel.chat_id.0, "get_chat failed: {e}");
                        (channel.title, ChatKind::Channel, None)
                    }
                };
            let icon = if kind == ChatKind::Channel { "📢" } else { "👥" };
            text.push_str(&format!(
                "{icon} <b>{}</b>\n   └ ID: <code>{}</code>\n   └ Username: {}\n\n",
                escape_html(&title),
                channel.chat_id.0,
                username_label(username.as_deref())
            ));
        }

        split_text_chunks(&text, self.safe_limit)
    }

    pub async fn chat_info(&self, arg: &str) -> String {
        let Some(target) = parse_chat_target(arg) else {
            return CHATINFO_USAGE.to_string();
        };

        let info = match self.transport.get_chat(&target).await {
            Ok(v) => v,
            Err(e) => {
                return format!(
                    "❌ <b>Error getting chat info:</b> <code>{}</code>",
                    escape_html(&e.to_string())
                )
            }
        };

        let mut out = String::from("<b>📋 Chat Information:</b>\n\n");
        out.push_str(&format!("<b>Name:</b> {}\n", escape_html(&info.title)));
        out.push_str(&format!("<b>ID:</b> <code>{}</code>\n", info.id.0));
        out.push_str(&format!("<b>Type:</b> {}\n", info.kind));
        out.push_str(&format!(
            "<b>Username:</b> {}\n",
            username_label(info.username.as_deref())
        ));
        if let Some(n) = info.members_count {
            out.push_str(&format!("<b>Members:</b> {n}\n"));
        }
        if let Some(desc) = info.description.as_deref().filter(|d| !d.is_empty()) {
            let preview: String = desc.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            out.push_str(&format!("<b>Description:</b> {}...\n", escape_html(&preview)));
        }
        let status = match self.transport.my_status(info.id).await {
            Ok(s) => s.to_string(),
            Err(_) => "member".to_string(),
        };
        out.push_str(&format!("<b>Your Status:</b> {status}\n"));
        out
    }
}
