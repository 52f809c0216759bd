//! Telegram update handlers.
//!
//! Each handler converts the teloxide update into a core type and hands it to
//! the orchestrator, the setup wizard or the command table. Failures are logged
//! and swallowed so the dispatcher never sees an error.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, ChatMemberUpdated, Message},
};

use chainfwd_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::{ChannelPost, ChatKind, ForwardedChat, PrivateMessage},
    security::is_authorized,
};

use crate::router::AppState;

mod callback;
mod commands;
mod membership;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_my_chat_member(
    upd: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    membership::handle_my_chat_member(upd, state).await
}

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(post) = channel_post(&msg) else {
        return Ok(());
    };
    let started = state.orchestrator.on_channel_message(&post).await;
    if !started.is_empty() {
        tracing::debug!(
            chat_id = post.chat_id.0,
            message_id = post.message_id.0,
            cycles = started.len(),
            "Channel post relayed"
        );
    }
    Ok(())
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let pm = private_message(&msg);

    // Converter replies come from bots, not owners, so they skip the owner check.
    if pm.reply_to.is_some() && state.orchestrator.on_private_reply(&pm).await.is_some() {
        return Ok(());
    }

    if !is_authorized(pm.user_id, &state.cfg.owner_ids) {
        if msg.from().is_some_and(|u| !u.is_bot) {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "Unauthorized. Contact the bot owner for access.",
                )
                .await;
        }
        return Ok(());
    }
    let Some(user_id) = pm.user_id else {
        return Ok(());
    };

    if state.wizard.handle_message(user_id, &pm).await {
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(user_id, pm.chat_id, text, state).await;
        }
    }

    Ok(())
}

pub(crate) fn chat_kind(chat: &teloxide::types::Chat) -> ChatKind {
    if chat.is_channel() {
        ChatKind::Channel
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else if chat.is_group() {
        ChatKind::Group
    } else {
        ChatKind::Private
    }
}

fn channel_post(msg: &Message) -> Option<ChannelPost> {
    if !msg.chat.is_channel() {
        return None;
    }
    Some(ChannelPost {
        chat_id: ChatId(msg.chat.id.0),
        chat_title: msg.chat.title().map(str::to_string),
        message_id: MessageId(msg.id.0),
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
    })
}

fn private_message(msg: &Message) -> PrivateMessage {
    PrivateMessage {
        chat_id: ChatId(msg.chat.id.0),
        chat_username: msg
            .chat
            .username()
            .or_else(|| msg.from().and_then(|u| u.username.as_deref()))
            .map(str::to_string),
        user_id: msg.from().map(|u| UserId(u.id.0 as i64)),
        message_id: MessageId(msg.id.0),
        text: msg.text().map(str::to_string),
        reply_to: msg.reply_to_message().map(|m| MessageId(m.id.0)),
        forwarded_from_chat: msg.forward_from_chat().map(|c| ForwardedChat {
            chat_id: ChatId(c.id.0),
            title: c.title().unwrap_or("Unknown").to_string(),
        }),
    }
}
