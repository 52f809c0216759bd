//! Telegram adapter (teloxide).
//!
//! This crate implements the `chainfwd-core` ChatTransport over the Telegram Bot API
//! and wires inbound updates to the orchestrator, wizard and command handlers.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        ChatMemberStatus, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, Recipient,
        UserId as TgUserId,
    },
};

use tokio::{sync::OnceCell, time::sleep};

pub mod handlers;
pub mod router;

use chainfwd_core::{
    domain::{ChatId, ChatTarget, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{ChatInfo, ChatKind, InlineKeyboard, JoinTarget, MemberStatus},
    },
    Result,
};

pub struct TelegramTransport {
    bot: Bot,
    me: OnceCell<TgUserId>,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            me: OnceCell::new(),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn recipient(target: &ChatTarget) -> Recipient {
        match target {
            ChatTarget::Id(id) => Recipient::Id(Self::tg_chat(*id)),
            ChatTarget::Username(name) => Recipient::ChannelUsername(format!("@{name}")),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::warn!("Telegram asked to retry after {d:?}");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    async fn me(&self) -> Result<TgUserId> {
        self.me
            .get_or_try_init(|| async {
                let me = self.with_retry(|| self.bot.get_me()).await?;
                Ok::<_, Error>(me.user.id)
            })
            .await
            .copied()
    }

    async fn chat_info(&self, target: &ChatTarget) -> Result<ChatInfo> {
        let recipient = Self::recipient(target);
        let chat = self
            .with_retry(|| self.bot.get_chat(recipient.clone()))
            .await?;

        let kind = handlers::chat_kind(&chat);

        let title = chat
            .title()
            .or_else(|| chat.first_name())
            .unwrap_or("Unknown")
            .to_string();

        let members_count = if kind == ChatKind::Private {
            None
        } else {
            // Best-effort; some chats hide their member count from bots.
            self.with_retry(|| self.bot.get_chat_member_count(chat.id))
                .await
                .ok()
        };

        Ok(ChatInfo {
            id: ChatId(chat.id.0),
            title,
            kind,
            username: chat.username().map(str::to_string),
            members_count,
            description: chat.description().map(str::to_string),
        })
    }
}

pub(crate) fn member_status(status: ChatMemberStatus) -> MemberStatus {
    match status {
        ChatMemberStatus::Owner => MemberStatus::Owner,
        ChatMemberStatus::Administrator => MemberStatus::Administrator,
        ChatMemberStatus::Member => MemberStatus::Member,
        ChatMemberStatus::Restricted => MemberStatus::Restricted,
        ChatMemberStatus::Left => MemberStatus::Left,
        ChatMemberStatus::Banned => MemberStatus::Banned,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn forward(
        &self,
        to: &ChatTarget,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef> {
        let to = Self::recipient(to);
        let msg = self
            .with_retry(|| {
                self.bot.forward_message(
                    to.clone(),
                    Self::tg_chat(from_chat),
                    Self::tg_msg_id(message_id),
                )
            })
            .await?;

        Ok(MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        })
    }

    async fn copy(
        &self,
        to: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageId> {
        let id = self
            .with_retry(|| {
                self.bot.copy_message(
                    Self::tg_chat(to),
                    Self::tg_chat(from_chat),
                    Self::tg_msg_id(message_id),
                )
            })
            .await?;
        Ok(MessageId(id.0))
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .buttons
            .into_iter()
            .map(|b| vec![InlineKeyboardButton::callback(b.label, b.callback_data)])
            .collect();
        let markup = InlineKeyboardMarkup::new(rows);

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        self.with_retry(|| {
            let mut req = self
                .bot
                .answer_callback_query(callback_id.to_string())
                .show_alert(show_alert);
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn get_chat(&self, target: &ChatTarget) -> Result<ChatInfo> {
        self.chat_info(target).await
    }

    async fn join_chat(&self, target: &JoinTarget) -> Result<ChatInfo> {
        // The Bot API has no join call: a bot enters a chat only when someone adds it.
        let target = match target {
            JoinTarget::InviteLink(_) => {
                return Err(Error::External(
                    "bots cannot join by invite link; add the bot to the chat instead".to_string(),
                ))
            }
            JoinTarget::Chat(t) => t,
        };

        let info = self.chat_info(target).await?;
        let status = self.my_status(info.id).await?;
        if !status.is_present() {
            return Err(Error::External(format!(
                "bot is not a member of {target}; add it to the chat first"
            )));
        }
        Ok(info)
    }

    async fn leave_chat(&self, target: &ChatTarget) -> Result<()> {
        let recipient = Self::recipient(target);
        self.with_retry(|| self.bot.leave_chat(recipient.clone()))
            .await?;
        Ok(())
    }

    async fn my_status(&self, chat_id: ChatId) -> Result<MemberStatus> {
        let me = self.me().await?;
        let member = self
            .with_retry(|| self.bot.get_chat_member(Self::tg_chat(chat_id), me))
            .await?;
        Ok(member_status(member.status()))
    }
}
