use async_trait::async_trait;

use crate::{
    domain::{ChatId, ChatTarget, MessageId, MessageRef},
    messaging::types::{ChatInfo, InlineKeyboard, JoinTarget, MemberStatus},
    Result,
};

/// Outbound side of the chat transport.
///
/// The orchestrator only needs `forward` and `copy`; the rest backs the
/// setup wizard and the chat management commands.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Forward `message_id` from `from_chat` to `to`, returning the new copy.
    async fn forward(
        &self,
        to: &ChatTarget,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef>;

    /// Copy `message_id` from `from_chat` into `to` without a forward header.
    async fn copy(&self, to: ChatId, from_chat: ChatId, message_id: MessageId)
        -> Result<MessageId>;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()>;

    async fn get_chat(&self, target: &ChatTarget) -> Result<ChatInfo>;
    async fn join_chat(&self, target: &JoinTarget) -> Result<ChatInfo>;
    async fn leave_chat(&self, target: &ChatTarget) -> Result<()>;

    /// Membership status of the bot itself in `chat_id`.
    async fn my_status(&self, chat_id: ChatId) -> Result<MemberStatus>;
}
