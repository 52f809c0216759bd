use std::sync::Arc;

use teloxide::prelude::*;

use chainfwd_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    security::is_authorized,
    wizard::parse_callback,
};

use crate::router::AppState;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user_id = UserId(q.from.id.0 as i64);
    let data = q.data.clone().unwrap_or_default();

    if !is_authorized(Some(user_id), &state.cfg.owner_ids) {
        let _ = bot
            .answer_callback_query(cb_id)
            .text("Unauthorized".to_string())
            .await;
        return Ok(());
    }

    // Always answer callback query eventually.
    let Some(action) = parse_callback(&data) else {
        let _ = bot.answer_callback_query(cb_id).await;
        return Ok(());
    };

    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });

    state
        .wizard
        .handle_callback(user_id, &cb_id, action, message)
        .await;
    Ok(())
}
