use std::sync::Arc;

use teloxide::{prelude::*, types::ChatMemberUpdated};

use chainfwd_core::{
    domain::{ChatId, UserId},
    registry::{apply_membership_change, MembershipChange},
};

use crate::router::AppState;

use super::chat_kind;

/// Keep the target-channel registry in sync with the bot's own membership.
pub async fn handle_my_chat_member(
    upd: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let change = MembershipChange {
        chat_id: ChatId(upd.chat.id.0),
        chat_title: upd.chat.title().unwrap_or("Unknown").to_string(),
        chat_kind: chat_kind(&upd.chat),
        actor: UserId(upd.from.id.0 as i64),
        new_status: crate::member_status(upd.new_chat_member.status()),
    };

    if let Err(e) = apply_membership_change(state.store.as_ref(), &change).await {
        tracing::error!(
            chat_id = change.chat_id.0,
            "Failed to update channel registry: {e}"
        );
    }
    Ok(())
}
