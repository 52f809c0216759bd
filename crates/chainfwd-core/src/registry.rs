//! Target channels learned from the bot's own membership changes.

use crate::{
    domain::{ChatId, UserId},
    messaging::types::{ChatKind, MemberStatus},
    store::{ConfigStore, TargetChannel},
    Result,
};

/// The bot's membership in `chat_id` changed because of `actor`.
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub chat_id: ChatId,
    pub chat_title: String,
    pub chat_kind: ChatKind,
    pub actor: UserId,
    pub new_status: MemberStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryUpdate {
    Registered,
    Removed,
    Unchanged,
}

/// Promotion to administrator registers the chat for the actor. Losing admin
/// rights (demoted, left, kicked) forgets it for every user, whoever made the
/// change. Private chats are never registered.
pub async fn apply_membership_change(
    store: &dyn ConfigStore,
    change: &MembershipChange,
) -> Result<RegistryUpdate> {
    if change.chat_kind == ChatKind::Private {
        return Ok(RegistryUpdate::Unchanged);
    }

    if change.new_status.is_admin() {
        let added = store
            .add_user_channel(
                change.actor,
                TargetChannel {
                    chat_id: change.chat_id,
                    title: change.chat_title.clone(),
                },
            )
            .await?;
        if added {
            tracing::info!(
                user_id = change.actor.0,
                chat_id = change.chat_id.0,
                "Registered target channel"
            );
            return Ok(RegistryUpdate::Registered);
        }
        return Ok(RegistryUpdate::Unchanged);
    }

    let removed = store.remove_channel_everywhere(change.chat_id).await?;
    if removed == 0 {
        return Ok(RegistryUpdate::Unchanged);
    }
    tracing::info!(
        chat_id = change.chat_id.0,
        status = %change.new_status,
        users = removed,
        "Removed target channel"
    );
    Ok(RegistryUpdate::Removed)
}
