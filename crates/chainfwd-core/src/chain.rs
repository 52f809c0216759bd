//! Chain forward orchestration.
//!
//! A relay cycle forwards a qualifying source-channel post to the converter bot,
//! waits for the bot to reply to that forwarded copy and republishes the reply
//! into the target channel. In-flight cycles live in an in-memory operation
//! table; each one ends either FINALIZED (reply republished) or EXPIRED (no
//! reply within the timeout). Both terminal paths delete from the table, and
//! whichever deletes first wins.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatId, ChatTarget, MessageId, MessageRef, UserId},
    links::is_convertible,
    messaging::{
        port::ChatTransport,
        types::{ChannelPost, PrivateMessage},
    },
    store::{ChainConfig, ConfigStore},
    Result,
};

/// Identity of one relay cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub user_id: UserId,
    pub original_message_id: MessageId,
    pub forwarded_message_id: MessageId,
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.user_id.0, self.original_message_id.0, self.forwarded_message_id.0
        )
    }
}

/// An in-flight relay cycle.
pub struct ChainOperation {
    pub transport: Arc<dyn ChatTransport>,
    pub original: MessageRef,
    pub target_chat_id: ChatId,
    pub converter_handle: String,
    pub forwarded_message_id: MessageId,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    /// Set while a matched reply is being copied out.
    claimed: bool,
    /// The timeout fired while claimed; a failed copy then ends the cycle.
    deadline_passed: bool,
}

#[derive(Default)]
struct OperationTable {
    ops: HashMap<OperationKey, ChainOperation>,
    /// (user, original post) pairs whose forward is still in progress.
    relaying: HashSet<(UserId, MessageRef)>,
}

impl OperationTable {
    fn is_tracked(&self, user_id: UserId, original: MessageRef) -> bool {
        self.relaying.contains(&(user_id, original))
            || self
                .ops
                .values()
                .any(|op| op.user_id == user_id && op.original == original)
    }
}

/// Result of `/chainon` and `/chainoff`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Changed,
    AlreadySet,
    NotConfigured,
}

pub struct ChainOrchestrator {
    store: Arc<dyn ConfigStore>,
    transport: Arc<dyn ChatTransport>,
    timeout: Duration,
    table: Mutex<OperationTable>,
    shutdown: CancellationToken,
}

impl ChainOrchestrator {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn ChatTransport>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            timeout,
            table: Mutex::new(OperationTable::default()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Inspect a source-channel post and start a relay cycle for every active
    /// config watching that channel. Never fails; problems are logged.
    pub async fn on_channel_message(self: &Arc<Self>, post: &ChannelPost) -> Vec<OperationKey> {
        let configs = match self.store.active_configs_for_source(post.chat_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(chat_id = post.chat_id.0, "Failed to load chain configs: {e}");
                return Vec::new();
            }
        };
        if configs.is_empty() {
            return Vec::new();
        }

        if !is_convertible(post.text.as_deref(), post.caption.as_deref()) {
            tracing::debug!(
                chat_id = post.chat_id.0,
                message_id = post.message_id.0,
                "Post has no convertible links"
            );
            return Vec::new();
        }

        let mut started = Vec::new();
        for config in configs {
            match self.start_cycle(post, &config).await {
                Ok(Some(key)) => started.push(key),
                Ok(None) => {}
                Err(e) => tracing::error!(
                    user_id = config.user_id.0,
                    converter = %config.converter_handle,
                    "Failed to forward post to converter: {e}"
                ),
            }
        }
        started
    }

    async fn start_cycle(
        self: &Arc<Self>,
        post: &ChannelPost,
        config: &ChainConfig,
    ) -> Result<Option<OperationKey>> {
        let original = MessageRef {
            chat_id: post.chat_id,
            message_id: post.message_id,
        };

        {
            let mut table = self.table.lock().await;
            if table.is_tracked(config.user_id, original) {
                tracing::debug!(
                    user_id = config.user_id.0,
                    message_id = post.message_id.0,
                    "Duplicate post delivery ignored"
                );
                return Ok(None);
            }
            table.relaying.insert((config.user_id, original));
        }

        let converter = ChatTarget::username(&config.converter_handle);
        let forwarded = self
            .transport
            .forward(&converter, post.chat_id, post.message_id)
            .await;

        let mut table = self.table.lock().await;
        table.relaying.remove(&(config.user_id, original));
        let forwarded = forwarded?;

        let key = OperationKey {
            user_id: config.user_id,
            original_message_id: post.message_id,
            forwarded_message_id: forwarded.message_id,
        };
        table.ops.insert(
            key,
            ChainOperation {
                transport: self.transport.clone(),
                original,
                target_chat_id: config.target_chat_id,
                converter_handle: config.converter_handle.clone(),
                forwarded_message_id: forwarded.message_id,
                created_at: Utc::now(),
                user_id: config.user_id,
                claimed: false,
                deadline_passed: false,
            },
        );
        drop(table);

        self.schedule_expiry(key);
        tracing::info!(operation = %key, "Chain operation started");
        Ok(Some(key))
    }

    fn schedule_expiry(self: &Arc<Self>, key: OperationKey) {
        let this = Arc::clone(self);
        let timeout = self.timeout;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
              _ = shutdown.cancelled() => {}
              _ = tokio::time::sleep(timeout) => {
                this.expire(key).await;
              }
            }
        });
    }

    /// Match a private message against in-flight cycles and republish it.
    ///
    /// Returns the finalized key when the reply was copied to the target.
    pub async fn on_private_reply(&self, msg: &PrivateMessage) -> Option<OperationKey> {
        let replied_to = msg.reply_to?;
        let sender = msg.chat_username.as_deref()?;

        let (key, transport, target) = {
            let mut table = self.table.lock().await;
            let (key, op) = table.ops.iter_mut().find(|(_, op)| {
                !op.claimed
                    && op.forwarded_message_id == replied_to
                    && op.converter_handle.eq_ignore_ascii_case(sender)
            })?;
            op.claimed = true;
            (*key, op.transport.clone(), op.target_chat_id)
        };

        match transport.copy(target, msg.chat_id, msg.message_id).await {
            Ok(_) => {
                let removed = self.table.lock().await.ops.remove(&key);
                if let Some(op) = removed {
                    let took = Utc::now().signed_duration_since(op.created_at);
                    tracing::info!(
                        operation = %key,
                        seconds = took.num_seconds(),
                        "Chain operation completed"
                    );
                }
                Some(key)
            }
            Err(e) => {
                tracing::error!(operation = %key, "Failed to publish converted post: {e}");
                let mut table = self.table.lock().await;
                let deadline_passed = match table.ops.get_mut(&key) {
                    Some(op) => {
                        op.claimed = false;
                        op.deadline_passed
                    }
                    None => false,
                };
                if deadline_passed {
                    table.ops.remove(&key);
                    tracing::info!(operation = %key, "Chain operation timed out");
                }
                None
            }
        }
    }

    /// Drop `key` if it is still in flight. Returns whether anything was removed.
    ///
    /// A claimed operation is left to the reply being copied: it is removed
    /// there, as finalized on success or as expired on failure.
    pub async fn expire(&self, key: OperationKey) -> bool {
        let mut table = self.table.lock().await;
        match table.ops.get_mut(&key) {
            Some(op) if op.claimed => {
                op.deadline_passed = true;
                tracing::debug!(operation = %key, "Timeout deferred to in-flight reply");
                false
            }
            Some(_) => {
                table.ops.remove(&key);
                tracing::info!(operation = %key, "Chain operation timed out");
                true
            }
            None => false,
        }
    }

    /// Keys of all in-flight operations.
    pub async fn operation_keys(&self) -> Vec<OperationKey> {
        self.table.lock().await.ops.keys().copied().collect()
    }

    pub async fn in_flight_for(&self, user_id: UserId) -> usize {
        self.table
            .lock()
            .await
            .ops
            .values()
            .filter(|op| op.user_id == user_id)
            .count()
    }

    /// Stop all pending expiry timers (process shutdown).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn list_config(&self, user_id: UserId) -> Result<Option<ChainConfig>> {
        self.store.get_chain_config(user_id).await
    }

    pub async fn save_config(&self, config: ChainConfig) -> Result<()> {
        tracing::info!(
            user_id = config.user_id.0,
            source = config.source_chat_id.0,
            target = config.target_chat_id.0,
            converter = %config.converter_handle,
            "Saving chain config"
        );
        self.store.upsert_chain_config(config).await
    }

    pub async fn enable(&self, user_id: UserId) -> Result<ToggleOutcome> {
        self.toggle(user_id, true).await
    }

    pub async fn disable(&self, user_id: UserId) -> Result<ToggleOutcome> {
        self.toggle(user_id, false).await
    }

    async fn toggle(&self, user_id: UserId, active: bool) -> Result<ToggleOutcome> {
        if self.store.get_chain_config(user_id).await?.is_none() {
            return Ok(ToggleOutcome::NotConfigured);
        }
        let modified = self.store.set_active(user_id, active).await?;
        Ok(if modified > 0 {
            ToggleOutcome::Changed
        } else {
            ToggleOutcome::AlreadySet
        })
    }
}
