//! Persistence of per-user chain configuration and target channels.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    Result,
};

/// One user's chain forward setup: watch `source`, relay via `converter_handle`,
/// publish into `target`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub user_id: UserId,
    pub source_chat_id: ChatId,
    pub source_title: String,
    /// Bot username without the leading `@`.
    pub converter_handle: String,
    pub target_chat_id: ChatId,
    pub target_title: String,
    pub active: bool,
}

/// A channel the user may publish converted posts into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetChannel {
    pub chat_id: ChatId,
    pub title: String,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_chain_config(&self, user_id: UserId) -> Result<Option<ChainConfig>>;

    /// Insert or replace the config keyed by `config.user_id`.
    async fn upsert_chain_config(&self, config: ChainConfig) -> Result<()>;

    /// Set the active flag; returns how many records actually changed (0 or 1).
    async fn set_active(&self, user_id: UserId, active: bool) -> Result<u64>;

    /// Active configs whose source channel is `source`.
    async fn active_configs_for_source(&self, source: ChatId) -> Result<Vec<ChainConfig>>;

    async fn get_user_channels(&self, user_id: UserId) -> Result<Vec<TargetChannel>>;

    /// Add (or retitle) a target channel; returns false if it was already known unchanged.
    async fn add_user_channel(&self, user_id: UserId, channel: TargetChannel) -> Result<bool>;

    async fn remove_user_channel(&self, user_id: UserId, chat_id: ChatId) -> Result<bool>;

    /// Drop `chat_id` from every user's channel list. Returns how many users lost it.
    async fn remove_channel_everywhere(&self, chat_id: ChatId) -> Result<u64>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    chain_configs: Vec<ChainConfig>,
    #[serde(default)]
    user_channels: Vec<UserChannels>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserChannels {
    user_id: UserId,
    channels: Vec<TargetChannel>,
}

#[derive(Clone, Debug, Default)]
struct StoreState {
    configs: HashMap<UserId, ChainConfig>,
    channels: HashMap<UserId, Vec<TargetChannel>>,
    /// source chat -> users with an *active* config watching it.
    by_source: HashMap<ChatId, BTreeSet<UserId>>,
}

impl StoreState {
    fn from_document(doc: StoreDocument) -> Self {
        let mut st = StoreState {
            configs: doc
                .chain_configs
                .into_iter()
                .map(|c| (c.user_id, c))
                .collect(),
            channels: doc
                .user_channels
                .into_iter()
                .map(|u| (u.user_id, u.channels))
                .collect(),
            by_source: HashMap::new(),
        };
        st.reindex();
        st
    }

    fn to_document(&self) -> StoreDocument {
        let mut chain_configs: Vec<ChainConfig> = self.configs.values().cloned().collect();
        chain_configs.sort_by_key(|c| c.user_id);

        let mut user_channels: Vec<UserChannels> = self
            .channels
            .iter()
            .filter(|(_, chans)| !chans.is_empty())
            .map(|(user_id, chans)| UserChannels {
                user_id: *user_id,
                channels: chans.clone(),
            })
            .collect();
        user_channels.sort_by_key(|u| u.user_id);

        StoreDocument {
            chain_configs,
            user_channels,
        }
    }

    fn reindex(&mut self) {
        self.by_source.clear();
        for cfg in self.configs.values().filter(|c| c.active) {
            self.by_source
                .entry(cfg.source_chat_id)
                .or_default()
                .insert(cfg.user_id);
        }
    }
}

/// Single-file JSON store.
///
/// The whole document lives in memory; every write rewrites the file via a
/// temp file + rename. Without a path nothing is persisted (tests).
pub struct JsonFileStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(txt) if txt.trim().is_empty() => StoreDocument::default(),
            Ok(txt) => serde_json::from_str(&txt).map_err(|e| Error::InvalidDataFile {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };

        let state = StoreState::from_document(doc);
        tracing::info!(
            path = %path.display(),
            configs = state.configs.len(),
            "Loaded chain forward data"
        );

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    async fn persist(&self, st: &StoreState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let txt = serde_json::to_string_pretty(&st.to_document())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn get_chain_config(&self, user_id: UserId) -> Result<Option<ChainConfig>> {
        let st = self.state.lock().await;
        Ok(st.configs.get(&user_id).cloned())
    }

    async fn upsert_chain_config(&self, config: ChainConfig) -> Result<()> {
        let mut st = self.state.lock().await;
        let mut next = st.clone();
        next.configs.insert(config.user_id, config);
        next.reindex();
        self.persist(&next).await?;
        *st = next;
        Ok(())
    }

    async fn set_active(&self, user_id: UserId, active: bool) -> Result<u64> {
        let mut st = self.state.lock().await;
        match st.configs.get(&user_id) {
            Some(cfg) if cfg.active != active => {}
            _ => return Ok(0),
        }
        let mut next = st.clone();
        if let Some(cfg) = next.configs.get_mut(&user_id) {
            cfg.active = active;
        }
        next.reindex();
        self.persist(&next).await?;
        *st = next;
        Ok(1)
    }

    async fn active_configs_for_source(&self, source: ChatId) -> Result<Vec<ChainConfig>> {
        let st = self.state.lock().await;
        let Some(users) = st.by_source.get(&source) else {
            return Ok(Vec::new());
        };
        Ok(users
            .iter()
            .filter_map(|u| st.configs.get(u))
            .cloned()
            .collect())
    }

    async fn get_user_channels(&self, user_id: UserId) -> Result<Vec<TargetChannel>> {
        let st = self.state.lock().await;
        Ok(st.channels.get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_user_channel(&self, user_id: UserId, channel: TargetChannel) -> Result<bool> {
        let mut st = self.state.lock().await;
        let mut next = st.clone();
        let chans = next.channels.entry(user_id).or_default();
        match chans.iter_mut().find(|c| c.chat_id == channel.chat_id) {
            Some(existing) if existing.title == channel.title => return Ok(false),
            Some(existing) => existing.title = channel.title,
            None => chans.push(channel),
        }
        self.persist(&next).await?;
        *st = next;
        Ok(true)
    }

    async fn remove_user_channel(&self, user_id: UserId, chat_id: ChatId) -> Result<bool> {
        let mut st = self.state.lock().await;
        let mut next = st.clone();
        let Some(chans) = next.channels.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = chans.len();
        chans.retain(|c| c.chat_id != chat_id);
        if chans.len() == before {
            return Ok(false);
        }
        self.persist(&next).await?;
        *st = next;
        Ok(true)
    }

    async fn remove_channel_everywhere(&self, chat_id: ChatId) -> Result<u64> {
        let mut st = self.state.lock().await;
        let mut next = st.clone();
        let mut removed = 0u64;
        for chans in next.channels.values_mut() {
            let before = chans.len();
            chans.retain(|c| c.chat_id != chat_id);
            if chans.len() != before {
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }
        self.persist(&next).await?;
        *st = next;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}/data.json"))
    }

    fn sample(user: i64, source: i64) -> ChainConfig {
        ChainConfig {
            user_id: UserId(user),
            source_chat_id: ChatId(source),
            source_title: "Source".to_string(),
            converter_handle: "TeraBoxRobot".to_string(),
            target_chat_id: ChatId(-1009),
            target_title: "Target".to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_user() {
        let store = JsonFileStore::ephemeral();
        store.upsert_chain_config(sample(1, 555)).await.unwrap();
        store.upsert_chain_config(sample(1, 777)).await.unwrap();

        let cfg = store.get_chain_config(UserId(1)).await.unwrap().unwrap();
        assert_eq!(cfg.source_chat_id, ChatId(777));
        assert!(store
            .active_configs_for_source(ChatId(555))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.active_configs_for_source(ChatId(777)).await.unwrap(),
            vec![cfg]
        );
    }

    #[tokio::test]
    async fn set_active_reports_modified_count() {
        let store = JsonFileStore::ephemeral();
        assert_eq!(store.set_active(UserId(1), false).await.unwrap(), 0);

        store.upsert_chain_config(sample(1, 555)).await.unwrap();
        assert_eq!(store.set_active(UserId(1), true).await.unwrap(), 0);
        assert_eq!(store.set_active(UserId(1), false).await.unwrap(), 1);
        assert!(store
            .active_configs_for_source(ChatId(555))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(store.set_active(UserId(1), true).await.unwrap(), 1);
        assert_eq!(
            store.active_configs_for_source(ChatId(555)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn user_channels_are_deduplicated_by_chat() {
        let store = JsonFileStore::ephemeral();
        let chan = TargetChannel {
            chat_id: ChatId(-1001),
            title: "Old".to_string(),
        };
        assert!(store.add_user_channel(UserId(1), chan.clone()).await.unwrap());
        assert!(!store.add_user_channel(UserId(1), chan).await.unwrap());
        assert!(store
            .add_user_channel(
                UserId(1),
                TargetChannel {
                    chat_id: ChatId(-1001),
                    title: "New".to_string(),
                },
            )
            .await
            .unwrap());

        let chans = store.get_user_channels(UserId(1)).await.unwrap();
        assert_eq!(chans.len(), 1);
        assert_eq!(chans[0].title, "New");

        assert!(store
            .remove_user_channel(UserId(1), ChatId(-1001))
            .await
            .unwrap());
        assert!(!store
            .remove_user_channel(UserId(1), ChatId(-1001))
            .await
            .unwrap());
        assert!(store.get_user_channels(UserId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let path = tmp_file("chainfwd-store");
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.upsert_chain_config(sample(42, 555)).await.unwrap();
            store
                .add_user_channel(
                    UserId(42),
                    TargetChannel {
                        chat_id: ChatId(-1009),
                        title: "Target".to_string(),
                    },
                )
                .await
                .unwrap();
            store.set_active(UserId(42), false).await.unwrap();
        }

        let store = JsonFileStore::open(&path).await.unwrap();
        let cfg = store.get_chain_config(UserId(42)).await.unwrap().unwrap();
        assert!(!cfg.active);
        assert_eq!(cfg.converter_handle, "TeraBoxRobot");
        assert_eq!(store.get_user_channels(UserId(42)).await.unwrap().len(), 1);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let path = tmp_file("chainfwd-corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::open(&path).await.err().unwrap();
        assert!(matches!(err, Error::InvalidDataFile { .. }));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn failed_write_leaves_state_untouched() {
        let path = tmp_file("chainfwd-blocked");
        let store = JsonFileStore::open(&path).await.unwrap();
        // A regular file where the data directory should be makes every write fail.
        let dir = path.parent().unwrap().to_path_buf();
        std::fs::write(&dir, "not a directory").unwrap();

        assert!(store.upsert_chain_config(sample(1, 555)).await.is_err());
        assert!(store.get_chain_config(UserId(1)).await.unwrap().is_none());
        assert!(store
            .active_configs_for_source(ChatId(555))
            .await
            .unwrap()
            .is_empty());

        let chan = TargetChannel {
            chat_id: ChatId(-1001),
            title: "Target".to_string(),
        };
        assert!(store.add_user_channel(UserId(1), chan).await.is_err());
        assert!(store.get_user_channels(UserId(1)).await.unwrap().is_empty());

        let _ = std::fs::remove_file(&dir);
    }

    #[tokio::test]
    async fn channel_is_removed_for_every_user() {
        let store = JsonFileStore::ephemeral();
        for user in [1, 2] {
            store
                .add_user_channel(
                    UserId(user),
                    TargetChannel {
                        chat_id: ChatId(-1001),
                        title: "Shared".to_string(),
                    },
                )
                .await
                .unwrap();
        }
        store
            .add_user_channel(
                UserId(2),
                TargetChannel {
                    chat_id: ChatId(-1002),
                    title: "Other".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.remove_channel_everywhere(ChatId(-1001)).await.unwrap(), 2);
        assert!(store.get_user_channels(UserId(1)).await.unwrap().is_empty());
        assert_eq!(store.get_user_channels(UserId(2)).await.unwrap().len(), 1);
        assert_eq!(store.remove_channel_everywhere(ChatId(-1001)).await.unwrap(), 0);
    }
}
