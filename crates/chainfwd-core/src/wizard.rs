//! `/chain` setup dialogue.
//!
//! Three steps per user: forward a post from the source channel, name the
//! converter bot, pick a target channel (skipped when the user has exactly
//! one). Any reply starting with `/` aborts without saving.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    chain::ChainOrchestrator,
    domain::{normalize_handle, ChatId, MessageRef, UserId},
    formatting::{escape_html, setup_complete_html, CANCEL_TEXT},
    messaging::{
        port::ChatTransport,
        types::{ForwardedChat, InlineButton, InlineKeyboard, PrivateMessage},
    },
    store::{ChainConfig, ConfigStore, TargetChannel},
};

pub const TARGET_CALLBACK_PREFIX: &str = "chain_target_";
pub const CANCEL_CALLBACK: &str = "chain_cancel";

const SOURCE_PROMPT: &str = "<b>❪ SET SOURCE CHANNEL ❫</b>\n\n\
Forward a message from the source channel that posts TeraBox/similar links\n\
/cancel - cancel this process";

const CONVERTER_PROMPT: &str = "<b>❪ SET CONVERTER BOT ❫</b>\n\n\
Send the username of the converter bot (e.g., @TeraBoxRobot)\n\
/cancel - cancel this process";

const TARGET_PROMPT: &str = "<b>❪ CHOOSE TARGET CHANNEL ❫</b>\n\n\
Select where to post the final converted links:";

const EXPIRED_TEXT: &str = "Setup expired. Please start again.";

const LOAD_FAILED: &str = "❌ Could not load your channels, try again later.";

const NO_TARGETS: &str = "Please add this bot as an administrator to your target channel \
before setting up chain forwarding.";

#[derive(Clone, Debug)]
enum Step {
    AwaitingSource,
    AwaitingConverter {
        source: ForwardedChat,
    },
    AwaitingTarget {
        source: ForwardedChat,
        converter: String,
        choices: Vec<TargetChannel>,
    },
}

#[derive(Clone, Debug)]
struct SetupSession {
    chat_id: ChatId,
    step: Step,
}

/// What a callback button press resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Target(ChatId),
    Cancel,
}

pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    if data == CANCEL_CALLBACK {
        return Some(CallbackAction::Cancel);
    }
    let id = data.strip_prefix(TARGET_CALLBACK_PREFIX)?;
    id.parse::<i64>()
        .ok()
        .map(|id| CallbackAction::Target(ChatId(id)))
}

pub struct SetupWizard {
    store: Arc<dyn ConfigStore>,
    orchestrator: Arc<ChainOrchestrator>,
    transport: Arc<dyn ChatTransport>,
    sessions: Mutex<HashMap<UserId, SetupSession>>,
}

impl SetupWizard {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        orchestrator: Arc<ChainOrchestrator>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_active(&self, user_id: UserId) -> bool {
        self.sessions.lock().await.contains_key(&user_id)
    }

    /// Begin (or restart) the dialogue for `user_id`.
    pub async fn start(&self, user_id: UserId, chat_id: ChatId) {
        let channels = match self.store.get_user_channels(user_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(user_id = user_id.0, "Failed to load user channels: {e}");
                self.reply(chat_id, LOAD_FAILED).await;
                return;
            }
        };
        if channels.is_empty() {
            self.reply(chat_id, NO_TARGETS).await;
            return;
        }

        self.sessions.lock().await.insert(
            user_id,
            SetupSession {
                chat_id,
                step: Step::AwaitingSource,
            },
        );
        tracing::debug!(user_id = user_id.0, "Chain setup started");
        self.reply(chat_id, SOURCE_PROMPT).await;
    }

    /// Feed a private message to the dialogue. Returns false when the user has
    /// no setup in progress, so the caller can handle the message itself.
    pub async fn handle_message(&self, user_id: UserId, msg: &PrivateMessage) -> bool {
        let Some(session) = self.sessions.lock().await.get(&user_id).cloned() else {
            return false;
        };
        let chat_id = session.chat_id;

        if msg.text.as_deref().is_some_and(|t| t.starts_with('/')) {
            self.sessions.lock().await.remove(&user_id);
            tracing::debug!(user_id = user_id.0, "Chain setup cancelled");
            self.reply(chat_id, CANCEL_TEXT).await;
            return true;
        }

        match session.step {
            Step::AwaitingSource => {
                let Some(source) = msg.forwarded_from_chat.clone() else {
                    self.sessions.lock().await.remove(&user_id);
                    self.reply(chat_id, "Please forward a message from the source channel")
                        .await;
                    return true;
                };
                self.set_step(user_id, Step::AwaitingConverter { source })
                    .await;
                self.reply(chat_id, CONVERTER_PROMPT).await;
            }
            Step::AwaitingConverter { source } => {
                let converter = normalize_handle(msg.text.as_deref().unwrap_or(""));
                if converter.is_empty() {
                    self.sessions.lock().await.remove(&user_id);
                    self.reply(chat_id, "Please send the converter bot username as text")
                        .await;
                    return true;
                }
                self.choose_target(user_id, chat_id, source, converter)
                    .await;
            }
            Step::AwaitingTarget { .. } => {
                self.reply(chat_id, "Choose a target channel using the buttons above.")
                    .await;
            }
        }
        true
    }

    async fn choose_target(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        source: ForwardedChat,
        converter: String,
    ) {
        let channels = match self.store.get_user_channels(user_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(user_id = user_id.0, "Failed to load user channels: {e}");
                self.sessions.lock().await.remove(&user_id);
                self.reply(chat_id, LOAD_FAILED).await;
                return;
            }
        };

        match channels.as_slice() {
            [] => {
                self.sessions.lock().await.remove(&user_id);
                self.reply(chat_id, NO_TARGETS).await;
            }
            [only] => {
                self.sessions.lock().await.remove(&user_id);
                let html = self.finish(user_id, &source, &converter, only).await;
                self.reply(chat_id, &html).await;
            }
            many => {
                let mut buttons: Vec<InlineButton> = many
                    .iter()
                    .map(|c| {
                        InlineButton::new(
                            c.title.clone(),
                            format!("{TARGET_CALLBACK_PREFIX}{}", c.chat_id.0),
                        )
                    })
                    .collect();
                buttons.push(InlineButton::new("Cancel", CANCEL_CALLBACK));

                self.set_step(
                    user_id,
                    Step::AwaitingTarget {
                        source,
                        converter,
                        choices: many.to_vec(),
                    },
                )
                .await;

                if let Err(e) = self
                    .transport
                    .send_inline_keyboard(chat_id, TARGET_PROMPT, InlineKeyboard::new(buttons))
                    .await
                {
                    tracing::warn!(user_id = user_id.0, "Failed to send target choice: {e}");
                }
            }
        }
    }

    /// Handle a `chain_target_*` / `chain_cancel` button press.
    pub async fn handle_callback(
        &self,
        user_id: UserId,
        callback_id: &str,
        action: CallbackAction,
        message: Option<MessageRef>,
    ) {
        // Only a press that fits the pending target step takes the session;
        // anything else leaves an in-progress dialogue alone.
        let taken = {
            let mut sessions = self.sessions.lock().await;
            let fits = match (sessions.get(&user_id).map(|s| &s.step), &action) {
                (Some(Step::AwaitingTarget { choices, .. }), CallbackAction::Target(id)) => {
                    choices.iter().any(|c| c.chat_id == *id)
                }
                (Some(Step::AwaitingTarget { .. }), CallbackAction::Cancel) => true,
                _ => false,
            };
            if fits {
                sessions.remove(&user_id)
            } else {
                None
            }
        };

        let Some(SetupSession {
            chat_id: private_chat,
            step:
                Step::AwaitingTarget {
                    source,
                    converter,
                    choices,
                },
        }) = taken
        else {
            self.answer(callback_id, Some(EXPIRED_TEXT), true).await;
            return;
        };

        let chat_id = match action {
            CallbackAction::Cancel => {
                self.answer(callback_id, None, false).await;
                self.edit_or_send(message, Some(private_chat), "Chain forward setup cancelled.")
                    .await;
                return;
            }
            CallbackAction::Target(chat_id) => chat_id,
        };

        let Some(target) = choices.iter().find(|c| c.chat_id == chat_id) else {
            self.answer(callback_id, Some(EXPIRED_TEXT), true).await;
            return;
        };

        let html = self.finish(user_id, &source, &converter, target).await;
        self.answer(callback_id, None, false).await;
        self.edit_or_send(message, Some(private_chat), &html).await;
    }

    async fn finish(
        &self,
        user_id: UserId,
        source: &ForwardedChat,
        converter: &str,
        target: &TargetChannel,
    ) -> String {
        let config = ChainConfig {
            user_id,
            source_chat_id: source.chat_id,
            source_title: source.title.clone(),
            converter_handle: converter.to_string(),
            target_chat_id: target.chat_id,
            target_title: target.title.clone(),
            active: true,
        };

        match self.orchestrator.save_config(config).await {
            Ok(()) => setup_complete_html(&source.title, converter, &target.title),
            Err(e) => {
                tracing::error!(user_id = user_id.0, "Failed to save chain config: {e}");
                format!(
                    "❌ Failed to save chain configuration: <code>{}</code>",
                    escape_html(&e.to_string())
                )
            }
        }
    }

    async fn set_step(&self, user_id: UserId, step: Step) {
        if let Some(s) = self.sessions.lock().await.get_mut(&user_id) {
            s.step = step;
        }
    }

    async fn reply(&self, chat_id: ChatId, html: &str) {
        if let Err(e) = self.transport.send_html(chat_id, html).await {
            tracing::warn!(chat_id = chat_id.0, "Failed to send setup message: {e}");
        }
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>, show_alert: bool) {
        if let Err(e) = self
            .transport
            .answer_callback_query(callback_id, text, show_alert)
            .await
        {
            tracing::warn!("Failed to answer callback query: {e}");
        }
    }

    async fn edit_or_send(&self, message: Option<MessageRef>, chat_id: Option<ChatId>, html: &str) {
        match (message, chat_id) {
            (Some(msg), _) => {
                if let Err(e) = self.transport.edit_html(msg, html).await {
                    tracing::warn!("Failed to edit setup message: {e}");
                }
            }
            (None, Some(chat_id)) => self.reply(chat_id, html).await,
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::MessageId, errors::Error, store::JsonFileStore, test_support::FakeTransport,
        Result,
    };

    const USER: UserId = UserId(42);
    const PRIVATE: ChatId = ChatId(42);

    struct Fixture {
        wizard: SetupWizard,
        store: Arc<JsonFileStore>,
        transport: Arc<FakeTransport>,
    }

    async fn fixture(targets: &[(i64, &str)]) -> Fixture {
        let store = Arc::new(JsonFileStore::ephemeral());
        for (id, title) in targets {
            store
                .add_user_channel(
                    USER,
                    TargetChannel {
                        chat_id: ChatId(*id),
                        title: title.to_string(),
                    },
                )
                .await
                .unwrap();
        }
        let transport = Arc::new(FakeTransport::new(ChatId(9000)));
        let orch =
            ChainOrchestrator::new(store.clone(), transport.clone(), Duration::from_secs(300));
        Fixture {
            wizard: SetupWizard::new(store.clone(), orch, transport.clone()),
            store,
            transport,
        }
    }

    fn text(t: &str) -> PrivateMessage {
        PrivateMessage {
            chat_id: PRIVATE,
            chat_username: Some("owner".to_string()),
            user_id: Some(USER),
            message_id: MessageId(1),
            text: Some(t.to_string()),
            reply_to: None,
            forwarded_from_chat: None,
        }
    }

    fn forwarded(chat: i64, title: &str) -> PrivateMessage {
        let mut m = text("some post");
        m.forwarded_from_chat = Some(ForwardedChat {
            chat_id: ChatId(chat),
            title: title.to_string(),
        });
        m
    }

    #[tokio::test]
    async fn single_target_setup_saves_config() {
        let f = fixture(&[(-1001, "Target")]).await;

        f.wizard.start(USER, PRIVATE).await;
        assert!(f.wizard.handle_message(USER, &forwarded(555, "Source")).await);
        assert!(f.wizard.handle_message(USER, &text("TeraBoxRobot")).await);

        let cfg = f.store.get_chain_config(USER).await.unwrap().unwrap();
        assert_eq!(
            cfg,
            ChainConfig {
                user_id: USER,
                source_chat_id: ChatId(555),
                source_title: "Source".to_string(),
                converter_handle: "TeraBoxRobot".to_string(),
                target_chat_id: ChatId(-1001),
                target_title: "Target".to_string(),
                active: true,
            }
        );
        assert!(!f.wizard.is_active(USER).await);

        let sent = f.transport.sent();
        assert!(sent
            .last()
            .is_some_and(|(_, html)| html.contains("Chain Forward Setup Complete")));
        assert!(f.transport.keyboards().is_empty());
    }

    #[tokio::test]
    async fn converter_handle_is_stripped_of_at_sign() {
        let f = fixture(&[(-1001, "Target")]).await;
        f.wizard.start(USER, PRIVATE).await;
        f.wizard.handle_message(USER, &forwarded(555, "Source")).await;
        f.wizard.handle_message(USER, &text("  @TeraBoxRobot ")).await;

        let cfg = f.store.get_chain_config(USER).await.unwrap().unwrap();
        assert_eq!(cfg.converter_handle, "TeraBoxRobot");
    }

    #[tokio::test]
    async fn command_reply_cancels_without_saving() {
        let f = fixture(&[(-1001, "Target")]).await;
        f.wizard.start(USER, PRIVATE).await;
        f.wizard.handle_message(USER, &forwarded(555, "Source")).await;
        assert!(f.wizard.handle_message(USER, &text("/cancel")).await);

        assert!(!f.wizard.is_active(USER).await);
        assert!(f.store.get_chain_config(USER).await.unwrap().is_none());
        assert!(f
            .transport
            .sent()
            .last()
            .is_some_and(|(_, html)| html == CANCEL_TEXT));
    }

    #[tokio::test]
    async fn non_forwarded_source_aborts() {
        let f = fixture(&[(-1001, "Target")]).await;
        f.wizard.start(USER, PRIVATE).await;
        f.wizard.handle_message(USER, &text("hello")).await;

        assert!(!f.wizard.is_active(USER).await);
        assert!(f.store.get_chain_config(USER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_targets_refuses_to_start() {
        let f = fixture(&[]).await;
        f.wizard.start(USER, PRIVATE).await;
        assert!(!f.wizard.is_active(USER).await);
        assert!(!f.wizard.handle_message(USER, &text("anything")).await);
    }

    #[tokio::test]
    async fn multiple_targets_offer_a_choice() {
        let f = fixture(&[(-1001, "First"), (-1002, "Second")]).await;
        f.wizard.start(USER, PRIVATE).await;
        f.wizard.handle_message(USER, &forwarded(555, "Source")).await;
        f.wizard.handle_message(USER, &text("TeraBoxRobot")).await;

        assert!(f.store.get_chain_config(USER).await.unwrap().is_none());
        let keyboards = f.transport.keyboards();
        assert_eq!(keyboards.len(), 1);
        let data: Vec<&str> = keyboards[0]
            .2
            .buttons
            .iter()
            .map(|b| b.callback_data.as_str())
            .collect();
        assert_eq!(data, vec!["chain_target_-1001", "chain_target_-1002", "chain_cancel"]);

        let msg = MessageRef {
            chat_id: PRIVATE,
            message_id: MessageId(77),
        };
        let action = parse_callback("chain_target_-1002").unwrap();
        f.wizard.handle_callback(USER, "cb1", action, Some(msg)).await;

        let cfg = f.store.get_chain_config(USER).await.unwrap().unwrap();
        assert_eq!(cfg.target_chat_id, ChatId(-1002));
        assert_eq!(cfg.target_title, "Second");
        assert!(f
            .transport
            .edits()
            .iter()
            .any(|(m, html)| *m == msg && html.contains("Setup Complete")));
        assert!(!f.wizard.is_active(USER).await);
    }

    #[tokio::test]
    async fn stale_target_choice_is_rejected() {
        let f = fixture(&[(-1001, "First"), (-1002, "Second")]).await;
        f.wizard
            .handle_callback(USER, "cb1", CallbackAction::Target(ChatId(-1001)), None)
            .await;

        assert!(f.store.get_chain_config(USER).await.unwrap().is_none());
        assert_eq!(
            f.transport.callbacks(),
            vec![(
                "cb1".to_string(),
                Some("Setup expired. Please start again.".to_string()),
                true
            )]
        );
    }

    #[tokio::test]
    async fn cancel_button_clears_session() {
        let f = fixture(&[(-1001, "First"), (-1002, "Second")]).await;
        at_target_step(&f).await;

        f.wizard
            .handle_callback(USER, "cb2", CallbackAction::Cancel, None)
            .await;
        assert!(!f.wizard.is_active(USER).await);
        assert!(f.store.get_chain_config(USER).await.unwrap().is_none());
    }

    async fn at_target_step(f: &Fixture) {
        f.wizard.start(USER, PRIVATE).await;
        f.wizard.handle_message(USER, &forwarded(555, "Source")).await;
        f.wizard.handle_message(USER, &text("TeraBoxRobot")).await;
    }

    #[tokio::test]
    async fn old_button_does_not_discard_a_new_setup() {
        let f = fixture(&[(-1001, "First"), (-1002, "Second")]).await;
        f.wizard.start(USER, PRIVATE).await;
        f.wizard.handle_message(USER, &forwarded(555, "Source")).await;

        f.wizard
            .handle_callback(USER, "cb1", CallbackAction::Target(ChatId(-1001)), None)
            .await;
        f.wizard
            .handle_callback(USER, "cb2", CallbackAction::Cancel, None)
            .await;

        assert!(f.wizard.is_active(USER).await);
        assert!(f.store.get_chain_config(USER).await.unwrap().is_none());

        // The dialogue carries on from the converter step.
        f.wizard.handle_message(USER, &text("TeraBoxRobot")).await;
        assert_eq!(f.transport.keyboards().len(), 1);
    }

    #[tokio::test]
    async fn unknown_target_keeps_the_choice_open() {
        let f = fixture(&[(-1001, "First"), (-1002, "Second")]).await;
        at_target_step(&f).await;

        f.wizard
            .handle_callback(USER, "cb1", CallbackAction::Target(ChatId(-1999)), None)
            .await;
        assert!(f.wizard.is_active(USER).await);
        assert_eq!(
            f.transport.callbacks(),
            vec![("cb1".to_string(), Some(EXPIRED_TEXT.to_string()), true)]
        );

        f.wizard
            .handle_callback(USER, "cb2", CallbackAction::Target(ChatId(-1001)), None)
            .await;
        let cfg = f.store.get_chain_config(USER).await.unwrap().unwrap();
        assert_eq!(cfg.target_chat_id, ChatId(-1001));
    }

    /// Store whose channel lookups can be switched to fail.
    struct FlakyStore {
        inner: JsonFileStore,
        fail_channels: AtomicBool,
    }

    #[async_trait]
    impl ConfigStore for FlakyStore {
        async fn get_chain_config(&self, user_id: UserId) -> Result<Option<ChainConfig>> {
            self.inner.get_chain_config(user_id).await
        }

        async fn upsert_chain_config(&self, config: ChainConfig) -> Result<()> {
            self.inner.upsert_chain_config(config).await
        }

        async fn set_active(&self, user_id: UserId, active: bool) -> Result<u64> {
            self.inner.set_active(user_id, active).await
        }

        async fn active_configs_for_source(&self, source: ChatId) -> Result<Vec<ChainConfig>> {
            self.inner.active_configs_for_source(source).await
        }

        async fn get_user_channels(&self, user_id: UserId) -> Result<Vec<TargetChannel>> {
            if self.fail_channels.load(Ordering::SeqCst) {
                return Err(Error::External("disk unavailable".to_string()));
            }
            self.inner.get_user_channels(user_id).await
        }

        async fn add_user_channel(&self, user_id: UserId, channel: TargetChannel) -> Result<bool> {
            self.inner.add_user_channel(user_id, channel).await
        }

        async fn remove_user_channel(&self, user_id: UserId, chat_id: ChatId) -> Result<bool> {
            self.inner.remove_user_channel(user_id, chat_id).await
        }

        async fn remove_channel_everywhere(&self, chat_id: ChatId) -> Result<u64> {
            self.inner.remove_channel_everywhere(chat_id).await
        }
    }

    #[tokio::test]
    async fn channel_load_failure_is_reported_at_target_step() {
        let store = Arc::new(FlakyStore {
            inner: JsonFileStore::ephemeral(),
            fail_channels: AtomicBool::new(false),
        });
        store
            .add_user_channel(
                USER,
                TargetChannel {
                    chat_id: ChatId(-1001),
                    title: "Target".to_string(),
                },
            )
            .await
            .unwrap();
        let transport = Arc::new(FakeTransport::new(ChatId(9000)));
        let orch =
            ChainOrchestrator::new(store.clone(), transport.clone(), Duration::from_secs(300));
        let wizard = SetupWizard::new(store.clone(), orch, transport.clone());

        wizard.start(USER, PRIVATE).await;
        wizard.handle_message(USER, &forwarded(555, "Source")).await;
        store.fail_channels.store(true, Ordering::SeqCst);
        wizard.handle_message(USER, &text("TeraBoxRobot")).await;

        assert!(!wizard.is_active(USER).await);
        assert!(store.get_chain_config(USER).await.unwrap().is_none());
        let sent = transport.sent();
        assert_eq!(sent.last().map(|(_, html)| html.as_str()), Some(LOAD_FAILED));
        assert!(!sent.iter().any(|(_, html)| html == NO_TARGETS));
    }

    #[test]
    fn callback_data_is_parsed() {
        assert_eq!(parse_callback("chain_cancel"), Some(CallbackAction::Cancel));
        assert_eq!(
            parse_callback("chain_target_-100123"),
            Some(CallbackAction::Target(ChatId(-100123)))
        );
        assert_eq!(parse_callback("chain_target_x"), None);
        assert_eq!(parse_callback("askuser:1:2"), None);
    }
}
