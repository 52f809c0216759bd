use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use chainfwd_core::{
    chain::ChainOrchestrator,
    chats::ChatManager,
    config::Config,
    messaging::{
        port::ChatTransport,
        throttled::{ThrottleConfig, ThrottledTransport},
    },
    store::ConfigStore,
    wizard::SetupWizard,
};

use crate::handlers;
use crate::TelegramTransport;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<dyn ConfigStore>,
    pub transport: Arc<dyn ChatTransport>,
    pub orchestrator: Arc<ChainOrchestrator>,
    pub wizard: Arc<SetupWizard>,
    pub chats: Arc<ChatManager>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let orchestrator =
            ChainOrchestrator::new(store.clone(), transport.clone(), cfg.chain_timeout);
        let wizard = Arc::new(SetupWizard::new(
            store.clone(),
            orchestrator.clone(),
            transport.clone(),
        ));
        let chats = Arc::new(ChatManager::new(
            transport.clone(),
            store.clone(),
            cfg.telegram_safe_limit,
        ));
        Self {
            cfg,
            store,
            transport,
            orchestrator,
            wizard,
            chats,
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<dyn ConfigStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!("chainfwd started: @{}", me.username()),
        Err(e) => tracing::warn!("get_me failed: {e}"),
    }
    tracing::info!(
        owners = cfg.owner_ids.len(),
        timeout_secs = cfg.chain_timeout.as_secs(),
        "Configuration loaded"
    );

    // Outbound calls go through a throttling decorator to stay under Telegram's flood limits.
    // The adapter itself still retries a single RetryAfter.
    let raw: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));
    let transport: Arc<dyn ChatTransport> =
        Arc::new(ThrottledTransport::new(raw, ThrottleConfig::default()));

    let state = Arc::new(AppState::new(cfg, store, transport));

    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post))
        .branch(Update::filter_my_chat_member().endpoint(handlers::handle_my_chat_member))
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    state.orchestrator.shutdown();
    tracing::info!("Dispatcher stopped");

    Ok(())
}
