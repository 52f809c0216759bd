use std::sync::Arc;

use chainfwd_core::{config::Config, store::JsonFileStore};

#[tokio::main]
async fn main() -> Result<(), chainfwd_core::Error> {
    let cfg = Arc::new(Config::load()?);
    chainfwd_core::logging::init("chainfwd", cfg.log_file.as_deref())?;

    let store = Arc::new(JsonFileStore::open(&cfg.data_file).await?);
    tracing::info!("Starting Telegram polling");

    chainfwd_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| chainfwd_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
