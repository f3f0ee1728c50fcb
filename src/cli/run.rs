//! Run command: long-poll the Bot API and drive the redirect machine

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::redirect::{Deps, RedirectMachine};
use crate::store::Store;
use crate::transport::{run_polling, TelegramClient};

pub async fn run(config: &Config) -> Result<()> {
    config.validate_for_bot()?;

    let db_path = config.database_path();
    let store = Store::open(&db_path, &config.database)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    let mut client = TelegramClient::new(&config.telegram)?;
    let me = client
        .identify()
        .await
        .context("getMe failed, check TELEGRAM_BOT_TOKEN")?;
    tracing::info!(bot_id = me.id, username = ?me.username, "authenticated");

    let client = Arc::new(client);
    let machine = Arc::new(RedirectMachine::new(
        Deps::new(store, client.clone()),
        config,
    ));

    tracing::info!(
        database = %db_path.display(),
        mode = ?config.redirect.mode,
        destination = %config.redirect.destination_url,
        "refgate starting"
    );

    run_polling(client, machine, config.dispatch.workers, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await;

    tracing::info!("refgate stopped");
    Ok(())
}
