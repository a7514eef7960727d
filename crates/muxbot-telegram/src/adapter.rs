//! Bot lifecycle: command registration and the long-polling dispatcher.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::handlers::{bot_commands, callback_handler, message_handler};
use crate::state::Shared;

/// Register the command menu and drive the long-polling loop until the
/// process exits. Long polling — no public URL required.
pub async fn run_bot(bot: Bot, shared: Arc<Shared>) {
    if let Err(e) = bot.delete_my_commands().await {
        warn!(error = %e, "failed to reset bot commands");
    }
    if let Err(e) = bot.set_my_commands(bot_commands()).await {
        warn!(error = %e, "failed to set bot commands");
    }

    info!("starting Telegram long-polling dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![shared])
        .default_handler(|_upd| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
