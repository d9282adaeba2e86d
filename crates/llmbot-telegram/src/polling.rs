use llmbot_core::shutdown;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::TelegramClient;
use crate::handler::{BotHandler, Inbound};

/// Pause after a failed `getUpdates` before polling again.
const RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Long-poll Telegram until `shutdown` fires, handling each text message on
/// its own task. In-flight handlers are awaited before returning.
pub async fn run_polling(
    client: Arc<TelegramClient>,
    handler: Arc<BotHandler>,
    poll_timeout_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Polling for Telegram updates");
    let mut offset: Option<i64> = None;
    let mut tasks = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        while tasks.try_join_next().is_some() {}

        let updates = tokio::select! {
            result = client.get_updates(offset, poll_timeout_secs) => result,
            _ = shutdown::requested(&mut shutdown) => break,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Failed to fetch updates, retrying in {:?}", RETRY_PAUSE);
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_PAUSE) => continue,
                    _ = shutdown::requested(&mut shutdown) => break,
                }
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(inbound) = update.message.as_ref().and_then(Inbound::from_message) else {
                debug!(update_id = update.update_id, "Skipping non-text update");
                continue;
            };

            let handler = handler.clone();
            tasks.spawn(async move {
                if let Err(e) = handler.handle(&inbound).await {
                    warn!(user_id = %inbound.user_id, error = %e, "Failed to reply");
                }
            });
        }
    }

    if !tasks.is_empty() {
        debug!(in_flight = tasks.len(), "Waiting for message handlers");
    }
    while tasks.join_next().await.is_some() {}
    info!("Polling stopped");
}
