use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::platform::IncomingMessage;
use crate::router::Router;

/// Telegram's message limit, counted in UTF-16 code units
const MAX_MESSAGE_UNITS: usize = 4096;

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Split replies Telegram would reject, preferring newline then space
/// boundaries. Anything within the limit comes back as a single chunk.
fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while utf16_len(rest) > max_units {
        let mut units = 0;
        let mut end = 0;
        for (idx, ch) in rest.char_indices() {
            if units + ch.len_utf16() > max_units {
                break;
            }
            units += ch.len_utf16();
            end = idx + ch.len_utf8();
        }
        if end == 0 {
            // A single char wider than the limit still has to go out.
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        let head = &rest[..end];
        let cut = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(end);

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Poll Telegram for updates until the process is stopped
pub async fn run(bot: Bot, router: Arc<Router>) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, router: Arc<Router>) -> ResponseResult<()> {
    let user = match msg.from.as_ref() {
        Some(user) => user,
        None => return Ok(()),
    };

    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };

    let incoming = IncomingMessage {
        user_id: user.id.0,
        chat_id: msg.chat.id.0,
        user_name: user.full_name(),
        text,
    };

    info!(
        "Telegram message from {} ({}): {}",
        incoming.user_name, incoming.user_id, incoming.text
    );

    let reply = router.handle(&incoming).await;
    for chunk in split_message(&reply, MAX_MESSAGE_UNITS) {
        bot.send_message(msg.chat.id, chunk).await?;
    }

    Ok(())
}
