use std::sync::Arc;

use teloxide::prelude::*;

use chainfwd_core::{
    chain::ToggleOutcome,
    domain::{ChatId, UserId},
    formatting::{chain_status_html, escape_html},
};

use crate::router::AppState;

const HELP_TEXT: &str = "🔗 <b>Chain Forward Bot</b>\n\n\
<b>📋 Chain Forwarding:</b>\n\
/chain - Set up automated forwarding\n\
/chainlist - View your configuration\n\
/chainon - Enable chain forwarding\n\
/chainoff - Disable chain forwarding\n\
/cancel - Abort the setup in progress\n\n\
<b>📡 Channel Management:</b>\n\
/join &lt;link&gt; - Join channel/group\n\
/leave &lt;chat&gt; - Leave channel/group\n\
/mychats - List your chats\n\
/chatinfo &lt;chat&gt; - Get chat info\n\n\
<b>💡 Tips:</b>\n\
• Add this bot as an administrator to your target channel first\n\
• Posts with TeraBox links in the source channel are relayed automatically";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn toggle_reply(active: bool, outcome: ToggleOutcome) -> &'static str {
    match (active, outcome) {
        (true, ToggleOutcome::Changed) => "✅ Chain forwarding enabled.",
        (true, ToggleOutcome::AlreadySet) => "Chain forwarding is already enabled.",
        (false, ToggleOutcome::Changed) => "✅ Chain forwarding disabled.",
        (false, ToggleOutcome::AlreadySet) => "No active chain forwarding found.",
        (_, ToggleOutcome::NotConfigured) => {
            "No chain forwarding configuration found. Use /chain to set up."
        }
    }
}

async fn send_html(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state.transport.send_html(chat_id, html).await {
        tracing::warn!(chat_id = chat_id.0, "Failed to send reply: {e}");
    }
}

pub async fn handle_command(
    user_id: UserId,
    chat_id: ChatId,
    text: &str,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let (cmd, arg) = parse_command(text);
    tracing::debug!(user_id = user_id.0, command = %cmd, "Command received");

    match cmd.as_str() {
        "start" | "help" => {
            send_html(&state, chat_id, HELP_TEXT).await;
        }

        "chain" | "chainforward" => {
            state.wizard.start(user_id, chat_id).await;
        }

        "chainlist" => {
            let reply = match state.orchestrator.list_config(user_id).await {
                Ok(Some(cfg)) => {
                    let in_flight = state.orchestrator.in_flight_for(user_id).await;
                    chain_status_html(&cfg, in_flight)
                }
                Ok(None) => "No chain forwarding configured. Use /chain to set up.".to_string(),
                Err(e) => format!(
                    "❌ Could not load configuration: <code>{}</code>",
                    escape_html(&e.to_string())
                ),
            };
            send_html(&state, chat_id, &reply).await;
        }

        "chainon" | "chainoff" => {
            let active = cmd == "chainon";
            let result = if active {
                state.orchestrator.enable(user_id).await
            } else {
                state.orchestrator.disable(user_id).await
            };
            let reply = match result {
                Ok(outcome) => toggle_reply(active, outcome).to_string(),
                Err(e) => {
                    tracing::error!(user_id = user_id.0, "Toggle failed: {e}");
                    format!(
                        "❌ Could not update configuration: <code>{}</code>",
                        escape_html(&e.to_string())
                    )
                }
            };
            send_html(&state, chat_id, &reply).await;
        }

        // An active setup consumes /cancel before it reaches here.
        "cancel" => {
            send_html(&state, chat_id, "Nothing to cancel.").await;
        }

        "join" => {
            let reply = state.chats.join(&arg).await;
            send_html(&state, chat_id, &reply).await;
        }

        "leave" => {
            let reply = state.chats.leave(user_id, &arg).await;
            send_html(&state, chat_id, &reply).await;
        }

        "mychats" => {
            for page in state.chats.my_chats(user_id).await {
                send_html(&state, chat_id, &page).await;
            }
        }

        "chatinfo" => {
            let reply = state.chats.chat_info(&arg).await;
            send_html(&state, chat_id, &reply).await;
        }

        _ => {
            send_html(
                &state,
                chat_id,
                &format!(
                    "Unknown command: <code>/{}</code>. Use /help.",
                    escape_html(&cmd)
                ),
            )
            .await;
        }
    }

    Ok(())
}
