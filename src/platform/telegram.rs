use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
    KeyboardRemove,
};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info};

use crate::bot::AppState;
use crate::commands::Command;
use crate::router::{Activity, InboundBody, InboundMessage, Outbox, Reply, ReplyMarkup, Sender};
use crate::scheduler::greetings::Broadcaster;

/// Telegram rejects messages over 4096 chars; leave some headroom.
const MAX_MESSAGE_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Reduce a Telegram message to what the router distinguishes.
fn inbound_message(msg: &Message) -> InboundMessage {
    let sender = msg.from.as_ref().map(|user| Sender {
        id: user.id.0,
        full_name: user.full_name(),
    });

    let body = if msg.audio().is_some() {
        InboundBody::Audio
    } else if let Some(voice) = msg.voice() {
        InboundBody::Voice {
            file_id: voice.file.id.0.clone(),
        }
    } else if let Some(text) = msg.text() {
        InboundBody::Text(text.to_string())
    } else {
        InboundBody::Other
    };

    InboundMessage { sender, body }
}

fn telegram_markup(markup: &ReplyMarkup) -> Result<teloxide::types::ReplyMarkup> {
    Ok(match markup {
        ReplyMarkup::Links(rows) => {
            let rows = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| {
                            let url = button
                                .url
                                .parse::<reqwest::Url>()
                                .with_context(|| format!("Invalid button url: {}", button.url))?;
                            Ok(InlineKeyboardButton::url(button.label.clone(), url))
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            InlineKeyboardMarkup::new(rows).into()
        }
        ReplyMarkup::RemoveKeyboard => KeyboardRemove::new().into(),
    })
}

/// Replies into the chat a message came from.
struct TelegramOutbox {
    bot: Bot,
    chat_id: ChatId,
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send(&self, reply: Reply) -> Result<()> {
        match reply {
            Reply::Voice(audio) => {
                let voice = InputFile::memory(audio).file_name("reply.ogg");
                self.bot
                    .send_voice(self.chat_id, voice)
                    .await
                    .context("Failed to send voice reply")?;
            }
            Reply::Text { text, markup } => {
                let chunks = split_message(&text, MAX_MESSAGE_LEN);
                let last = chunks.len().saturating_sub(1);
                for (i, chunk) in chunks.into_iter().enumerate() {
                    let mut request = self.bot.send_message(self.chat_id, chunk);
                    // Buttons go under the final chunk.
                    if i == last {
                        if let Some(markup) = &markup {
                            request = request.reply_markup(telegram_markup(markup)?);
                        }
                    }
                    request.await.context("Failed to send text reply")?;
                }
            }
        }
        Ok(())
    }

    async fn fetch_voice(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .context("Failed to look up voice file")?;
        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .context("Failed to download voice file")?;
        debug!("Downloaded voice note {} ({} bytes)", file_id, buf.len());
        Ok(buf)
    }

    async fn indicate(&self, activity: Activity) -> Result<()> {
        let action = match activity {
            Activity::Typing => ChatAction::Typing,
            Activity::RecordingVoice => ChatAction::RecordVoice,
        };
        self.bot.send_chat_action(self.chat_id, action).await?;
        Ok(())
    }
}

/// Sends scheduled greetings; private chats share the user's id.
pub struct TelegramBroadcaster {
    bot: Bot,
}

impl TelegramBroadcaster {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Broadcaster for TelegramBroadcaster {
    async fn send_text(&self, chat_id: u64, text: &str) -> Result<()> {
        let chat_id = i64::try_from(chat_id).context("Chat id out of range")?;
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .context("Failed to send greeting")?;
        Ok(())
    }
}

/// Run the Telegram bot platform
pub async fn run(state: Arc<AppState>, bot: Bot) -> Result<()> {
    info!("Starting Telegram platform...");

    bot.set_my_commands(Command::bot_commands())
        .await
        .context("Failed to publish bot commands")?;

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!("Ignoring update without a message: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let sender = inbound_message(&msg).sender;
    debug!("Command {:?} in chat {}", cmd, msg.chat.id);

    let outbox = TelegramOutbox {
        bot,
        chat_id: msg.chat.id,
    };
    let reply = state.commands.reply(&cmd, sender.as_ref());
    if let Err(e) = outbox.send(reply).await {
        error!("Failed to answer {:?}: {:#}", cmd, e);
    }
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let outbox = TelegramOutbox {
        bot,
        chat_id: msg.chat.id,
    };
    let inbound = inbound_message(&msg);
    if let Err(e) = state.router.handle(Some(inbound), &outbox).await {
        error!("Failed to reply in chat {}: {:#}", msg.chat.id, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::LinkButton;

    #[test]
    fn test_short_message_is_one_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_whitespace() {
        let chunks = split_message("aaaa bbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb ".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 5);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.len() <= 5));
    }

    #[test]
    fn test_link_markup_converts() {
        let button = LinkButton::new("Pay", "https://pay.example/x");
        let markup = ReplyMarkup::Links(vec![vec![button]]);
        assert!(matches!(
            telegram_markup(&markup).unwrap(),
            teloxide::types::ReplyMarkup::InlineKeyboard(_)
        ));
        assert!(matches!(
            telegram_markup(&ReplyMarkup::RemoveKeyboard).unwrap(),
            teloxide::types::ReplyMarkup::KeyboardRemove(_)
        ));
    }

    #[test]
    fn test_invalid_link_is_an_error() {
        let markup = ReplyMarkup::Links(vec![vec![LinkButton::new("Pay", "not a url")]]);
        assert!(telegram_markup(&markup).is_err());
    }
}
