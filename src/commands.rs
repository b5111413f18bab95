use teloxide::macros::BotCommands;
use tracing::info;

use crate::config::BillingConfig;
use crate::router::{LinkButton, Reply, ReplyMarkup, Sender};
use crate::texts;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Meet your coach")]
    Start,
    #[command(description = "Forget our conversation")]
    Reset,
    #[command(description = "Invoices and subscription")]
    Billing,
    #[command(description = "End the current conversation")]
    Cancel,
}

/// Fixed responders for the slash commands. None of them read user state.
pub struct CommandReplies {
    invoices_url: String,
    cancel_url: String,
}

impl CommandReplies {
    pub fn new(billing: &BillingConfig) -> Self {
        Self {
            invoices_url: billing.invoices_url.clone(),
            cancel_url: billing.cancel_url.clone(),
        }
    }

    pub fn reply(&self, command: &Command, sender: Option<&Sender>) -> Reply {
        match command {
            Command::Start => Reply::text(texts::START_MESSAGE),
            // History is not stored, so there is nothing to delete.
            Command::Reset => Reply::text(texts::RESET_MESSAGE),
            Command::Billing => Reply::with_markup(
                texts::BILLING_MESSAGE,
                ReplyMarkup::Links(vec![vec![
                    LinkButton::new(texts::DOWNLOAD_INVOICES_LABEL, &self.invoices_url),
                    LinkButton::new(texts::CANCEL_SUBSCRIPTION_LABEL, &self.cancel_url),
                ]]),
            ),
            Command::Cancel => {
                if let Some(sender) = sender {
                    info!("User {} canceled the conversation.", sender.full_name);
                }
                Reply::with_markup(texts::CANCEL_MESSAGE, ReplyMarkup::RemoveKeyboard)
            }
        }
    }
}
