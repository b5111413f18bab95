//! Fixed user-facing wording.

use rand::Rng;

pub const START_MESSAGE: &str = "\
🧠 Introducing the first AI health & mental coach, available 24/7.

🔄 Reframe negative thoughts
🚀 Take actionable steps to overcome challenges
💪 Emphasize physical fitness for mental well-being
🤝 Provide support throughout your day
🌟 Offer encouragement to uplift your mood

You can:
🎤 Send voice messages for responses in audio
💬 Send chat messages for text responses


💡 Feedback:
Have suggestions, ideas, or encountered bugs? Share them with me at https://linkedin.com/in/navicstein.
";

pub const RESET_MESSAGE: &str =
    "I've deleted your messages in my history, you may as well clear the history from telegram itself.";

pub const BILLING_MESSAGE: &str = "Choose an option:";
pub const DOWNLOAD_INVOICES_LABEL: &str = "⏬ Download invoices";
pub const CANCEL_SUBSCRIPTION_LABEL: &str = "🚫 Cancel Subscription";

pub const CANCEL_MESSAGE: &str = "Bye! I hope we can talk again some day.";

pub const AUDIO_REJECTION: &str = "You need to send me a voice note and not an audio file.";

pub const PURCHASE_LABEL: &str = "🔥Purchase";

pub const APOLOGIES: [&str; 5] = [
    "Could you please resend your last message? I apologize for the inconvenience, but I seem to have had trouble processing it.",
    "My apologies, I'm having difficulty processing your previous message. Would you mind sending it again?",
    "Sorry about that. I'm unable to process your last message. Can you resend it, please?",
    "I apologize for the inconvenience. It seems I couldn't process your last message. Could you send it again?",
    "I'm sorry, but I couldn't quite understand your last message. Could you resend it for me, please?",
];

pub fn upgrade_message() -> String {
    format!(
        "You've reached your limit of messages. To continue our conversation, please select \"Purchase\" below.\n\n{}",
        START_MESSAGE
    )
}

/// Pick one of the apology variants at random.
pub fn random_apology() -> &'static str {
    let index = rand::thread_rng().gen_range(0..APOLOGIES.len());
    APOLOGIES[index]
}
