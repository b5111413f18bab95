use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::gateway::{Completion, CompletionGateway, CompletionSession, GatewayError, Payload};
use crate::memory::users::{User, UserDirectory};
use crate::texts;

/// The person who sent an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub id: u64,
    pub full_name: String,
}

/// Body of an inbound message, reduced to what the bot distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    Text(String),
    /// Voice note, referenced by platform file id.
    Voice { file_id: String },
    /// Music/audio file attachment (not a voice note).
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub sender: Option<Sender>,
    pub body: InboundBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

impl LinkButton {
    pub fn new(label: &str, url: &str) -> Self {
        Self {
            label: label.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyMarkup {
    /// Inline keyboard rows of URL buttons.
    Links(Vec<Vec<LinkButton>>),
    RemoveKeyboard,
}

/// An outbound reply, independent of the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        markup: Option<ReplyMarkup>,
    },
    Voice(Vec<u8>),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            markup: None,
        }
    }

    pub fn with_markup(text: impl Into<String>, markup: ReplyMarkup) -> Self {
        Reply::Text {
            text: text.into(),
            markup: Some(markup),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Typing,
    RecordingVoice,
}

/// The chat an inbound message came from.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, reply: Reply) -> Result<()>;
    async fn fetch_voice(&self, file_id: &str) -> Result<Vec<u8>>;
    async fn indicate(&self, activity: Activity) -> Result<()>;
}

enum Source {
    Text(String),
    Voice(String),
}

/// Single inbound handler: classify, resolve the user, complete, reply.
pub struct Router {
    users: Arc<dyn UserDirectory>,
    gateway: Arc<dyn CompletionGateway>,
    purchase_url: String,
}

impl Router {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        gateway: Arc<dyn CompletionGateway>,
        purchase_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            gateway,
            purchase_url: purchase_url.into(),
        }
    }

    /// Handle one update. Failures inside the exchange are answered in-chat;
    /// only a failure to deliver that answer is returned.
    pub async fn handle(&self, inbound: Option<InboundMessage>, outbox: &dyn Outbox) -> Result<()> {
        let Some(inbound) = inbound else {
            return Ok(());
        };
        let Some(sender) = inbound.sender else {
            debug!("Ignoring message without a sender");
            return Ok(());
        };

        let source = match inbound.body {
            InboundBody::Audio => {
                info!("Rejecting audio file from user {}", sender.id);
                return outbox.send(Reply::text(texts::AUDIO_REJECTION)).await;
            }
            InboundBody::Voice { file_id } => Source::Voice(file_id),
            InboundBody::Text(text) if !text.is_empty() => Source::Text(text),
            InboundBody::Text(_) | InboundBody::Other => {
                debug!("Nothing to forward from user {}", sender.id);
                return Ok(());
            }
        };

        match self.respond(&sender, source, outbox).await {
            Ok(()) => Ok(()),
            Err(GatewayError::UpgradeRequired) => {
                info!("User {} needs to upgrade", sender.id);
                outbox.send(self.paywall()).await
            }
            Err(GatewayError::Failed(e)) => {
                error!("Error handling message from user {}: {:#}", sender.id, e);
                outbox.send(Reply::text(texts::random_apology())).await
            }
        }
    }

    async fn respond(
        &self,
        sender: &Sender,
        source: Source,
        outbox: &dyn Outbox,
    ) -> Result<(), GatewayError> {
        let user = self.resolve_user(sender).await?;

        let (payload, activity) = match source {
            Source::Text(text) => (Payload::Text(text), Activity::Typing),
            Source::Voice(file_id) => {
                let audio = outbox.fetch_voice(&file_id).await?;
                (Payload::Voice(audio), Activity::RecordingVoice)
            }
        };

        if let Err(e) = outbox.indicate(activity).await {
            warn!("Failed to send chat action: {:#}", e);
        }

        let completion = CompletionSession::new(self.gateway.as_ref(), &user)
            .forward(payload)
            .await?;

        match completion {
            Completion::Voice(audio) => outbox.send(Reply::Voice(audio)).await?,
            Completion::Text(text) => outbox.send(Reply::text(text)).await?,
            Completion::Unsupported(kind) => {
                return Err(anyhow::anyhow!("Unexpected AI response type: {}", kind).into());
            }
        }
        Ok(())
    }

    async fn resolve_user(&self, sender: &Sender) -> Result<User> {
        if let Some(user) = self.users.get(sender.id).await? {
            return Ok(user);
        }
        info!("Creating user {} ({})", sender.id, sender.full_name);
        self.users
            .create(User::new(sender.id, sender.full_name.clone()))
            .await
    }

    fn paywall(&self) -> Reply {
        Reply::with_markup(
            texts::upgrade_message(),
            ReplyMarkup::Links(vec![vec![LinkButton::new(
                texts::PURCHASE_LABEL,
                &self.purchase_url,
            )]]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::Mutex;

    /// Records everything the router does to the chat.
    #[derive(Default)]
    struct RecordingOutbox {
        sent: Mutex<Vec<Reply>>,
        fetched: Mutex<Vec<String>>,
        activities: Mutex<Vec<Activity>>,
        fail_fetch: bool,
    }

    impl RecordingOutbox {
        fn sent(&self) -> Vec<Reply> {
            self.sent.lock().unwrap().clone()
        }

        fn activities(&self) -> Vec<Activity> {
            self.activities.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        async fn send(&self, reply: Reply) -> Result<()> {
            self.sent.lock().unwrap().push(reply);
            Ok(())
        }

        async fn fetch_voice(&self, file_id: &str) -> Result<Vec<u8>> {
            self.fetched.lock().unwrap().push(file_id.to_string());
            if self.fail_fetch {
                anyhow::bail!("download failed");
            }
            Ok(b"OggS".to_vec())
        }

        async fn indicate(&self, activity: Activity) -> Result<()> {
            self.activities.lock().unwrap().push(activity);
            Ok(())
        }
    }

    /// Answers with a scripted outcome and records what it was asked,
    /// along with whether the user already existed at call time.
    struct ScriptedGateway {
        users: MemoryStore,
        outcome: fn() -> Result<Completion, GatewayError>,
        calls: Mutex<Vec<(u64, Payload, bool)>>,
    }

    #[async_trait]
    impl CompletionGateway for ScriptedGateway {
        async fn forward(&self, user: &User, payload: Payload) -> Result<Completion, GatewayError> {
            let stored = self.users.get(user.id).await?.is_some();
            self.calls.lock().unwrap().push((user.id, payload, stored));
            (self.outcome)()
        }
    }

    /// Counts directory calls on top of a real store.
    struct CountingDirectory {
        inner: MemoryStore,
        creates: Mutex<usize>,
    }

    #[async_trait]
    impl UserDirectory for CountingDirectory {
        async fn get(&self, id: u64) -> Result<Option<User>> {
            self.inner.get(id).await
        }

        async fn create(&self, user: User) -> Result<User> {
            *self.creates.lock().unwrap() += 1;
            self.inner.create(user).await
        }

        async fn all(&self) -> Result<Vec<User>> {
            self.inner.all().await
        }
    }

    struct Fixture {
        router: Router,
        gateway: Arc<ScriptedGateway>,
        directory: Arc<CountingDirectory>,
    }

    fn fixture(outcome: fn() -> Result<Completion, GatewayError>) -> Fixture {
        let store = MemoryStore::open_in_memory().unwrap();
        let directory = Arc::new(CountingDirectory {
            inner: store.clone(),
            creates: Mutex::new(0),
        });
        let gateway = Arc::new(ScriptedGateway {
            users: store,
            outcome,
            calls: Mutex::new(Vec::new()),
        });
        let router = Router::new(directory.clone(), gateway.clone(), "https://pay.example/x");
        Fixture {
            router,
            gateway,
            directory,
        }
    }

    fn from(id: u64, body: InboundBody) -> Option<InboundMessage> {
        Some(InboundMessage {
            sender: Some(Sender {
                id,
                full_name: "Grace Hopper".to_string(),
            }),
            body,
        })
    }

    fn text(s: &str) -> InboundBody {
        InboundBody::Text(s.to_string())
    }

    fn echo_text() -> Result<Completion, GatewayError> {
        Ok(Completion::Text("hello back".to_string()))
    }

    #[tokio::test]
    async fn test_no_message_produces_nothing() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox::default();

        f.router.handle(None, &outbox).await.unwrap();

        assert!(outbox.sent().is_empty());
        assert!(f.gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_file_is_rejected_without_side_effects() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox::default();

        f.router
            .handle(from(1, InboundBody::Audio), &outbox)
            .await
            .unwrap();

        assert_eq!(outbox.sent(), vec![Reply::text(texts::AUDIO_REJECTION)]);
        assert!(f.gateway.calls.lock().unwrap().is_empty());
        assert_eq!(*f.directory.creates.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_media_and_empty_text_are_ignored() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox::default();

        let anonymous = InboundMessage {
            sender: None,
            body: text("hi"),
        };

        f.router
            .handle(from(1, InboundBody::Other), &outbox)
            .await
            .unwrap();
        f.router.handle(from(1, text("")), &outbox).await.unwrap();
        f.router.handle(Some(anonymous), &outbox).await.unwrap();

        assert!(outbox.sent().is_empty());
        assert!(outbox.activities().is_empty());
        assert!(f.gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_message_creates_user_before_gateway() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox::default();

        f.router
            .handle(from(77, text("hi")), &outbox)
            .await
            .unwrap();

        let calls = f.gateway.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(77, Payload::Text("hi".to_string()), true)]);
        let user = f.directory.inner.get(77).await.unwrap().unwrap();
        assert_eq!(user, User::new(77, "Grace Hopper"));
    }

    #[tokio::test]
    async fn test_second_message_does_not_create_again() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox::default();

        for body in [text("one"), text("two")] {
            f.router.handle(from(5, body), &outbox).await.unwrap();
        }

        assert_eq!(*f.directory.creates.lock().unwrap(), 1);
        assert_eq!(f.gateway.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_text_completion_replies_with_text() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox::default();

        f.router.handle(from(1, text("hi")), &outbox).await.unwrap();

        assert_eq!(outbox.activities(), vec![Activity::Typing]);
        assert_eq!(outbox.sent(), vec![Reply::text("hello back")]);
    }

    #[tokio::test]
    async fn test_voice_note_is_downloaded_and_answered_with_voice() {
        let f = fixture(|| Ok(Completion::Voice(vec![9, 9, 9])));
        let outbox = RecordingOutbox::default();

        let voice = InboundBody::Voice {
            file_id: "file-abc".to_string(),
        };

        f.router.handle(from(2, voice), &outbox).await.unwrap();

        let fetched = outbox.fetched.lock().unwrap().clone();
        assert_eq!(fetched, vec!["file-abc".to_string()]);
        assert_eq!(outbox.activities(), vec![Activity::RecordingVoice]);
        let calls = f.gateway.calls.lock().unwrap().clone();
        assert_eq!(calls[0].1, Payload::Voice(b"OggS".to_vec()));
        assert_eq!(outbox.sent(), vec![Reply::Voice(vec![9, 9, 9])]);
    }

    #[tokio::test]
    async fn test_unsupported_completion_takes_failure_path() {
        let f = fixture(|| Ok(Completion::Unsupported("image/png".to_string())));
        let outbox = RecordingOutbox::default();

        f.router.handle(from(1, text("hi")), &outbox).await.unwrap();

        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Reply::Text { text, markup } => {
                assert!(texts::APOLOGIES.contains(&text.as_str()));
                assert!(markup.is_none());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upgrade_required_shows_paywall() {
        let f = fixture(|| Err(GatewayError::UpgradeRequired));
        let outbox = RecordingOutbox::default();

        f.router.handle(from(1, text("hi")), &outbox).await.unwrap();

        // The action goes out before the gateway is asked.
        assert_eq!(outbox.activities(), vec![Activity::Typing]);

        let expected = Reply::with_markup(
            texts::upgrade_message(),
            ReplyMarkup::Links(vec![vec![LinkButton::new(
                texts::PURCHASE_LABEL,
                "https://pay.example/x",
            )]]),
        );
        assert_eq!(outbox.sent(), vec![expected]);
    }

    #[tokio::test]
    async fn test_gateway_failure_sends_apology() {
        let f = fixture(|| Err(anyhow::anyhow!("timeout").into()));
        let outbox = RecordingOutbox::default();

        f.router.handle(from(1, text("hi")), &outbox).await.unwrap();

        match &outbox.sent()[..] {
            [Reply::Text { text, .. }] => assert!(texts::APOLOGIES.contains(&text.as_str())),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_voice_download_failure_sends_apology() {
        let f = fixture(echo_text);
        let outbox = RecordingOutbox {
            fail_fetch: true,
            ..Default::default()
        };

        let voice = InboundBody::Voice {
            file_id: "f".to_string(),
        };

        f.router.handle(from(3, voice), &outbox).await.unwrap();

        assert!(f.gateway.calls.lock().unwrap().is_empty());
        assert!(outbox.activities().is_empty());
        match &outbox.sent()[..] {
            [Reply::Text { text, .. }] => assert!(texts::APOLOGIES.contains(&text.as_str())),
            other => panic!("unexpected replies: {:?}", other),
        }
    }
}
