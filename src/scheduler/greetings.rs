use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::Scheduler;
use crate::memory::users::UserDirectory;

/// Concurrent sends per broadcast.
const BROADCAST_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreetingJob {
    pub id: &'static str,
    pub hour: u32,
    pub greeting: &'static str,
}

impl GreetingJob {
    /// Daily at the top of `hour` (six-field cron, seconds first).
    pub fn cron(&self) -> String {
        format!("0 0 {} * * *", self.hour)
    }
}

pub const GREETING_JOBS: [GreetingJob; 4] = [
    GreetingJob {
        id: "morning_greeting",
        hour: 6,
        greeting: "🌅 Good morning! How did you sleep? Tell me one small thing you'd like to get done today.",
    },
    GreetingJob {
        id: "afternoon_greeting",
        hour: 12,
        greeting: "☀️ Good afternoon! Time for a quick check-in: have you had some water and a stretch yet?",
    },
    GreetingJob {
        id: "evening_greeting",
        hour: 18,
        greeting: "🌇 Good evening! How did today go? I'm here if you want to talk it through.",
    },
    GreetingJob {
        id: "night_greeting",
        hour: 21,
        greeting: "🌙 Good night! Name one thing that went well today, then get some proper rest.",
    },
];

/// Delivers a plain text message to a chat by id.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn send_text(&self, chat_id: u64, text: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends a greeting to every known user.
pub struct GreetingBroadcast {
    users: Arc<dyn UserDirectory>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl GreetingBroadcast {
    pub fn new(users: Arc<dyn UserDirectory>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { users, broadcaster }
    }

    pub async fn run(&self, job: &GreetingJob) -> Result<BroadcastReport> {
        let users = self.users.all().await?;

        let results: Vec<bool> = stream::iter(users)
            .map(move |user| async move {
                let sent = self.broadcaster.send_text(user.telegram_id, job.greeting);
                match sent.await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to send {} to user {}: {:#}", job.id, user.id, e);
                        false
                    }
                }
            })
            .buffer_unordered(BROADCAST_CONCURRENCY)
            .collect()
            .await;

        let sent = results.iter().filter(|ok| **ok).count();
        let report = BroadcastReport {
            sent,
            failed: results.len() - sent,
        };
        info!(
            "Broadcast {} finished: {} sent, {} failed",
            job.id, report.sent, report.failed
        );
        Ok(report)
    }
}

/// Register the four daily greeting jobs.
pub async fn register_greetings(
    scheduler: &Scheduler,
    broadcast: Arc<GreetingBroadcast>,
) -> Result<()> {
    for job in GREETING_JOBS {
        let broadcast = Arc::clone(&broadcast);
        scheduler
            .add_cron_job(&job.cron(), job.id, job.id, move || {
                let broadcast = Arc::clone(&broadcast);
                Box::pin(async move {
                    if let Err(e) = broadcast.run(&job).await {
                        warn!("Greeting broadcast {} failed: {:#}", job.id, e);
                    }
                })
            })
            .await?;
    }
    Ok(())
}
