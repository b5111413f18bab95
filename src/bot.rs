use std::sync::Arc;

use crate::commands::CommandReplies;
use crate::config::Config;
use crate::gateway::CompletionGateway;
use crate::memory::users::UserDirectory;
use crate::router::Router;

/// Shared application state, injected into every Telegram handler.
pub struct AppState {
    pub router: Router,
    pub commands: CommandReplies,
}

impl AppState {
    pub fn new(
        config: &Config,
        users: Arc<dyn UserDirectory>,
        gateway: Arc<dyn CompletionGateway>,
    ) -> Self {
        Self {
            router: Router::new(users, gateway, config.billing.purchase_url.clone()),
            commands: CommandReplies::new(&config.billing),
        }
    }
}
