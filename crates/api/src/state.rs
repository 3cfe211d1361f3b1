//! Application state shared across handlers.

use std::sync::Arc;

use database::Database;
use deepseek_brain::DeepSeekBrain;

use crate::config::Config;
use crate::payment::Gateways;
use crate::sms::SmsProvider;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection.
    pub db: Database,
    /// Upstream model client.
    pub brain: Arc<DeepSeekBrain>,
    /// SMS provider, selected at startup.
    pub sms: Arc<dyn SmsProvider>,
    /// Payment gateways, selected at startup.
    pub gateways: Arc<Gateways>,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        db: Database,
        brain: DeepSeekBrain,
        sms: Box<dyn SmsProvider>,
        gateways: Gateways,
        config: Config,
    ) -> Self {
        Self {
            db,
            brain: Arc::new(brain),
            sms: Arc::from(sms),
            gateways: Arc::new(gateways),
            config: Arc::new(config),
        }
    }
}
