//! Shared application state handed to every WS and REST handler.

use std::sync::Arc;

use subhub_common::config::AppConfig;

use crate::core::bus::PubSubBus;
use crate::core::index::SubscriptionIndex;

pub struct AppState {
    pub bus: Arc<PubSubBus>,
    pub index: Arc<SubscriptionIndex>,
    pub config: AppConfig,
}
