//! Shared application state

use std::sync::Arc;

use ledgerhook_billing::BillingService;
use sqlx::PgPool;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool, billing: BillingService) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            billing: Arc::new(billing),
        }
    }
}
