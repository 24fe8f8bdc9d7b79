use std::sync::Arc;

use crate::db::PromotionStore;

/// Shared handler state. The store handle is opened at startup and closed
/// at shutdown; each request borrows it for the length of one operation.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PromotionStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn PromotionStore>) -> Self {
        Self { store }
    }
}
