use std::sync::Arc;

use crate::scheduler::CycleScheduler;
use crate::store::StateStore;

/// Shared state for the admin HTTP surface (spec.md §6). The scheduler gives
/// read access to the live portfolio/config; the store is the source of
/// truth for every document the routes in `api.rs` serve or mutate.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<CycleScheduler>,
    pub store: Arc<StateStore>,
}

impl AppState {
    pub fn new(scheduler: Arc<CycleScheduler>, store: Arc<StateStore>) -> Self {
        Self { scheduler, store }
    }
}
