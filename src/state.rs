// src/state.rs
use std::sync::Arc;

use crate::config::Config;
use crate::store::PollStore;

pub struct AppState {
    pub store: Arc<dyn PollStore>,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: Arc<dyn PollStore>, config: Config) -> SharedState {
        Arc::new(Self { store, config })
    }
}
