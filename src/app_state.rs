use std::sync::Arc;

use crate::config::Config;
use crate::integrity::Coordinator;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub coordinator: Coordinator,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        AppState {
            coordinator: Coordinator::new(Arc::clone(&store)),
            store,
            config,
        }
    }
}
