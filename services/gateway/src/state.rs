use std::sync::Arc;

use artifacts::ArtifactStore;

use crate::config::AppConfig;
use crate::proxy::ChatProxy;
use crate::supervisor::Supervisor;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub store: ArtifactStore,
    pub supervisor: Arc<Supervisor>,
    pub proxy: ChatProxy,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        let store = ArtifactStore::new(&config.upload_dir);
        let supervisor = Arc::new(Supervisor::new(
            config.launcher_path.clone(),
            config.log_dir.clone(),
            config.health_url(),
        ));
        let proxy = ChatProxy::new(config.completion_url());
        Self {
            store,
            supervisor,
            proxy,
        }
    }
}
