use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::{
    bot::Adapters,
    config::ConfigManager,
    flow::{Flow, FlowError, FlowRuntime},
    registries::Registries,
};

/// Owns the process registries and every deployed flow.
pub struct App {
    registries: Registries,
    config: ConfigManager,
    adapters: Adapters,
    flows: DashMap<String, Arc<FlowRuntime>>,
}

impl App {
    pub fn new(config: ConfigManager, adapters: Adapters) -> Self {
        Self::with_registries(Registries::new(), config, adapters)
    }

    pub fn with_registries(registries: Registries, config: ConfigManager, adapters: Adapters) -> Self {
        Self {
            registries,
            config,
            adapters,
            flows: DashMap::new(),
        }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn flow(&self, id: &str) -> Option<Arc<FlowRuntime>> {
        self.flows.get(id).map(|f| f.value().clone())
    }

    pub fn flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.iter().map(|f| f.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn deploy(&self, flow: &Flow) -> Result<Arc<FlowRuntime>, FlowError> {
        if self.flows.contains_key(&flow.id) {
            return Err(FlowError::AlreadyDeployed(flow.id.clone()));
        }
        let runtime = Arc::new(FlowRuntime::deploy(flow, &self.registries, &self.adapters, &self.config).await?);
        self.flows.insert(flow.id.clone(), runtime.clone());
        Ok(runtime)
    }

    /// Stops the running flow with the same id, if any, then deploys `flow`.
    pub async fn redeploy(&self, flow: &Flow) -> Result<Arc<FlowRuntime>, FlowError> {
        flow.validate()?;
        self.undeploy(&flow.id).await;
        self.deploy(flow).await
    }

    pub async fn undeploy(&self, id: &str) -> bool {
        match self.flows.remove(id) {
            Some((_, runtime)) => {
                runtime.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let ids = self.flow_ids();
        for id in &ids {
            self.undeploy(id).await;
        }
        info!(flows = ids.len(), "all flows shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;

    fn flow(id: &str) -> Flow {
        Flow::from_yaml(&format!(
            r#"
id: {id}
nodes:
  - id: dbg
    type: debug
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_redeploy_undeploy() {
        let app = App::new(ConfigManager(MapConfigManager::new()), Adapters::new());

        app.deploy(&flow("one")).await.unwrap();
        assert_eq!(app.deploy(&flow("one")).await.unwrap_err(), FlowError::AlreadyDeployed("one".into()));

        let first = app.flow("one").unwrap();
        let second = app.redeploy(&flow("one")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        app.deploy(&flow("two")).await.unwrap();
        assert_eq!(app.flow_ids(), vec!["one".to_string(), "two".to_string()]);

        assert!(app.undeploy("two").await);
        assert!(!app.undeploy("two").await);

        app.shutdown().await;
        assert!(app.flow_ids().is_empty());
    }
}
