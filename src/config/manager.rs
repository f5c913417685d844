#![allow(dead_code)]
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use super::runtime::{DecisionSettings, EngineConfig, RiskSettings};

#[derive(Debug, Clone, Serialize)]
pub enum ConfigChangeEvent {
    RiskUpdated(RiskSettings),
    DecisionUpdated(DecisionSettings),
    FullConfigUpdated,
}

/// Wraps the immutable `EngineConfig` loaded at startup in a lock so the
/// admin surface can hot-patch a bounded subset of risk/decision knobs
/// without restarting the engine.
pub struct RuntimeConfigManager {
    config: Arc<RwLock<EngineConfig>>,
    change_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl RuntimeConfigManager {
    pub fn new(initial: EngineConfig) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            config: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub async fn get_config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    pub async fn update_risk(&self, settings: RiskSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let old_risk = config.risk.clone();
        config.risk = settings.clone();

        if let Err(errors) = config.validate() {
            config.risk = old_risk;
            return Err(errors.join(", "));
        }

        info!(max_positions = settings.max_positions, "risk settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::RiskUpdated(settings));
        Ok(())
    }

    pub async fn update_decision(&self, settings: DecisionSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        config.decision = settings.clone();
        info!("decision settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::DecisionUpdated(settings));
        Ok(())
    }

    pub async fn update_full(&self, new_config: EngineConfig) -> Result<(), String> {
        if let Err(errors) = new_config.validate() {
            return Err(errors.join(", "));
        }

        let mut config = self.config.write().await;
        *config = new_config;

        info!("full configuration updated");
        let _ = self.change_tx.send(ConfigChangeEvent::FullConfigUpdated);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_tx.subscribe()
    }

    pub fn config_arc(&self) -> Arc<RwLock<EngineConfig>> {
        Arc::clone(&self.config)
    }
}

impl Clone for RuntimeConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            change_tx: self.change_tx.clone(),
        }
    }
}
