//! Shared application state handed to every axum handler.

use std::sync::Arc;
use std::time::Duration;

use parley_shared::auth::TokenVerifier;

use crate::collab::{HttpPushNotifier, StoreDirectory, StoreGate};
use crate::config::ServerConfig;
use crate::delivery::DeliveryEngine;
use crate::registry::ConnectionRegistry;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DeliveryEngine>,
    pub registry: ConnectionRegistry,
    pub verifier: Arc<TokenVerifier>,
    pub store: Store,
}

impl AppState {
    /// Wire the production collaborator set around one store handle.
    pub fn new(config: &ServerConfig, store: Store) -> Self {
        let registry = ConnectionRegistry::new();
        let engine = DeliveryEngine::new(
            store.clone(),
            registry.clone(),
            StoreDirectory::new(store.clone()),
            StoreGate::new(store.clone()),
            HttpPushNotifier::new(
                store.clone(),
                Duration::from_secs(config.push_timeout_secs),
            ),
        );

        Self {
            engine,
            registry,
            verifier: Arc::new(TokenVerifier::new(config.auth_pubkey)),
            store,
        }
    }
}
