//! Cancellation tokens of the deployments running in this process

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Maps deployment id to its cancellation token
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for a deployment
    pub fn register(&self, deployment_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(deployment_id.to_string(), token.clone());
        token
    }

    /// Signal a deployment's token; false if none is registered
    pub fn cancel(&self, deployment_id: &str) -> bool {
        let token = self.lock().get(deployment_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget a deployment once its pipeline has ended
    pub fn remove(&self, deployment_id: &str) {
        self.lock().remove(deployment_id);
    }

    pub fn contains(&self, deployment_id: &str) -> bool {
        self.lock().contains_key(deployment_id)
    }

    /// Signal every registered token; returns how many were signaled
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self.lock().values().cloned().collect();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
