//! Serving-time routing keys in the edge KV store

use tracing::debug;

use crate::edge::client::{encode_component, EdgeClient};
use crate::errors::EngineError;

impl EdgeClient {
    fn kv_path(&self, key: &str) -> String {
        format!(
            "/accounts/{}/storage/kv/namespaces/{}/values/{}",
            self.options.account_id,
            self.options.kv_namespace_id,
            encode_component(key)
        )
    }

    pub async fn kv_put(&self, key: &str, value: &str) -> Result<(), EngineError> {
        debug!("KV put {} -> {}", key, value);
        self.http
            .put_text("kv_put", &self.kv_path(key), value.to_string())
            .await
            .map_err(EngineError::Edge)
    }

    /// Read a key; a missing key is `None`
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, EngineError> {
        self.http
            .get_text("kv_get", &self.kv_path(key))
            .await
            .map_err(EngineError::Edge)
    }

    /// Delete a key; deleting a missing key succeeds
    pub async fn kv_delete(&self, key: &str) -> Result<(), EngineError> {
        debug!("KV delete {}", key);
        self.http
            .delete_if_exists("kv_delete", &self.kv_path(key))
            .await
            .map_err(EngineError::Edge)
    }
}
