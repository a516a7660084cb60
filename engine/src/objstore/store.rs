//! Object store trait

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::EngineError;

/// Page size used when purging
pub const PURGE_PAGE_SIZE: u32 = 100;

/// One stored object version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub id: String,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,

    /// Name to continue the listing from
    pub next: Option<String>,
}

/// Outcome of a prefix purge
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    pub deleted: usize,

    /// `(object name, error)` for each object that could not be removed
    pub failures: Vec<(String, String)>,
}

/// Object store trait for testability
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store one object
    async fn upload(&self, name: &str, data: &[u8], content_type: &str) -> Result<(), EngineError>;

    /// List objects under a prefix, starting at `cursor`
    async fn list(&self, prefix: &str, cursor: Option<&str>, page_size: u32) -> Result<ListPage, EngineError>;

    /// Delete one object version
    async fn delete(&self, name: &str, id: &str) -> Result<(), EngineError>;

    /// Delete every object under a prefix.
    ///
    /// A listing failure aborts the purge; a single delete failure is logged
    /// and recorded in the report.
    async fn delete_all_with_prefix(&self, prefix: &str) -> Result<PurgeReport, EngineError> {
        let mut report = PurgeReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.list(prefix, cursor.as_deref(), PURGE_PAGE_SIZE).await?;
            for object in page.objects.iter().filter(|o| o.name.starts_with(prefix)) {
                match self.delete(&object.name, &object.id).await {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        warn!("Failed to delete {}: {}", object.name, e);
                        report.failures.push((object.name.clone(), e.to_string()));
                    }
                }
            }

            match page.next {
                Some(next) if !page.objects.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            "Purged {} object(s) under {} ({} failure(s))",
            report.deleted,
            prefix,
            report.failures.len()
        );
        Ok(report)
    }
}
