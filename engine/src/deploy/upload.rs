//! Bounded-concurrency upload of a build output tree

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::objstore::ObjectStore;

/// Maximum number of uploads in flight
pub const UPLOAD_CONCURRENCY: usize = 20;

/// Content type by file extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" => "image/jpeg",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Storage prefix holding one deployment's artifacts
pub fn deployment_prefix(site_id: &str, deployment_id: &str) -> String {
    format!("sites/{}/{}", site_id, deployment_id)
}

/// Storage prefix holding every deployment of a site
pub fn site_prefix(site_id: &str) -> String {
    format!("sites/{}/", site_id)
}

/// Files of an output tree, as `(absolute path, relative path)`
pub async fn list_output_files(root: &Path) -> Result<Vec<(PathBuf, String)>, EngineError> {
    Dir::new(root).walk_files().await
}

/// Upload `files` under `prefix` with at most `concurrency` uploads in flight.
///
/// Workers drain one shared queue. Once an upload fails or the token fires no
/// new upload starts, but those already issued run to completion. Every worker
/// is joined before the first error, if any, is returned.
pub async fn upload_files(
    store: &dyn ObjectStore,
    files: Vec<(PathBuf, String)>,
    prefix: &str,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<usize, EngineError> {
    let queue = Mutex::new(VecDeque::from(files));
    let first_error: Mutex<Option<EngineError>> = Mutex::new(None);
    let uploaded = AtomicUsize::new(0);

    let workers = (0..concurrency.max(1)).map(|_| async {
        loop {
            if cancel.is_cancelled() || lock(&first_error).is_some() {
                break;
            }
            let next = lock(&queue).pop_front();
            let Some((path, rel)) = next else {
                break;
            };

            match upload_one(store, &path, &rel, prefix).await {
                Ok(()) => {
                    uploaded.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    let mut slot = lock(&first_error);
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            }
        }
    });
    join_all(workers).await;

    if let Some(err) = lock(&first_error).take() {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(EngineError::Canceled);
    }
    Ok(uploaded.load(Ordering::SeqCst))
}

async fn upload_one(store: &dyn ObjectStore, path: &Path, rel: &str, prefix: &str) -> Result<(), EngineError> {
    let data = tokio::fs::read(path).await.map_err(|e| EngineError::Upload {
        action: "read",
        path: rel.to_string(),
        source: Box::new(e.into()),
    })?;

    let key = format!("{}/{}", prefix, rel);
    debug!("Uploading {} ({} bytes)", key, data.len());
    store
        .upload(&key, &data, content_type_for(rel))
        .await
        .map_err(|e| EngineError::Upload {
            action: "upload",
            path: rel.to_string(),
            source: Box::new(e),
        })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
