//! etcd v2 HTTP client implementing the discovery store boundary

use crate::api::{
    parse_etcd_index, EtcdError, EtcdResponse, WatchCursor, ETCD_INDEX_HEADER,
    EVENT_INDEX_CLEARED, KEY_NOT_FOUND, NODE_EXIST, NOT_DIR, NOT_FILE,
};
use discovery_core::{
    CoreError, DiscoveryConfig, KeyValueStore, Result, StoreEventStream, VersionedValue,
    WriteCondition,
};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

/// Store backed by an etcd cluster's v2 keys API
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    // No request timeout: watches are long polls
    watch_client: Client,
    base_url: String,
}

enum Reply {
    Ok(EtcdResponse),
    Err(EtcdError),
}

impl EtcdStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Configuration(format!("etcd client: {}", e)))?;
        let watch_client = Client::builder()
            .build()
            .map_err(|e| CoreError::Configuration(format!("etcd watch client: {}", e)))?;

        Ok(Self {
            client,
            watch_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        Self::new(&config.store_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn key_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}/v2/keys{}", self.base_url, path)
        } else {
            format!("{}/v2/keys/{}", self.base_url, path)
        }
    }

    /// Cluster index as of a read of `path`. etcd reports it for missing keys too.
    async fn current_index(&self, path: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .get(self.key_url(path))
            .send()
            .await
            .map_err(unavailable)?;
        let header = response
            .headers()
            .get(ETCD_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_etcd_index);

        match Self::read(response).await? {
            Reply::Ok(_) => Ok(header),
            Reply::Err(err) if err.error_code == KEY_NOT_FOUND => Ok(header.or(Some(err.index))),
            Reply::Err(err) => Err(err.into_core(path)),
        }
    }

    async fn send(request: RequestBuilder) -> Result<Reply> {
        let response = request.send().await.map_err(unavailable)?;
        Self::read(response).await
    }

    async fn read(response: Response) -> Result<Reply> {
        let status = response.status();
        let body = response.text().await.map_err(unavailable)?;

        if status.is_success() {
            let parsed = serde_json::from_str(&body).map_err(|e| {
                CoreError::StoreUnavailable(format!("unexpected etcd response: {}", e))
            })?;
            return Ok(Reply::Ok(parsed));
        }

        match serde_json::from_str::<EtcdError>(&body) {
            Ok(err) => Ok(Reply::Err(err)),
            Err(_) => Err(CoreError::StoreUnavailable(format!(
                "etcd returned {}: {}",
                status, body
            ))),
        }
    }
}

fn unavailable(e: reqwest::Error) -> CoreError {
    CoreError::StoreUnavailable(e.to_string())
}

fn condition_params(condition: WriteCondition) -> Vec<(&'static str, String)> {
    match condition {
        WriteCondition::Always => Vec::new(),
        WriteCondition::Absent => vec![("prevExist", "false".to_string())],
        WriteCondition::Version(v) => vec![("prevIndex", v.to_string())],
    }
}

#[async_trait::async_trait]
impl KeyValueStore for EtcdStore {
    async fn get(&self, path: &str) -> Result<Option<VersionedValue>> {
        match Self::send(self.client.get(self.key_url(path))).await? {
            Reply::Ok(resp) if resp.node.dir => Err(CoreError::malformed(path, "is a directory")),
            Reply::Ok(resp) => Ok(Some(VersionedValue {
                value: resp.node.value.unwrap_or_default(),
                version: resp.node.modified_index,
            })),
            Reply::Err(err) if err.error_code == KEY_NOT_FOUND => Ok(None),
            Reply::Err(err) => Err(err.into_core(path)),
        }
    }

    async fn set(&self, path: &str, value: &str, condition: WriteCondition) -> Result<u64> {
        let request = self
            .client
            .put(self.key_url(path))
            .query(&condition_params(condition))
            .form(&[("value", value)]);

        match Self::send(request).await? {
            Reply::Ok(resp) => {
                debug!("etcd: {} {} @{}", resp.action, path, resp.node.modified_index);
                Ok(resp.node.modified_index)
            }
            Reply::Err(err) => Err(err.into_core(path)),
        }
    }

    async fn delete(&self, path: &str, condition: WriteCondition) -> Result<()> {
        if condition == WriteCondition::Absent {
            // etcd has no "delete if absent"; it only holds for a missing key
            return match self.get(path).await? {
                Some(_) => Err(CoreError::Conflict(path.to_string())),
                None => Ok(()),
            };
        }

        let request = self
            .client
            .delete(self.key_url(path))
            .query(&condition_params(condition));

        match Self::send(request).await? {
            Reply::Ok(_) => Ok(()),
            Reply::Err(err)
                if err.error_code == KEY_NOT_FOUND && condition == WriteCondition::Always =>
            {
                Ok(())
            }
            Reply::Err(err) => Err(err.into_core(path)),
        }
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        let request = self
            .client
            .put(self.key_url(path))
            .query(&[("dir", "true"), ("prevExist", "false")]);

        match Self::send(request).await? {
            Reply::Ok(_) => {
                debug!("etcd: created directory {}", path);
                Ok(())
            }
            Reply::Err(err) if matches!(err.error_code, NODE_EXIST | NOT_FILE | NOT_DIR) => Ok(()),
            Reply::Err(err) => Err(err.into_core(path)),
        }
    }

    async fn watch(&self, path: &str) -> Result<StoreEventStream> {
        let store = self.clone();
        let path = path.to_string();

        // Fails fast if the cluster is unreachable, and pins the watch to the
        // current index so changes made before the first poll are not lost
        let index = store.current_index(&path).await?;
        if index.is_none() {
            warn!(
                "etcd: no {} header for {}, watch starts at first poll",
                ETCD_INDEX_HEADER, path
            );
        }

        let stream = futures::stream::unfold(
            (store, path, WatchCursor::after(index), false),
            |(store, path, mut cursor, done)| async move {
                if done {
                    return None;
                }
                loop {
                    let request = store
                        .watch_client
                        .get(store.key_url(&path))
                        .query(&cursor.params());

                    match EtcdStore::send(request).await {
                        Ok(Reply::Ok(resp)) => {
                            cursor.advance(resp.node.modified_index);
                            if let Some(event) = resp.into_event() {
                                return Some((Ok(event), (store, path, cursor, false)));
                            }
                        }
                        Ok(Reply::Err(err)) if err.error_code == EVENT_INDEX_CLEARED => {
                            warn!(
                                "etcd: watch history on {} compacted, resuming from {}",
                                path, err.index
                            );
                            cursor = WatchCursor::after(Some(err.index));
                        }
                        Ok(Reply::Err(err)) => {
                            let err = err.into_core(&path);
                            return Some((Err(err), (store, path, cursor, true)));
                        }
                        Err(e) => return Some((Err(e), (store, path, cursor, true))),
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
