use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;
use treedrive_core::{ApiClient, FolderStats};

use crate::config::{EngineConfig, SourceKind, StorageSource};
use crate::error::CacheError;
use crate::flight::FlightMap;
use crate::paths;

type StatsKey = (String, String);

/// Aggregate counts for one folder, or a soft failure distinguishable from
/// "folder is empty". Soft failures are never written into the cache, so a
/// later call re-attempts the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOutcome {
    Ready(FolderStats),
    Unavailable,
}

impl StatsOutcome {
    pub fn stats(&self) -> Option<&FolderStats> {
        match self {
            StatsOutcome::Ready(stats) => Some(stats),
            StatsOutcome::Unavailable => None,
        }
    }
}

/// Memoizes cheap aggregate counts keyed by (folder, source id). Requests
/// funnel through a bounded pool on top of per-key coalescing, because
/// expanding a wide directory bursts many distinct folders at once.
pub struct StatsCache {
    client: ApiClient,
    entries: Arc<Mutex<HashMap<StatsKey, FolderStats>>>,
    flights: FlightMap<StatsKey, StatsOutcome>,
    limiter: Arc<Semaphore>,
    timeout_local: std::time::Duration,
    timeout_remote: std::time::Duration,
}

impl StatsCache {
    pub fn new(client: ApiClient, config: &EngineConfig) -> Self {
        Self {
            client,
            entries: Arc::new(Mutex::new(HashMap::new())),
            flights: FlightMap::new(),
            limiter: Arc::new(Semaphore::new(config.stats_concurrency)),
            timeout_local: config.stats_timeout_local,
            timeout_remote: config.stats_timeout_remote,
        }
    }

    pub async fn get_stats(
        &self,
        folder: &str,
        source: &StorageSource,
    ) -> Result<StatsOutcome, CacheError> {
        paths::validate(folder)?;
        let key = (folder.to_string(), source.id.clone());
        if let Some(stats) = self.entries.lock().unwrap().get(&key) {
            return Ok(StatsOutcome::Ready(*stats));
        }

        let client = self.client.clone();
        let entries = self.entries.clone();
        let limiter = self.limiter.clone();
        let deadline = match source.kind {
            SourceKind::Local => self.timeout_local,
            SourceKind::Remote => self.timeout_remote,
        };
        let flight_key = key.clone();
        self.flights
            .run(key, move || async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return Ok(StatsOutcome::Unavailable);
                };
                if let Some(stats) = entries.lock().unwrap().get(&flight_key) {
                    return Ok(StatsOutcome::Ready(*stats));
                }
                let request = client.folder_stats(&flight_key.0, &flight_key.1);
                match timeout(deadline, request).await {
                    Ok(Ok(stats)) => {
                        entries.lock().unwrap().insert(flight_key, stats);
                        Ok(StatsOutcome::Ready(stats))
                    }
                    Ok(Err(err)) => {
                        warn!(folder = %flight_key.0, "folder stats failed: {err}");
                        Ok(StatsOutcome::Unavailable)
                    }
                    Err(_) => {
                        warn!(folder = %flight_key.0, "folder stats timed out");
                        Ok(StatsOutcome::Unavailable)
                    }
                }
            })
            .await
    }

    pub fn invalidate(&self, folder: &str, source_id: &str) {
        let key = (folder.to_string(), source_id.to_string());
        self.entries.lock().unwrap().remove(&key);
        self.flights.remove(&key);
    }

    pub fn invalidate_subtree(&self, path: &str, source_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(folder, source), _| source != source_id || !paths::is_within(folder, path));
        self.flights
            .retain(|(folder, source)| source != source_id || !paths::is_within(folder, path));
    }

    #[cfg(test)]
    fn cached(&self, folder: &str, source_id: &str) -> Option<FolderStats> {
        self.entries
            .lock()
            .unwrap()
            .get(&(folder.to_string(), source_id.to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn tight_config() -> EngineConfig {
        EngineConfig {
            stats_timeout_local: Duration::from_millis(80),
            stats_timeout_remote: Duration::from_millis(200),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn caches_successful_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .and(query_param("folder", "Projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": 2,
                "files": 9
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        let cache = StatsCache::new(client, &tight_config());
        let source = StorageSource::local("local");

        let first = cache.get_stats("Projects", &source).await.unwrap();
        let second = cache.get_stats("Projects", &source).await.unwrap();

        assert_eq!(first.stats().unwrap().files, 9);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn timeout_yields_unavailable_and_does_not_poison() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(300))
                    .set_body_json(json!({ "folders": 0, "files": 0 })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": 1,
                "files": 4
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        let cache = StatsCache::new(client, &tight_config());
        let source = StorageSource::local("local");

        let first = cache.get_stats("Projects", &source).await.unwrap();
        assert_eq!(first, StatsOutcome::Unavailable);
        assert!(cache.cached("Projects", "local").is_none());

        let second = cache.get_stats("Projects", &source).await.unwrap();
        assert_eq!(second.stats().unwrap().files, 4);
    }

    #[tokio::test]
    async fn transport_failure_is_soft() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": 0,
                "files": 2
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        let cache = StatsCache::new(client, &tight_config());
        let source = StorageSource::remote("mount-1");

        assert_eq!(
            cache.get_stats("Projects", &source).await.unwrap(),
            StatsOutcome::Unavailable
        );
        assert_eq!(
            cache
                .get_stats("Projects", &source)
                .await
                .unwrap()
                .stats()
                .unwrap()
                .files,
            2
        );
    }

    #[tokio::test]
    async fn stats_are_keyed_per_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .and(query_param("sourceId", "local"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": 1,
                "files": 1
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/folderStats"))
            .and(query_param("sourceId", "mount-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": 5,
                "files": 50
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        let cache = StatsCache::new(client, &tight_config());

        let local = cache
            .get_stats("Projects", &StorageSource::local("local"))
            .await
            .unwrap();
        let remote = cache
            .get_stats("Projects", &StorageSource::remote("mount-1"))
            .await
            .unwrap();

        assert_eq!(local.stats().unwrap().files, 1);
        assert_eq!(remote.stats().unwrap().files, 50);
    }
}
