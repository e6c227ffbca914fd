use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;
use treedrive_core::{ApiClient, CapabilitySet};

use crate::children::{ChildrenCache, is_reserved_name};
use crate::error::CacheError;
use crate::flight::FlightMap;
use crate::paths;

/// Memoized per-folder capability sets. `None` is a real, cacheable answer
/// (the resource is absent). Entries are only ever dropped by explicit
/// invalidation on a mutation of the folder or an ancestor, never by time.
pub struct CapabilityGate {
    client: ApiClient,
    source_id: String,
    entries: Arc<Mutex<HashMap<String, Option<Arc<CapabilitySet>>>>>,
    flights: FlightMap<String, Option<Arc<CapabilitySet>>>,
}

impl CapabilityGate {
    pub fn new(client: ApiClient, source_id: impl Into<String>) -> Self {
        Self {
            client,
            source_id: source_id.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            flights: FlightMap::new(),
        }
    }

    pub async fn get_capabilities(
        &self,
        folder: &str,
    ) -> Result<Option<Arc<CapabilitySet>>, CacheError> {
        paths::validate(folder)?;
        if let Some(entry) = self.entries.lock().unwrap().get(folder) {
            return Ok(entry.clone());
        }

        let key = folder.to_string();
        let client = self.client.clone();
        let entries = self.entries.clone();
        let source_id = self.source_id.clone();
        self.flights
            .run(key.clone(), move || async move {
                if let Some(entry) = entries.lock().unwrap().get(&key) {
                    return Ok(entry.clone());
                }
                let caps = client
                    .capabilities(&key, &source_id)
                    .await
                    .map_err(CacheError::from)?
                    .map(Arc::new);
                entries.lock().unwrap().insert(key, caps.clone());
                Ok(caps)
            })
            .await
    }

    /// Degrades to `false` on any failure so callers can render a folder as
    /// locked instead of blocking navigation.
    pub async fn can_view(&self, folder: &str) -> bool {
        match self.get_capabilities(folder).await {
            Ok(Some(caps)) => caps.can_view(),
            Ok(None) => false,
            Err(_) => false,
        }
    }

    /// Drops the entries for `path` and everything nested under it. A
    /// mutation of a folder invalidates its whole old subtree because every
    /// descendant key embeds the path.
    pub fn invalidate_subtree(&self, path: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !paths::is_within(key, path));
        self.flights.retain(|key| !paths::is_within(key, path));
    }

    pub fn invalidate(&self, folder: &str) {
        self.entries.lock().unwrap().remove(folder);
        self.flights.remove(&folder.to_string());
    }

    /// Breadth-first search for the shallowest viewable folder, used when
    /// the sticky last-opened folder is no longer accessible (startup, or a
    /// 403 on file listing). Reserved and locked children are skipped, and
    /// the walk gives up after `visit_budget` folders.
    pub async fn find_first_accessible(
        &self,
        start: &str,
        children: &ChildrenCache,
        visit_budget: usize,
    ) -> Result<Option<String>, CacheError> {
        paths::validate(start)?;
        let mut queue = VecDeque::from([start.to_string()]);
        let mut visited = 0usize;

        while let Some(folder) = queue.pop_front() {
            if visited >= visit_budget {
                debug!(start, visited, "accessibility search budget exhausted");
                return Ok(None);
            }
            visited += 1;

            if self.can_view(&folder).await {
                return Ok(Some(folder));
            }

            // Listing may itself be denied here; keep walking siblings.
            let Ok(entry) = children.get_children(&folder).await else {
                continue;
            };
            for child in entry.items.iter() {
                if child.locked || is_reserved_name(&child.name) {
                    continue;
                }
                queue.push_back(paths::join(&folder, &child.name));
            }
        }

        Ok(None)
    }

    #[cfg(test)]
    fn is_cached(&self, folder: &str) -> bool {
        self.entries.lock().unwrap().contains_key(folder)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn gate_for(server: &MockServer) -> CapabilityGate {
        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        CapabilityGate::new(client, "local")
    }

    async fn mount_caps(server: &MockServer, folder: &str, can_view: bool) {
        Mock::given(method("GET"))
            .and(path("/api/capabilities"))
            .and(query_param("folder", folder))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "canView": can_view,
                "encryption": { "encrypted": false }
            })))
            .mount(server)
            .await;
    }

    async fn mount_children(server: &MockServer, folder: &str, names: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/api/listChildren"))
            .and(query_param("folder", folder))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": names,
                "nextCursor": null
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn memoizes_until_invalidated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/capabilities"))
            .and(query_param("folder", "Projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "canView": true,
                "encryption": { "encrypted": false }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let gate = gate_for(&server);
        assert!(gate.can_view("Projects").await);
        assert!(gate.can_view("Projects").await); // served from cache

        gate.invalidate_subtree("Projects");
        assert!(gate.can_view("Projects").await); // refetched
    }

    #[tokio::test]
    async fn absent_resource_is_cached_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/capabilities"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let gate = gate_for(&server);
        assert!(gate.get_capabilities("Gone").await.unwrap().is_none());
        assert!(gate.get_capabilities("Gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/capabilities"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_caps(&server, "Projects", true).await;

        let gate = gate_for(&server);
        assert!(gate.get_capabilities("Projects").await.is_err());
        assert!(!gate.is_cached("Projects"));
        assert!(gate.can_view("Projects").await);
    }

    #[tokio::test]
    async fn subtree_invalidation_spares_siblings() {
        let server = MockServer::start().await;
        mount_caps(&server, "Projects/Alpha", true).await;
        mount_caps(&server, "Projects/Alpha/Sub", true).await;
        mount_caps(&server, "Projects/Beta", true).await;

        let gate = gate_for(&server);
        gate.get_capabilities("Projects/Alpha").await.unwrap();
        gate.get_capabilities("Projects/Alpha/Sub").await.unwrap();
        gate.get_capabilities("Projects/Beta").await.unwrap();

        gate.invalidate_subtree("Projects/Alpha");

        assert!(!gate.is_cached("Projects/Alpha"));
        assert!(!gate.is_cached("Projects/Alpha/Sub"));
        assert!(gate.is_cached("Projects/Beta"));
    }

    #[tokio::test]
    async fn bfs_finds_the_shallowest_viewable_folder() {
        let server = MockServer::start().await;
        mount_caps(&server, "root", false).await;
        mount_caps(&server, "Locked", false).await;
        mount_caps(&server, "Open", true).await;
        mount_children(&server, "root", &["trash", "Locked", "Open"]).await;
        mount_children(&server, "Locked", &[]).await;

        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        let children = ChildrenCache::new(client, 50);
        let gate = gate_for(&server);

        let found = gate
            .find_first_accessible("root", &children, 3000)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("Open"));
    }

    #[tokio::test]
    async fn bfs_respects_the_visit_budget() {
        let server = MockServer::start().await;
        mount_caps(&server, "root", false).await;
        mount_caps(&server, "A", false).await;
        mount_caps(&server, "B", true).await;
        mount_children(&server, "root", &["A", "B"]).await;

        let client = ApiClient::new(&server.uri(), "test-token").unwrap();
        let children = ChildrenCache::new(client, 50);
        let gate = gate_for(&server);

        // Budget of 2 visits root and A, but never reaches B.
        let found = gate
            .find_first_accessible("root", &children, 2)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
