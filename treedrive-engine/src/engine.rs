use std::sync::Arc;

use tracing::{debug, warn};
use treedrive_core::{ApiClient, CapabilitySet, ChildEntry, MoveRequest};

use crate::capabilities::CapabilityGate;
use crate::children::{ChildrenCache, ChildrenEntry, filter_visible, is_reserved_name};
use crate::config::{EngineConfig, StorageSource};
use crate::error::{CacheError, EngineError};
use crate::events::{EngineEvent, EventBus};
use crate::nav::{NavSequence, NavTicket};
use crate::paths;
use crate::state::StateStore;
use crate::stats::{StatsCache, StatsOutcome};

/// One engine per logical session and storage source. Owns all cache maps
/// and the event bus; the renderer holds no copies and re-queries on every
/// paint, reacting to invalidation events.
pub struct TreeCacheEngine {
    pub(crate) client: ApiClient,
    pub(crate) source: StorageSource,
    children: ChildrenCache,
    stats: StatsCache,
    capabilities: CapabilityGate,
    pub(crate) state: Arc<StateStore>,
    pub(crate) events: EventBus,
    nav: NavSequence,
    pub(crate) config: EngineConfig,
}

impl TreeCacheEngine {
    pub fn new(
        client: ApiClient,
        source: StorageSource,
        state: Arc<StateStore>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            children: ChildrenCache::new(client.clone(), config.page_size),
            stats: StatsCache::new(client.clone(), &config),
            capabilities: CapabilityGate::new(client.clone(), source.id.clone()),
            client,
            source,
            state,
            events: EventBus::new(config.event_capacity),
            nav: NavSequence::new(),
            config,
        })
    }

    pub fn source(&self) -> &StorageSource {
        &self.source
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ----- reads -----------------------------------------------------------

    /// Cached first page of a folder's children. A cold fetch also seeds the
    /// capability and stats caches for each child in the background, so
    /// icons can upgrade from placeholder asynchronously.
    pub async fn children(self: &Arc<Self>, folder: &str) -> Result<ChildrenEntry, CacheError> {
        let was_cached = self.children.peek(folder).is_some();
        let entry = self.children.get_children(folder).await?;
        if !was_cached {
            self.seed_child_lookups(folder, &entry);
        }
        Ok(entry)
    }

    /// Children with reserved names (trash, profile pictures, upload
    /// staging) filtered out at the boundary.
    pub async fn visible_children(
        self: &Arc<Self>,
        folder: &str,
    ) -> Result<Vec<ChildEntry>, CacheError> {
        Ok(filter_visible(&self.children(folder).await?.items))
    }

    /// Next page of children. A stale cursor (no prior successful fetch, or
    /// an invalidation raced the request) falls back to a fresh first-page
    /// fetch and returns the refreshed listing.
    pub async fn load_more(self: &Arc<Self>, folder: &str) -> Result<Vec<ChildEntry>, CacheError> {
        match self.children.load_more(folder).await {
            Err(CacheError::StaleCursor(_)) => {
                debug!(folder, "stale cursor, refetching first page");
                let entry = self.children(folder).await?;
                Ok(entry.items.as_ref().clone())
            }
            other => other,
        }
    }

    pub async fn stats(&self, folder: &str) -> Result<StatsOutcome, CacheError> {
        self.stats.get_stats(folder, &self.source).await
    }

    pub async fn capabilities(
        &self,
        folder: &str,
    ) -> Result<Option<Arc<CapabilitySet>>, CacheError> {
        self.capabilities.get_capabilities(folder).await
    }

    pub async fn can_view(&self, folder: &str) -> bool {
        self.capabilities.can_view(folder).await
    }

    /// Shallowest viewable folder reachable from `start`; the startup and
    /// post-403 fallback.
    pub async fn find_first_accessible(
        &self,
        start: &str,
    ) -> Result<Option<String>, CacheError> {
        self.capabilities
            .find_first_accessible(start, &self.children, self.config.bfs_visit_budget)
            .await
    }

    pub fn is_expanded(&self, folder: &str) -> bool {
        self.state.is_expanded(&self.source.id, folder)
    }

    pub fn set_expanded(&self, folder: &str, expanded: bool) -> Result<(), EngineError> {
        paths::validate(folder)?;
        Ok(self.state.set_expanded(&self.source.id, folder, expanded)?)
    }

    pub fn last_opened(&self) -> Option<String> {
        self.state.last_opened(&self.source.id)
    }

    pub fn set_last_opened(&self, folder: &str) -> Result<(), EngineError> {
        paths::validate(folder)?;
        Ok(self.state.set_last_opened(&self.source.id, folder)?)
    }

    pub fn folder_color(&self, folder: &str) -> Option<String> {
        self.state.folder_color(&self.source.id, folder)
    }

    pub fn set_folder_color(&self, folder: &str, color: &str) -> Result<(), EngineError> {
        paths::validate(folder)?;
        Ok(self.state.set_folder_color(&self.source.id, folder, color)?)
    }

    /// Takes a navigation ticket for a pane; check it after each await and
    /// discard the response when a later navigation superseded it.
    pub fn begin_navigation(&self) -> NavTicket {
        self.nav.begin()
    }

    pub fn navigation_is_current(&self, ticket: NavTicket) -> bool {
        self.nav.is_current(ticket)
    }

    // ----- mutations --------------------------------------------------------

    /// Moves a folder into `dest_parent` and synchronizes every cache and
    /// persisted key. Returns the new path. On failure the touched parents
    /// are still invalidated so the next read re-queries.
    pub async fn move_folder(
        self: &Arc<Self>,
        source_path: &str,
        dest_parent: &str,
    ) -> Result<String, EngineError> {
        paths::validate(source_path)?;
        paths::validate(dest_parent)?;
        let old_parent = paths::parent_of(source_path);

        let request = MoveRequest {
            source: source_path.to_string(),
            destination: dest_parent.to_string(),
            source_id: self.source.id.clone(),
            dest_source_id: self.source.id.clone(),
            mode: "move".to_string(),
        };
        let outcome = match self.client.move_folder(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.invalidate_folder(&old_parent);
                self.invalidate_folder(dest_parent);
                return Err(err.into());
            }
        };
        if let Some(message) = outcome.error {
            self.invalidate_folder(&old_parent);
            self.invalidate_folder(dest_parent);
            return Err(EngineError::Rejected(message));
        }

        self.sync_after_move(source_path, dest_parent)
    }

    /// Renames the last segment of `old_path` and synchronizes state.
    pub async fn rename_folder(
        self: &Arc<Self>,
        old_path: &str,
        new_name: &str,
    ) -> Result<String, EngineError> {
        paths::validate(old_path)?;
        let parent = paths::parent_of(old_path);
        let new_path = paths::join(&parent, new_name);
        paths::validate(&new_path)?;

        let outcome = match self.client.rename_folder(old_path, &new_path).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.invalidate_folder(&parent);
                self.invalidate_folder(old_path);
                return Err(err.into());
            }
        };
        if !outcome.success {
            self.invalidate_folder(&parent);
            self.invalidate_folder(old_path);
            return Err(EngineError::Rejected(
                outcome
                    .error
                    .unwrap_or_else(|| "rename was rejected".to_string()),
            ));
        }

        self.sync_after_rename(old_path, &new_path)?;
        Ok(new_path)
    }

    /// Rewrites caches and persisted keys after a confirmed server-side
    /// move. The persisted rewrites commit as one save; cache invalidation
    /// targets exactly the two parents and the two paths, never the whole
    /// map, so visually stable unrelated subtrees are not refetched.
    pub fn sync_after_move(
        &self,
        source_path: &str,
        dest_parent: &str,
    ) -> Result<String, EngineError> {
        let new_path = paths::join(dest_parent, paths::basename(source_path));
        let old_parent = paths::parent_of(source_path);

        let change = self
            .state
            .apply_move(&self.source.id, source_path, &new_path)?;

        self.invalidate_folder(&old_parent);
        self.invalidate_folder(dest_parent);
        self.invalidate_folder(&new_path);
        self.invalidate_subtree(source_path);

        self.events.emit(EngineEvent::Invalidated {
            folders: vec![old_parent, dest_parent.to_string()],
            source_id: self.source.id.clone(),
        });
        if let Some((old, new)) = change.active_rewritten {
            self.events.emit(EngineEvent::ActivePathMoved { old, new });
        }

        Ok(new_path)
    }

    /// Rename analogue of [`sync_after_move`]: one changed path, same parent.
    pub fn sync_after_rename(&self, old_path: &str, new_path: &str) -> Result<(), EngineError> {
        let parent = paths::parent_of(old_path);

        let change = self.state.apply_move(&self.source.id, old_path, new_path)?;

        self.invalidate_folder(&parent);
        self.invalidate_folder(new_path);
        self.invalidate_subtree(old_path);

        self.events.emit(EngineEvent::Invalidated {
            folders: vec![parent],
            source_id: self.source.id.clone(),
        });
        if let Some((old, new)) = change.active_rewritten {
            self.events.emit(EngineEvent::ActivePathMoved { old, new });
        }

        Ok(())
    }

    /// Cleanup after a confirmed server-side delete: drops persisted keys
    /// for the subtree so a later reload cannot resurrect the path.
    pub fn sync_after_delete(&self, path: &str) -> Result<(), EngineError> {
        paths::validate(path)?;
        let parent = paths::parent_of(path);

        self.state.apply_delete(&self.source.id, path)?;
        self.invalidate_folder(&parent);
        self.invalidate_subtree(path);

        self.events.emit(EngineEvent::Invalidated {
            folders: vec![parent],
            source_id: self.source.id.clone(),
        });
        Ok(())
    }

    /// After a folder was created under `parent`, only that parent's caches
    /// need a re-pull.
    pub fn sync_after_create(&self, parent: &str) -> Result<(), EngineError> {
        paths::validate(parent)?;
        self.invalidate_folder(parent);
        self.events.emit(EngineEvent::Invalidated {
            folders: vec![parent.to_string()],
            source_id: self.source.id.clone(),
        });
        Ok(())
    }

    // ----- invalidation -----------------------------------------------------

    pub(crate) fn invalidate_folder(&self, folder: &str) {
        self.children.invalidate(folder);
        self.stats.invalidate(folder, &self.source.id);
        self.capabilities.invalidate(folder);
    }

    fn invalidate_subtree(&self, path: &str) {
        self.children.invalidate_subtree(path);
        self.stats.invalidate_subtree(path, &self.source.id);
        self.capabilities.invalidate_subtree(path);
    }

    pub(crate) fn invalidate_after_job(&self, folder: &str) {
        self.invalidate_folder(folder);
        self.invalidate_folder(&paths::parent_of(folder));
    }

    /// Cached children entry without touching the network.
    pub fn peek_children(&self, folder: &str) -> Option<ChildrenEntry> {
        self.children.peek(folder)
    }

    fn seed_child_lookups(self: &Arc<Self>, folder: &str, entry: &ChildrenEntry) {
        let engine = self.clone();
        let folder = folder.to_string();
        let targets: Vec<String> = entry
            .items
            .iter()
            .filter(|child| !child.locked && !is_reserved_name(&child.name))
            .map(|child| paths::join(&folder, &child.name))
            .collect();
        if targets.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for target in targets {
                if let Err(err) = engine.capabilities.get_capabilities(&target).await {
                    warn!(folder = %target, "capability warmup failed: {err}");
                }
                if engine
                    .stats
                    .get_stats(&target, &engine.source)
                    .await
                    .is_err()
                {
                    warn!(folder = %target, "stats warmup failed");
                }
            }
        });
    }
}
