use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use treedrive_core::{ApiClient, ChildEntry};

use crate::error::CacheError;
use crate::flight::FlightMap;
use crate::paths;

/// Names the server uses for housekeeping folders; they are filtered at the
/// presentation boundary, never inside the cache, so the filter rules can
/// change without invalidating anything.
pub const RESERVED_NAMES: [&str; 2] = ["trash", "profile-pictures"];
pub const UPLOAD_STAGING_PREFIX: &str = ".tdtmp-";

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name) || name.starts_with(UPLOAD_STAGING_PREFIX)
}

pub fn filter_visible(items: &[ChildEntry]) -> Vec<ChildEntry> {
    items
        .iter()
        .filter(|item| !is_reserved_name(&item.name))
        .cloned()
        .collect()
}

/// One folder's cached page window. `next_cursor == None` means the window
/// is complete; already-fetched pages are never re-requested. The version
/// changes whenever the entry is rebuilt, so callers can detect that an
/// entry survived an invalidation untouched.
#[derive(Debug, Clone)]
pub struct ChildrenEntry {
    pub items: Arc<Vec<ChildEntry>>,
    pub next_cursor: Option<String>,
    pub version: u64,
}

pub struct ChildrenCache {
    client: ApiClient,
    page_size: u32,
    entries: Arc<Mutex<HashMap<String, ChildrenEntry>>>,
    flights: FlightMap<String, ChildrenEntry>,
    next_version: Arc<AtomicU64>,
}

impl ChildrenCache {
    pub fn new(client: ApiClient, page_size: u32) -> Self {
        Self {
            client,
            page_size,
            entries: Arc::new(Mutex::new(HashMap::new())),
            flights: FlightMap::new(),
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    /// First page of a folder's direct children. Repeated calls are served
    /// from the cache; concurrent cold calls share one request.
    pub async fn get_children(&self, folder: &str) -> Result<ChildrenEntry, CacheError> {
        paths::validate(folder)?;
        if let Some(entry) = self.entries.lock().unwrap().get(folder) {
            return Ok(entry.clone());
        }

        let key = folder.to_string();
        let client = self.client.clone();
        let entries = self.entries.clone();
        let next_version = self.next_version.clone();
        let limit = self.page_size;
        self.flights
            .run(key.clone(), move || async move {
                if let Some(entry) = entries.lock().unwrap().get(&key) {
                    return Ok(entry.clone());
                }
                let page = client
                    .list_children(&key, None, limit)
                    .await
                    .map_err(CacheError::from)?;
                debug!(folder = %key, items = page.items.len(), "children page fetched");
                let entry = ChildrenEntry {
                    items: Arc::new(page.items),
                    next_cursor: page.next_cursor,
                    version: next_version.fetch_add(1, Ordering::Relaxed),
                };
                entries.lock().unwrap().insert(key.clone(), entry.clone());
                Ok(entry)
            })
            .await
    }

    /// Appends the next cursor page to the cached entry and returns only the
    /// newly appended items. Already-cached names are never re-included.
    /// With no prior cached entry the cursor is stale and the caller must
    /// fall back to a fresh `get_children`.
    pub async fn load_more(&self, folder: &str) -> Result<Vec<ChildEntry>, CacheError> {
        paths::validate(folder)?;
        let cursor = {
            let entries = self.entries.lock().unwrap();
            match entries.get(folder) {
                None => return Err(CacheError::StaleCursor(folder.to_string())),
                Some(entry) => match &entry.next_cursor {
                    None => return Ok(Vec::new()),
                    Some(cursor) => cursor.clone(),
                },
            }
        };

        let page = self
            .client
            .list_children(folder, Some(&cursor), self.page_size)
            .await
            .map_err(CacheError::from)?;

        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(folder) else {
            // Invalidated while the page was in flight.
            return Err(CacheError::StaleCursor(folder.to_string()));
        };
        let known: HashSet<String> = entry.items.iter().map(|item| item.name.clone()).collect();
        let appended: Vec<ChildEntry> = page
            .items
            .into_iter()
            .filter(|item| !known.contains(&item.name))
            .collect();
        let mut items = entry.items.as_ref().clone();
        items.extend(appended.iter().cloned());
        entry.items = Arc::new(items);
        entry.next_cursor = page.next_cursor;
        entry.version = self.next_version.fetch_add(1, Ordering::Relaxed);
        Ok(appended)
    }

    /// Cached entry without touching the network.
    pub fn peek(&self, folder: &str) -> Option<ChildrenEntry> {
        self.entries.lock().unwrap().get(folder).cloned()
    }

    pub fn invalidate(&self, folder: &str) {
        self.entries.lock().unwrap().remove(folder);
        self.flights.remove(&folder.to_string());
    }

    pub fn invalidate_subtree(&self, path: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !paths::is_within(key, path));
        self.flights.retain(|key| !paths::is_within(key, path));
    }
}
