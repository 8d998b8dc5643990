use crate::{Connection, ConnectionProfile, DatabasePlugin, DbError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cache key: at most one live handle per (profile id, working database).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    profile_id: String,
    database: Option<String>,
}

type Slot = Arc<Mutex<Option<Arc<dyn Connection>>>>;

/// Backend-agnostic connection cache.
///
/// Handles are opened lazily on first acquire and shared by every caller
/// resolving the same key. Opening is serialised per key so N concurrent
/// acquires produce at most one backend open; unrelated keys proceed in
/// parallel because the outer map lock is only held long enough to fetch
/// the slot.
pub struct ConnectionPool {
    slots: Mutex<HashMap<PoolKey, Slot>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle when its liveness probe passes; otherwise
    /// open, probe, cache and return. A probe failure on a cached handle
    /// triggers exactly one re-open for this call.
    pub fn acquire(
        &self,
        plugin: &dyn DatabasePlugin,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        let key = PoolKey {
            profile_id: profile.id.clone(),
            database: database.map(str::to_string),
        };

        let slot = {
            let mut slots = self.slots.lock().expect("pool lock poisoned");
            slots.entry(key.clone()).or_default().clone()
        };

        let mut guard = slot.lock().expect("pool slot lock poisoned");

        if let Some(conn) = guard.as_ref() {
            match conn.ping() {
                Ok(()) => return Ok(conn.clone()),
                Err(e) => {
                    log::warn!(
                        "cached connection for profile '{}' failed liveness probe, reopening: {e}",
                        profile.id
                    );
                    let _ = conn.close();
                    *guard = None;
                }
            }
        }

        log::debug!(
            "opening {} connection for profile '{}' (database: {:?})",
            profile.kind().display_name(),
            profile.id,
            key.database
        );

        let conn = plugin.connect(profile, database)?;
        conn.ping()?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Close and evict every handle belonging to a profile, across all
    /// working databases. Called when credentials change.
    pub fn invalidate(&self, profile_id: &str) {
        let removed: Vec<Slot> = {
            let mut slots = self.slots.lock().expect("pool lock poisoned");
            let keys: Vec<PoolKey> = slots
                .keys()
                .filter(|k| k.profile_id == profile_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| slots.remove(&k)).collect()
        };

        for slot in removed {
            if let Ok(mut guard) = slot.lock()
                && let Some(conn) = guard.take()
                && let Err(e) = conn.close()
            {
                log::warn!("error closing evicted connection for '{profile_id}': {e}");
            }
        }

        log::debug!("invalidated connections for profile '{profile_id}'");
    }

    /// Close everything. The pool stays usable afterwards; handles reopen
    /// lazily.
    pub fn shutdown(&self) {
        let all: Vec<Slot> = {
            let mut slots = self.slots.lock().expect("pool lock poisoned");
            slots.drain().map(|(_, slot)| slot).collect()
        };

        for slot in all {
            if let Ok(mut guard) = slot.lock()
                && let Some(conn) = guard.take()
            {
                let _ = conn.close();
            }
        }
    }

    #[cfg(test)]
    fn live_handle_count(&self) -> usize {
        let slots = self.slots.lock().expect("pool lock poisoned");
        slots
            .values()
            .filter(|slot| slot.lock().map(|g| g.is_some()).unwrap_or(false))
            .count()
    }
}
