use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::Role;

/// Short-lived role lookup cache injected into the permission gate.
pub trait RoleCache: Send + Sync {
    fn get(&self, user_id: &Uuid) -> Option<Vec<Role>>;
    fn set(&self, user_id: Uuid, roles: Vec<Role>);
    fn clear(&self);
}

/// Bounded cache whose entries expire `ttl` after insertion.
pub struct TtlCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (Instant, Vec<Role>)>>,
}

impl TtlCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, (Instant, Vec<Role>)>> {
        // A poisoned map only ever holds stale cache entries.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RoleCache for TtlCache {
    fn get(&self, user_id: &Uuid) -> Option<Vec<Role>> {
        let mut entries = self.lock();
        match entries.get(user_id) {
            Some((stored_at, roles)) if stored_at.elapsed() < self.ttl => Some(roles.clone()),
            Some(_) => {
                entries.remove(user_id);
                None
            }
            None => None,
        }
    }

    fn set(&self, user_id: Uuid, roles: Vec<Role>) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&user_id) {
            let ttl = self.ttl;
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (stored_at, _))| *stored_at)
                    .map(|(key, _)| *key);
                if let Some(key) = oldest {
                    entries.remove(&key);
                }
            }
        }
        entries.insert(user_id, (Instant::now(), roles));
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
