//! Per-kind cache of live resources with reservation semantics.
//!
//! A key is either *reserved* (claimed by an in-flight creation or load,
//! no content yet) or *committed* (content attached). Both states live
//! under one mutex so that reserving a key and checking for an existing
//! entry are a single atomic step. The mutex is never held across an
//! await point.

use chrono::{DateTime, Utc};
use safescale_iaas::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Content that can be stored in a [`ResourceCache`].
pub trait Cacheable: Send + Sync + 'static {
    /// Canonical key of the content once committed.
    fn cache_id(&self) -> &str;
}

struct CacheEntry<T> {
    content: Arc<T>,
    last_updated: DateTime<Utc>,
}

struct Entries<T> {
    committed: HashMap<String, CacheEntry<T>>,
    reserved: HashSet<String>,
}

pub struct ResourceCache<T> {
    kind: &'static str,
    entries: Mutex<Entries<T>>,
}

impl<T: Cacheable> ResourceCache<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(Entries {
                committed: HashMap::new(),
                reserved: HashSet::new(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries<T>>> {
        self.entries
            .lock()
            .map_err(|_| Error::inconsistent(format!("{} cache lock poisoned", self.kind)))
    }

    fn reserve_locked(&self, entries: &mut Entries<T>, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_parameter("key", "cannot be empty"));
        }
        if entries.reserved.contains(key) {
            return Err(Error::AlreadyReserved(format!(
                "{} '{}' is already reserved",
                self.kind, key
            )));
        }
        if entries.committed.contains_key(key) {
            return Err(Error::duplicate(format!(
                "{} '{}' already exists",
                self.kind, key
            )));
        }
        entries.reserved.insert(key.to_string());
        Ok(())
    }

    fn commit_locked(&self, entries: &mut Entries<T>, key: &str, content: T) -> Result<Arc<T>> {
        if !entries.reserved.contains(key) {
            return Err(Error::NotReserved(format!(
                "{} '{}' has not been reserved",
                self.kind, key
            )));
        }

        let id = content.cache_id().to_string();
        if id != key && entries.reserved.contains(&id) {
            return Err(Error::inconsistent(format!(
                "cannot commit {} '{}' as '{}': the new key is reserved by someone else",
                self.kind, key, id
            )));
        }

        entries.reserved.remove(key);
        let content = Arc::new(content);
        entries.committed.insert(
            id,
            CacheEntry {
                content: content.clone(),
                last_updated: Utc::now(),
            },
        );
        Ok(content)
    }

    /// Claims `key`, failing with `AlreadyReserved` if someone else holds it
    /// and with `Duplicate` if content is already committed under it.
    pub fn reserve_entry(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        self.reserve_locked(&mut entries, key)?;
        tracing::trace!("{} cache: reserved '{}'", self.kind, key);
        Ok(())
    }

    /// Attaches content to a reserved key. When the content's own ID differs
    /// from `key`, the entry is re-keyed under that ID.
    pub fn commit_entry(&self, key: &str, content: T) -> Result<Arc<T>> {
        let mut entries = self.lock()?;
        let content = self.commit_locked(&mut entries, key, content)?;
        tracing::trace!(
            "{} cache: committed '{}' as '{}'",
            self.kind,
            key,
            content.cache_id()
        );
        Ok(content)
    }

    /// Releases a reservation without attaching content.
    pub fn free_entry(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if !entries.reserved.remove(key) {
            return Err(Error::NotAvailable(format!(
                "{} '{}' is not reserved",
                self.kind, key
            )));
        }
        tracing::trace!("{} cache: freed '{}'", self.kind, key);
        Ok(())
    }

    /// Returns the committed content under `key`. A reserved key yields
    /// `NotAvailable`; the caller may retry later.
    pub fn get_entry(&self, key: &str) -> Result<Arc<T>> {
        let entries = self.lock()?;
        if entries.reserved.contains(key) {
            return Err(Error::NotAvailable(format!(
                "{} '{}' is being worked on",
                self.kind, key
            )));
        }
        entries
            .committed
            .get(key)
            .map(|e| e.content.clone())
            .ok_or_else(|| Error::not_found(self.kind, key))
    }

    /// Reserves and commits `content` in one step.
    pub fn add_entry(&self, content: T) -> Result<Arc<T>> {
        let key = content.cache_id().to_string();
        let mut entries = self.lock()?;
        self.reserve_locked(&mut entries, &key)?;
        self.commit_locked(&mut entries, &key, content)
    }

    /// Records that the content under `key` changed in place.
    pub fn touch_entry(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        match entries.committed.get_mut(key) {
            Some(entry) => {
                entry.last_updated = Utc::now();
                Ok(())
            }
            None => Err(Error::not_found(self.kind, key)),
        }
    }

    pub fn last_updated(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .ok()
            .and_then(|e| e.committed.get(key).map(|entry| entry.last_updated))
    }

    /// Drops the committed entry under `key`, if any.
    pub fn remove_entry(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        Ok(entries.committed.remove(key).is_some())
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        self.lock()
            .map(|e| e.reserved.contains(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.committed.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves `key` and returns a guard that frees the reservation when
    /// dropped without being committed.
    pub fn reserve(self: &Arc<Self>, key: &str) -> Result<Reservation<T>> {
        self.reserve_entry(key)?;
        Ok(Reservation {
            cache: self.clone(),
            key: key.to_string(),
            settled: false,
        })
    }
}

/// A held reservation on a cache key.
pub struct Reservation<T: Cacheable> {
    cache: Arc<ResourceCache<T>>,
    key: String,
    settled: bool,
}

impl<T: Cacheable> Reservation<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn commit(mut self, content: T) -> Result<Arc<T>> {
        self.settled = true;
        let result = self.cache.commit_entry(&self.key, content);
        if result.is_err() {
            // keep the key usable by others
            let _ = self.cache.free_entry(&self.key);
        }
        result
    }

    pub fn free(mut self) -> Result<()> {
        self.settled = true;
        self.cache.free_entry(&self.key)
    }
}

impl<T: Cacheable> Drop for Reservation<T> {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.cache.free_entry(&self.key) {
                tracing::warn!("failed to release reservation of '{}': {}", self.key, e);
            }
        }
    }
}
