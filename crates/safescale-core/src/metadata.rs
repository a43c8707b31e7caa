//! Metadata store: persisted resource records behind a [`ResourceCache`].
//!
//! Records are written twice in the folder, under `<kind>/byID/<id>` and
//! `<kind>/byName/<name>`, so that either reference resolves without a
//! scan.

use crate::cache::{Cacheable, Reservation, ResourceCache};
use safescale_iaas::retry::{self, Retry};
use safescale_iaas::{Error, ErrorKind, Host, MetadataFolder, Network, Result, Subnet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay between two lookups of an entry reserved by someone else
const RESERVED_POLL: Duration = Duration::from_millis(100);

/// A resource kind that can be persisted in a metadata folder.
pub trait Resource: Cacheable + Serialize + DeserializeOwned {
    /// Human name of the kind, used in messages ("host")
    const KIND: &'static str;
    /// Folder holding the records of this kind ("hosts")
    const FOLDER: &'static str;

    fn id(&self) -> &str;

    /// Key of the record in the `byName` index.
    fn name_key(&self) -> String;
}

impl Cacheable for Host {
    fn cache_id(&self) -> &str {
        &self.id
    }
}

impl Resource for Host {
    const KIND: &'static str = "host";
    const FOLDER: &'static str = "hosts";

    fn id(&self) -> &str {
        &self.id
    }

    fn name_key(&self) -> String {
        self.name.clone()
    }
}

impl Cacheable for Network {
    fn cache_id(&self) -> &str {
        &self.id
    }
}

impl Resource for Network {
    const KIND: &'static str = "network";
    const FOLDER: &'static str = "networks";

    fn id(&self) -> &str {
        &self.id
    }

    fn name_key(&self) -> String {
        self.name.clone()
    }
}

impl Cacheable for Subnet {
    fn cache_id(&self) -> &str {
        &self.id
    }
}

/// Subnet names are only unique within their network.
pub fn subnet_name_key(network_id: &str, name: &str) -> String {
    format!("{}.{}", network_id, name)
}

impl Resource for Subnet {
    const KIND: &'static str = "subnet";
    const FOLDER: &'static str = "subnets";

    fn id(&self) -> &str {
        &self.id
    }

    fn name_key(&self) -> String {
        subnet_name_key(&self.network_id, &self.name)
    }
}

/// Checks a resource name before anything is reserved or created. Names
/// become folder entries, so path separators and control characters are
/// refused.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_parameter("name", "cannot be empty"));
    }
    if name == "." || name == ".." {
        return Err(Error::invalid_parameter("name", "cannot be '.' or '..'"));
    }
    if let Some(c) = name.chars().find(|&c| matches!(c, '/' | '\\') || c.is_control()) {
        return Err(Error::invalid_parameter("name", format!("cannot contain {:?}", c)));
    }
    Ok(())
}

pub struct MetadataStore<T: Resource> {
    folder: Arc<dyn MetadataFolder>,
    cache: Arc<ResourceCache<T>>,
    timeout: Duration,
}

impl<T: Resource> MetadataStore<T> {
    pub fn new(folder: Arc<dyn MetadataFolder>, timeout: Duration) -> Self {
        Self {
            folder,
            cache: Arc::new(ResourceCache::new(T::KIND)),
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ResourceCache<T>> {
        &self.cache
    }

    fn by_id() -> String {
        format!("{}/byID", T::FOLDER)
    }

    fn by_name() -> String {
        format!("{}/byName", T::FOLDER)
    }

    /// Claims a name for a resource about to be created.
    pub fn reserve(&self, name: &str) -> Result<Reservation<T>> {
        self.cache.reserve(name)
    }

    /// Loads a resource by ID or name: cache first, then the folder.
    ///
    /// `NotFound` means no record exists; any other error is a failure to
    /// reach the metadata. While another operation holds the reservation
    /// of `reference`, waits for it until the metadata timeout or `cancel`.
    pub async fn load(&self, reference: &str, cancel: &CancellationToken) -> Result<Arc<T>> {
        if reference.is_empty() {
            return Err(Error::invalid_parameter("reference", "cannot be empty"));
        }

        retry::while_unsuccessful(
            move || self.try_load(reference),
            RESERVED_POLL,
            self.timeout,
            cancel,
        )
        .await
        .map_err(|e| match e {
            Error::Timeout { .. } => e.annotate(format!(
                "{} '{}' stayed reserved by another operation",
                T::KIND,
                reference
            )),
            other => other,
        })
    }

    async fn try_load(&self, reference: &str) -> std::result::Result<Arc<T>, Retry> {
        match self.cache.get_entry(reference) {
            Ok(found) => return Ok(found),
            Err(e) if e.kind() == ErrorKind::NotAvailable => return Err(Retry::Again(e)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(Retry::Stop(e)),
        }

        let content = self.read(reference).await.map_err(Retry::Stop)?;
        let id = content.id().to_string();
        if id != reference {
            match self.cache.get_entry(&id) {
                Ok(found) => return Ok(found),
                Err(e) if e.kind() == ErrorKind::NotAvailable => return Err(Retry::Again(e)),
                Err(_) => {}
            }
        }

        match self.cache.add_entry(content) {
            Ok(added) => Ok(added),
            // a concurrent loader won the race
            Err(e) if matches!(e.kind(), ErrorKind::Duplicate | ErrorKind::AlreadyReserved) => {
                Err(Retry::Again(e))
            }
            Err(e) => Err(Retry::Stop(e)),
        }
    }

    async fn read(&self, reference: &str) -> Result<T> {
        let bytes = match self.folder.read(&Self::by_id(), reference).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => match self.folder.read(&Self::by_name(), reference).await
            {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => return Err(Error::not_found(T::KIND, reference)),
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::from(e).annotate(format!("corrupted metadata of {} '{}'", T::KIND, reference))
        })
    }

    /// Tells whether a record exists for `reference`.
    pub async fn exists(&self, reference: &str, cancel: &CancellationToken) -> Result<bool> {
        match self.load(reference, cancel).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Tells whether the folder holds a record for `reference`, ignoring
    /// the cache. Usable while the caller holds a reservation on the name.
    pub async fn is_recorded(&self, reference: &str) -> Result<bool> {
        match self.read(reference).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Writes the current state of `resource`.
    pub async fn save(&self, resource: &T) -> Result<()> {
        let content = serde_json::to_vec(resource)?;
        let id = resource.id();
        self.folder.write(&Self::by_id(), id, &content).await?;
        self.folder
            .write(&Self::by_name(), &resource.name_key(), &content)
            .await?;
        // the entry may still be reserved when saving during creation
        let _ = self.cache.touch_entry(id);
        tracing::trace!("saved metadata of {} {}", T::KIND, id);
        Ok(())
    }

    /// Runs `f` on the resource, then persists it.
    pub async fn alter<R>(&self, resource: &T, f: impl FnOnce(&T) -> Result<R>) -> Result<R> {
        let result = f(resource)?;
        self.save(resource).await?;
        Ok(result)
    }

    /// Removes the records of `resource` and its cache entry.
    pub async fn delete(&self, resource: &T) -> Result<()> {
        self.folder
            .delete(&Self::by_name(), &resource.name_key())
            .await?;
        self.folder.delete(&Self::by_id(), resource.id()).await?;
        self.cache.remove_entry(resource.id())?;
        tracing::debug!("deleted metadata of {} {}", T::KIND, resource.id());
        Ok(())
    }

    /// Calls `callback` with every record of this kind.
    pub async fn browse(&self, mut callback: impl FnMut(T) -> Result<()> + Send) -> Result<()> {
        self.folder
            .browse(&Self::by_id(), &mut |bytes: &[u8]| {
                let resource: T = serde_json::from_slice(bytes)?;
                callback(resource)
            })
            .await
    }

    /// All records of this kind, served from the cache when present.
    pub async fn list(&self) -> Result<Vec<Arc<T>>> {
        let mut found = Vec::new();
        self.browse(|resource| {
            found.push(resource);
            Ok(())
        })
        .await?;

        Ok(found
            .into_iter()
            .map(|r| self.cache.get_entry(r.id()).unwrap_or_else(|_| Arc::new(r)))
            .collect())
    }
}
