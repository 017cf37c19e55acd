use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock, RwLock,
    },
};

use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// A handle to an object published in an [`ObjectStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A store of immutable objects shared between the workers of an ensemble.
///
/// Objects are published once with `put` and read any number of times through their handle.
/// The transport behind a store is opaque to the simulation.
pub trait ObjectStore: Sync {
    /// Connects to the store at the given location.
    fn connect(location: &str) -> Result<Self>
    where
        Self: Sized;

    /// Publishes an object and returns its handle.
    fn put<T: Any + Send + Sync>(&self, value: T) -> Result<ObjectId>;

    /// Returns a shared reference to a published object.
    fn get<T: Any + Send + Sync>(&self, id: ObjectId) -> Result<Arc<T>>;
}

type Objects = FxHashMap<ObjectId, Arc<dyn Any + Send + Sync>>;

/// An in-process object store. Objects are shared by reference counting, never copied.
///
/// Stores obtained by connecting to the same location see the same objects.
#[derive(Clone, Default)]
pub struct SharedStore {
    objects: Arc<RwLock<Objects>>,
    next_id: Arc<AtomicU64>,
}

static LOCATIONS: OnceLock<Mutex<FxHashMap<String, SharedStore>>> = OnceLock::new();

fn poisoned<E>(_: E) -> Error {
    Error::InvariantViolation("a thread panicked while holding the object store lock".to_owned())
}

impl SharedStore {
    pub fn new() -> SharedStore {
        SharedStore::default()
    }

    /// The number of published objects.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl ObjectStore for SharedStore {
    fn connect(location: &str) -> Result<SharedStore> {
        let mut locations = LOCATIONS
            .get_or_init(Default::default)
            .lock()
            .map_err(poisoned)?;
        Ok(locations.entry(location.to_owned()).or_default().clone())
    }

    fn put<T: Any + Send + Sync>(&self, value: T) -> Result<ObjectId> {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(id, Arc::new(value));
        Ok(id)
    }

    fn get<T: Any + Send + Sync>(&self, id: ObjectId) -> Result<Arc<T>> {
        let object = self
            .objects
            .read()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no object {id} in the store")))?;
        object.downcast::<T>().map_err(|_| {
            Error::Configuration(format!(
                "object {id} is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }
}
