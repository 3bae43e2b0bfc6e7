//! Name-keyed registry of shared instances with collective teardown.
//!
//! Unlike statics, instances registered here can all be destroyed at a
//! chosen moment via [`reset_all`]; after that, [`get_or_init`] returns an
//! empty handle until [`set_operational`] re-enables creation. Tests use
//! this to force a deterministic teardown order between components that
//! depend on each other's longevity.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;

struct RegistryInner {
    entries: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
    operational: bool,
}

static REGISTRY: Lazy<Mutex<RegistryInner>> = Lazy::new(|| {
    Mutex::new(RegistryInner {
        entries: BTreeMap::new(),
        operational: true,
    })
});

fn registry() -> std::sync::MutexGuard<'static, RegistryInner> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors from the singleton registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingletonError {
    /// The name is already registered under a different type.
    TypeConflict { name: String },
}

impl fmt::Display for SingletonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SingletonError::TypeConflict { name } => {
                write!(f, "singleton '{name}' is registered under a different type")
            }
        }
    }
}

impl std::error::Error for SingletonError {}

/// Retrieve the instance registered under `name`, constructing it with
/// `init` on first use.
///
/// Returns `Ok(None)` while the registry is shut down (after [`reset_all`]
/// and before [`set_operational`]). `init` runs under the registry lock and
/// must not call back into the registry.
pub fn get_or_try_init<T, E, F>(name: &str, init: F) -> Result<Option<Arc<T>>, E>
where
    T: Send + Sync + 'static,
    E: From<SingletonError>,
    F: FnOnce() -> Result<T, E>,
{
    let mut inner = registry();
    if !inner.operational {
        tracing::debug!(
            name,
            "refusing to create singleton: registry was reset and is not operational"
        );
        return Ok(None);
    }
    if let Some(existing) = inner.entries.get(name) {
        return match Arc::clone(existing).downcast::<T>() {
            Ok(instance) => Ok(Some(instance)),
            Err(_) => Err(E::from(SingletonError::TypeConflict {
                name: name.to_string(),
            })),
        };
    }
    let instance = Arc::new(init()?);
    tracing::debug!(name, "constructed singleton");
    inner.entries.insert(
        name.to_string(),
        Arc::clone(&instance) as Arc<dyn Any + Send + Sync>,
    );
    Ok(Some(instance))
}

/// Infallible-constructor convenience over [`get_or_try_init`].
pub fn get_or_init<T, F>(name: &str, init: F) -> Result<Option<Arc<T>>, SingletonError>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T,
{
    get_or_try_init(name, || Ok(init()))
}

/// Remove a single entry. Callers still holding a handle keep the instance
/// alive; the registry just forgets the name.
pub fn release(name: &str) {
    tracing::debug!(name, "releasing singleton");
    registry().entries.remove(name);
}

/// Drop every registered instance and refuse further creation until
/// [`set_operational`] is called.
pub fn reset_all() {
    tracing::debug!("resetting all singletons");
    let mut inner = registry();
    inner.operational = false;
    inner.entries.clear();
}

/// End the shut-down state, allowing singletons to be created again.
pub fn set_operational() {
    tracing::debug!("singleton registry operational again");
    registry().operational = true;
}
