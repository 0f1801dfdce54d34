use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{RegistrationKind, WhiskersError, WhiskersResult};
use crate::helper::{Helper, HelperRef, builtins};
use crate::partial::Partial;
use crate::template::Template;

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

// Registries and trees hold no invariant a panicking writer could break.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Inserts `value` unless `name` is taken; the map is untouched on conflict.
pub(crate) fn insert_unique<V>(
    map: &mut HashMap<String, V>,
    kind: RegistrationKind,
    name: String,
    value: V,
) -> WhiskersResult<()> {
    if map.contains_key(&name) {
        return Err(WhiskersError::AlreadyRegistered { kind, name });
    }
    map.insert(name, value);
    Ok(())
}

/// Panics with the conflict message. Duplicate registration is a
/// configuration bug, not a runtime condition.
#[track_caller]
pub(crate) fn fatal_on_conflict(result: WhiskersResult<()>) {
    if let Err(err) = result {
        panic!("{err}");
    }
}

/// File base name without its extension, used as a partial name.
pub(crate) fn file_base(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn read_source(path: &Path) -> WhiskersResult<String> {
    std::fs::read_to_string(path).map_err(|source| WhiskersError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The shared tier of helpers and partials that every [`Template`] falls back
/// to after its own registrations.
///
/// [`Registry::global`] is the process-wide default. Independent registries
/// can be built with [`Registry::new`] and handed to templates with
/// [`Template::with_registry`], which keeps tests and tenants from seeing
/// each other's partials.
pub struct Registry {
    helpers: RwLock<HashMap<String, HelperRef>>,
    partials: RwLock<HashMap<String, Arc<Partial>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut helpers: Vec<String> = read_lock(&self.helpers).keys().cloned().collect();
        let mut partials: Vec<String> = read_lock(&self.partials).keys().cloned().collect();
        helpers.sort();
        partials.sort();
        f.debug_struct("Registry")
            .field("helpers", &helpers)
            .field("partials", &partials)
            .finish()
    }
}

impl Registry {
    /// A registry holding the built-in helpers and no partials.
    pub fn new() -> Self {
        let registry = Self::empty();
        {
            let mut helpers = write_lock(&registry.helpers);
            for (name, helper) in builtins() {
                helpers.insert(name.to_string(), helper);
            }
        }
        registry
    }

    /// A registry with no helpers and no partials.
    pub fn empty() -> Self {
        Self {
            helpers: RwLock::new(HashMap::new()),
            partials: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry. Never cleared.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Registers a helper visible to every template using this registry.
    ///
    /// # Panics
    /// If `name` is already registered.
    #[track_caller]
    pub fn register_helper<N: Into<String>, H: Helper + 'static>(&self, name: N, helper: H) {
        fatal_on_conflict(self.try_register_helper(name, helper));
    }

    /// Like [`register_helper`](Self::register_helper), returning the conflict
    /// instead of panicking.
    pub fn try_register_helper<N: Into<String>, H: Helper + 'static>(
        &self,
        name: N,
        helper: H,
    ) -> WhiskersResult<()> {
        let name = name.into();
        debug!(helper = %name, "registering global helper");
        insert_unique(
            &mut write_lock(&self.helpers),
            RegistrationKind::Helper,
            name,
            Arc::new(helper) as HelperRef,
        )
    }

    pub fn find_helper(&self, name: &str) -> Option<HelperRef> {
        read_lock(&self.helpers).get(name).cloned()
    }

    pub fn has_helper(&self, name: &str) -> bool {
        read_lock(&self.helpers).contains_key(name)
    }

    /// Registers a partial from source, parsed on first use.
    ///
    /// # Panics
    /// If `name` is already registered.
    #[track_caller]
    pub fn register_partial<N: Into<String>, S: Into<String>>(
        &self,
        name: N,
        source: S,
        unescaped: bool,
    ) {
        fatal_on_conflict(self.try_register_partial(name, source, unescaped));
    }

    pub fn try_register_partial<N: Into<String>, S: Into<String>>(
        &self,
        name: N,
        source: S,
        unescaped: bool,
    ) -> WhiskersResult<()> {
        let name = name.into();
        let partial = Partial::from_source(name.clone(), source.into(), unescaped);
        self.add_partial(name, partial)
    }

    /// # Panics
    /// If any name is already registered. Earlier entries stay registered.
    #[track_caller]
    pub fn register_partials<I, N, S>(&self, partials: I, unescaped: bool)
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        for (name, source) in partials {
            self.register_partial(name, source, unescaped);
        }
    }

    /// Registers an already parsed template as a partial.
    ///
    /// # Panics
    /// If `name` is already registered.
    #[track_caller]
    pub fn register_partial_template<N: Into<String>, T: Into<Arc<Template>>>(
        &self,
        name: N,
        template: T,
    ) {
        let name = name.into();
        let partial = Partial::from_template(name.clone(), template.into());
        fatal_on_conflict(self.add_partial(name, partial));
    }

    /// Reads `path` and registers its content under `name`.
    ///
    /// # Errors
    /// If the file cannot be read.
    ///
    /// # Panics
    /// If `name` is already registered.
    #[track_caller]
    pub fn register_partial_file<P: AsRef<Path>, N: Into<String>>(
        &self,
        path: P,
        name: N,
        unescaped: bool,
    ) -> WhiskersResult<()> {
        let source = read_source(path.as_ref())?;
        self.register_partial(name, source, unescaped);
        Ok(())
    }

    /// Registers every file under its base name, without extension.
    ///
    /// # Errors
    /// On the first file that cannot be read.
    #[track_caller]
    pub fn register_partial_files<I, P>(&self, paths: I, unescaped: bool) -> WhiskersResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let path = path.as_ref();
            self.register_partial_file(path, file_base(path), unescaped)?;
        }
        Ok(())
    }

    pub fn find_partial(&self, name: &str) -> Option<Arc<Partial>> {
        read_lock(&self.partials).get(name).cloned()
    }

    fn add_partial(&self, name: String, partial: Partial) -> WhiskersResult<()> {
        debug!(partial = %name, "registering global partial");
        insert_unique(
            &mut write_lock(&self.partials),
            RegistrationKind::Partial,
            name,
            Arc::new(partial),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::helper::HelperCall;

    fn noop(_: &mut HelperCall<'_>) -> WhiskersResult<Value> {
        Ok(Value::Null)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_new_registry_has_builtins() {
        let registry = Registry::new();
        for name in ["if", "unless", "each", "with", "lookup", "log"] {
            assert!(registry.has_helper(name), "missing builtin {name}");
        }
        assert!(!Registry::empty().has_helper("if"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_duplicate_helper_is_reported_and_not_applied() {
        let registry = Registry::empty();
        registry.try_register_helper("noop", noop).unwrap();
        let err = registry.try_register_helper("noop", noop).unwrap_err();
        assert!(matches!(
            err,
            WhiskersError::AlreadyRegistered {
                kind: RegistrationKind::Helper,
                ref name
            } if name == "noop"
        ));
    }

    #[test]
    #[should_panic(expected = "Partial header already registered")]
    fn test_duplicate_partial_panics() {
        let registry = Registry::empty();
        registry.register_partial("header", "<h1>", false);
        registry.register_partial("header", "<h1>", false);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_independent_registries_do_not_share_partials() {
        let a = Registry::empty();
        let b = Registry::empty();
        a.register_partial("only_a", "x", false);
        assert!(a.find_partial("only_a").is_some());
        assert!(b.find_partial("only_a").is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_file_base() {
        assert_eq!(file_base(Path::new("/tmp/partials/header.hbs")), "header");
        assert_eq!(file_base(Path::new("footer")), "footer");
    }
}
