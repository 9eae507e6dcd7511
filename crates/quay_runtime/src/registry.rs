//! The in-page module registry: `define` records factories under
//! exact-version paths, `require` resolves semver-ranged paths against them
//! and instantiates each module once.
//!
//! The registry is an arena: it owns every factory and instance, modules
//! reference each other only through string ids, and nothing is ever
//! evicted. Execution is single-threaded cooperative, so the whole state
//! sits behind `Rc<RefCell<..>>`.

use crate::loader::{BundleEntry, BundleHost, LoadCallback, LoadFuture};
use quay_manifest::VersionedPath;
use semver::{Version, VersionReq};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequireError {
    #[error("path '{path}' does not match the versioned module grammar")]
    BadPath { path: String },

    #[error("no module registered for package '{pkg}' at '{sub}'")]
    NoMatch { pkg: String, sub: String },

    #[error("no registered version of '{pkg}{sub}' satisfies '{range}'")]
    NoSatisfying { pkg: String, range: String, sub: String },
}

pub type ExportFn = Rc<dyn Fn(&[Value]) -> Value>;

/// A single slot of a module's export table.
#[derive(Clone)]
pub enum Export {
    Json(Value),
    Function(ExportFn),
    Object(Exports),
    List(Vec<Export>),
}

impl Export {
    pub fn str(value: &str) -> Export {
        Export::Json(Value::String(value.to_string()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Export::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Export::Json(v) => v.fmt(f),
            Export::Function(_) => f.write_str("[function]"),
            Export::Object(o) => o.fmt(f),
            Export::List(l) => l.fmt(f),
        }
    }
}

/// A module's export table. Clones share the same underlying object, so
/// identity survives across `require` calls and through cycles; reads of
/// absent keys yield `None`.
#[derive(Clone, Default)]
pub struct Exports {
    slots: Rc<RefCell<BTreeMap<String, Export>>>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Export> {
        self.slots.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Export) {
        self.slots.borrow_mut().insert(key.into(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.borrow().keys().cloned().collect()
    }

    /// Object identity, the property `instanceof` checks rely on.
    pub fn same(a: &Exports, b: &Exports) -> bool {
        Rc::ptr_eq(&a.slots, &b.slots)
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.slots.borrow().iter()).finish()
    }
}

#[derive(Debug)]
struct ModuleInstance {
    id: String,
    exports: Exports,
    loaded: bool,
}

/// Handle passed to factories as their `module` argument.
#[derive(Clone, Debug)]
pub struct ModuleHandle {
    inner: Rc<RefCell<ModuleInstance>>,
}

impl ModuleHandle {
    fn new(id: &str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ModuleInstance {
                id: id.to_string(),
                exports: Exports::new(),
                loaded: false,
            })),
        }
    }

    pub fn id(&self) -> String {
        self.inner.borrow().id.clone()
    }

    pub fn exports(&self) -> Exports {
        self.inner.borrow().exports.clone()
    }

    /// The `module.exports = ...` form. Cycle participants that captured
    /// the original table keep seeing it, as in the ecosystem convention.
    pub fn set_exports(&self, exports: Exports) {
        self.inner.borrow_mut().exports = exports;
    }

    pub fn loaded(&self) -> bool {
        self.inner.borrow().loaded
    }

    fn mark_loaded(&self) {
        self.inner.borrow_mut().loaded = true;
    }
}

pub type Factory = Rc<dyn Fn(&ModuleHandle, &Exports, &Require)>;

struct ModuleEntry {
    path: VersionedPath,
    version: Version,
    factory: Factory,
    instance: Option<ModuleHandle>,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    // Keys are canonical exact-version paths; the codec is lossless so the
    // define string is its own canonical form.
    modules: HashMap<String, ModuleEntry>,
    // Raw request string -> resolved module id. Success-only and never
    // invalidated; the registry is monotonic.
    resolutions: HashMap<String, String>,
    pub(crate) bundles: HashMap<String, BundleEntry>,
}

/// One isolated module arena. Clones share state; separate `new` calls
/// share nothing.
#[derive(Clone)]
pub struct Registry {
    pub(crate) state: Rc<RefCell<RegistryState>>,
    pub(crate) host: Rc<dyn BundleHost>,
}

impl Registry {
    pub fn new(host: impl BundleHost + 'static) -> Self {
        Self {
            state: Rc::new(RefCell::new(RegistryState::default())),
            host: Rc::new(host),
        }
    }

    /// Record a factory under an exact-version path. First writer wins:
    /// re-definition is a no-op, which lets overlapping chunks carry copies
    /// of the same shared library without conflict.
    pub fn define<F>(&self, path: &str, factory: F) -> Result<(), RequireError>
    where
        F: Fn(&ModuleHandle, &Exports, &Require) + 'static,
    {
        let parsed = VersionedPath::parse(path).ok_or_else(|| RequireError::BadPath {
            path: path.to_string(),
        })?;
        let version = Version::parse(&parsed.version).map_err(|_| RequireError::BadPath {
            path: path.to_string(),
        })?;
        let mut state = self.state.borrow_mut();
        if state.modules.contains_key(path) {
            tracing::debug!("module '{}' already defined, keeping the first factory", path);
            return Ok(());
        }
        tracing::debug!("defined module '{}'", path);
        state.modules.insert(
            path.to_string(),
            ModuleEntry {
                path: parsed,
                version,
                factory: Rc::new(factory),
                instance: None,
            },
        );
        Ok(())
    }

    /// Resolve a ranged path and return the module's exports, instantiating
    /// the module on first use.
    pub fn require(&self, path: &str) -> Result<Exports, RequireError> {
        let id = self.resolve(path)?;
        let (factory, handle) = {
            let mut state = self.state.borrow_mut();
            let entry = match state.modules.get_mut(&id) {
                Some(entry) => entry,
                // Entries are never removed, so a cached resolution always
                // has a live entry; kept total anyway.
                None => {
                    let parsed =
                        VersionedPath::parse(path).ok_or_else(|| RequireError::BadPath {
                            path: path.to_string(),
                        })?;
                    return Err(RequireError::NoMatch {
                        pkg: parsed.pkg,
                        sub: parsed.sub,
                    });
                }
            };
            if let Some(instance) = &entry.instance {
                return Ok(instance.exports());
            }
            let handle = ModuleHandle::new(&id);
            // Inserted before the factory runs so cyclic requires observe
            // the same, partially built exports object.
            entry.instance = Some(handle.clone());
            (entry.factory.clone(), handle)
        };
        tracing::debug!("instantiating module '{}'", id);
        let require = self.require_fn();
        let exports = handle.exports();
        (factory)(&handle, &exports, &require);
        handle.mark_loaded();
        Ok(handle.exports())
    }

    /// The bound require handle rewritten module bodies receive.
    pub fn require_fn(&self) -> Require {
        Require { registry: self.clone() }
    }

    fn resolve(&self, path: &str) -> Result<String, RequireError> {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.resolutions.get(path) {
            return Ok(id.clone());
        }
        let parsed = VersionedPath::parse(path).ok_or_else(|| RequireError::BadPath {
            path: path.to_string(),
        })?;
        let range = VersionReq::parse(&parsed.version).map_err(|_| RequireError::BadPath {
            path: path.to_string(),
        })?;

        let resolved = {
            let mut best: Option<(&Version, &str)> = None;
            let mut matched_any = false;
            for (id, entry) in &state.modules {
                if entry.path.pkg != parsed.pkg || entry.path.sub != parsed.sub {
                    continue;
                }
                matched_any = true;
                if !range.matches(&entry.version) {
                    continue;
                }
                // Maximally satisfying version wins.
                if best.map_or(true, |(v, _)| entry.version > *v) {
                    best = Some((&entry.version, id.as_str()));
                }
            }
            if !matched_any {
                return Err(RequireError::NoMatch {
                    pkg: parsed.pkg,
                    sub: parsed.sub,
                });
            }
            match best {
                Some((_, id)) => id.to_string(),
                None => {
                    return Err(RequireError::NoSatisfying {
                        pkg: parsed.pkg,
                        range: parsed.version,
                        sub: parsed.sub,
                    })
                }
            }
        };
        tracing::debug!("resolved '{}' -> '{}'", path, resolved);
        // Failed resolutions are not memoised; a later define can still
        // satisfy a retried request.
        state.resolutions.insert(path.to_string(), resolved.clone());
        Ok(resolved)
    }
}

/// Stable bound require: the call form plus the `ensure` surface, so
/// rewritten bodies issue both through a single name.
#[derive(Clone)]
pub struct Require {
    registry: Registry,
}

impl Require {
    pub fn require(&self, path: &str) -> Result<Exports, RequireError> {
        self.registry.require(path)
    }

    pub fn ensure(&self, url: &str, callback: Option<LoadCallback>) -> LoadFuture {
        self.registry.ensure_bundle(url, callback)
    }
}
