//! Module cache and path resolution.
//!
//! Modules are `.nova` files under the script base path. A dotted import
//! path `a.b.c` resolves to `base/a/b/c.nova` first, then `base/a/b.nova`
//! with trailing symbol `c`. Loading is lazy with `NotLoaded -> Loading ->
//! Loaded/Failed` states; a module observed in `Loading` state (an import
//! cycle) hands out its live binding table, Python-style.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    error::{Error, RunResult},
    value::Value,
};

/// A module's top-level binding table. Live: imports during a cycle see
/// whatever has been defined so far.
#[derive(Debug)]
pub struct ModuleBindings {
    /// Canonical dotted module name (`a.b.c`), or an origin marker for the
    /// main script / REPL.
    pub name: String,
    table: Mutex<IndexMap<String, Value>>,
}

impl ModuleBindings {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Mutex::new(IndexMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.table.lock().expect("bindings lock").get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.table.lock().expect("bindings lock").insert(name.to_owned(), value);
    }

    /// All public bindings (wildcard imports skip `$`-prefixed internals).
    #[must_use]
    pub fn public_snapshot(&self) -> Vec<(String, Value)> {
        self.table
            .lock()
            .expect("bindings lock")
            .iter()
            .filter(|(name, _)| !name.starts_with('$'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Defined names, for REPL introspection.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.table
            .lock()
            .expect("bindings lock")
            .keys()
            .filter(|name| !name.starts_with('$'))
            .cloned()
            .collect()
    }

    /// Drops every binding; used at interpreter teardown to break
    /// closure/class reference cycles.
    pub fn clear(&self) {
        self.table.lock().expect("bindings lock").clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug)]
struct ModuleEntry {
    state: LoadState,
    bindings: Arc<ModuleBindings>,
}

/// What `begin_load` found in the cache.
#[derive(Debug)]
pub enum BeginLoad {
    /// Fully loaded: use the cached bindings, do not re-execute.
    Loaded(Arc<ModuleBindings>),
    /// Currently loading (cycle): use the live partial bindings.
    Loading(Arc<ModuleBindings>),
    /// Marked `Loading` for the caller, which must execute the module and
    /// call `finish_load`.
    Fresh(Arc<ModuleBindings>),
}

/// Interpreter-lifetime module cache.
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: Mutex<AHashMap<String, ModuleEntry>>,
}

impl ModuleCache {
    /// Looks up the module, transitioning `NotLoaded`/`Failed` to `Loading`.
    pub fn begin_load(&self, canonical: &str) -> BeginLoad {
        let mut entries = self.entries.lock().expect("module cache lock");
        match entries.get(canonical) {
            Some(entry) if entry.state == LoadState::Loaded => BeginLoad::Loaded(Arc::clone(&entry.bindings)),
            Some(entry) if entry.state == LoadState::Loading => BeginLoad::Loading(Arc::clone(&entry.bindings)),
            _ => {
                let bindings = Arc::new(ModuleBindings::new(canonical));
                entries.insert(
                    canonical.to_owned(),
                    ModuleEntry {
                        state: LoadState::Loading,
                        bindings: Arc::clone(&bindings),
                    },
                );
                BeginLoad::Fresh(bindings)
            }
        }
    }

    /// Marks a `Fresh` load as finished.
    pub fn finish_load(&self, canonical: &str, ok: bool) {
        let mut entries = self.entries.lock().expect("module cache lock");
        if let Some(entry) = entries.get_mut(canonical) {
            entry.state = if ok { LoadState::Loaded } else { LoadState::Failed };
        }
    }

    /// Current state, for diagnostics.
    #[must_use]
    pub fn state(&self, canonical: &str) -> LoadState {
        self.entries
            .lock()
            .expect("module cache lock")
            .get(canonical)
            .map_or(LoadState::NotLoaded, |entry| entry.state)
    }

    /// Clears all cached modules (interpreter teardown; breaks value cycles
    /// rooted in module bindings).
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("module cache lock");
        for entry in entries.values() {
            entry.bindings.clear();
        }
        entries.clear();
    }
}

/// A resolved import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub file: PathBuf,
    /// Canonical dotted name derived from the path under the base.
    pub canonical: String,
    /// Set when the last path segment resolved to a symbol inside the
    /// parent module (`a.b.c` -> `a/b.nova` + symbol `c`).
    pub trailing_symbol: Option<String>,
}

/// Resolves a dotted module path against the script base directory.
///
/// # Errors
/// `ImportError` naming the path when no candidate file exists.
pub fn resolve(base: &Path, segments: &[String]) -> RunResult<ResolvedModule> {
    let direct: PathBuf = {
        let mut p = base.to_path_buf();
        for segment in segments {
            p.push(segment);
        }
        p.set_extension("nova");
        p
    };
    if direct.is_file() {
        return Ok(ResolvedModule {
            file: direct,
            canonical: segments.join("."),
            trailing_symbol: None,
        });
    }
    if segments.len() > 1 {
        let parent_segments = &segments[..segments.len() - 1];
        let mut parent = base.to_path_buf();
        for segment in parent_segments {
            parent.push(segment);
        }
        parent.set_extension("nova");
        if parent.is_file() {
            return Ok(ResolvedModule {
                file: parent,
                canonical: parent_segments.join("."),
                trailing_symbol: Some(segments[segments.len() - 1].clone()),
            });
        }
    }
    Err(Error::import(format!("module '{}' not found", segments.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_base(name: &str) -> PathBuf {
        let base = std::env::temp_dir().join(format!("nova-loader-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn resolves_direct_file_then_parent_symbol() {
        let base = temp_base("resolve");
        std::fs::create_dir_all(base.join("a")).unwrap();
        std::fs::write(base.join("a/b.nova"), "fun c() = 1").unwrap();

        let direct = resolve(&base, &["a".into(), "b".into()]).unwrap();
        assert_eq!(direct.canonical, "a.b");
        assert_eq!(direct.trailing_symbol, None);

        let symbolic = resolve(&base, &["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(symbolic.canonical, "a.b");
        assert_eq!(symbolic.trailing_symbol, Some("c".to_owned()));

        let missing = resolve(&base, &["nope".into()]).unwrap_err();
        assert_eq!(missing.kind(), crate::ErrorKind::ImportError);
    }

    #[test]
    fn cache_hands_out_live_bindings_during_cycles() {
        let cache = ModuleCache::default();
        let BeginLoad::Fresh(bindings) = cache.begin_load("a") else {
            panic!("expected fresh load");
        };
        bindings.set("x", Value::Int(1));
        // Re-entrant load while `Loading`: the same live table.
        let BeginLoad::Loading(live) = cache.begin_load("a") else {
            panic!("expected loading state");
        };
        assert_eq!(live.get("x"), Some(Value::Int(1)));
        live.set("y", Value::Int(2));
        assert_eq!(bindings.get("y"), Some(Value::Int(2)));

        cache.finish_load("a", true);
        let BeginLoad::Loaded(done) = cache.begin_load("a") else {
            panic!("expected loaded state");
        };
        assert!(Arc::ptr_eq(&done, &bindings));
    }
}
