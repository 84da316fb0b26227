//! Annotation-processor registry and registration handles.
//!
//! Processors are keyed by annotation name and stored in registration order.
//! Nova-defined processors (callable values) and native processors (trait
//! objects) live in the same list and are told apart at dispatch time. Each
//! registration returns a [`ProcessorHandle`] supporting `register` (append
//! to the end again), `unregister` (remove only this entry), and `replace`
//! (swap the handler in place, order preserved).

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    error::RunResult,
    types::class::ClassDef,
    value::Value,
};

/// Reflection surface handed to native processors: the completed class.
#[derive(Debug, Clone)]
pub struct ClassTarget {
    pub class: Arc<ClassDef>,
}

impl ClassTarget {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.class.name
    }

    /// Writes a static field on the target class.
    pub fn set_static_field(&self, name: &str, value: Value) {
        self.class.set_static_field(name, value);
    }
}

/// A native (host-registered) annotation processor.
pub trait NativeProcessor: std::fmt::Debug + Send + Sync {
    /// The annotation name this processor reacts to.
    fn annotation_name(&self) -> &str;

    /// Invoked when a class carrying the annotation completes definition.
    fn process_class(&self, target: &ClassTarget, args: &IndexMap<String, Value>) -> RunResult<()>;
}

/// One registered processor: Nova-defined callable or native trait object.
#[derive(Debug, Clone)]
pub enum Processor {
    Script(Value),
    Native(Arc<dyn NativeProcessor>),
}

#[derive(Debug, Clone)]
struct RegEntry {
    id: u64,
    processor: Processor,
}

/// Registry: annotation name -> ordered processor list.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<AHashMap<String, Vec<RegEntry>>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates a registry with the built-in `data` and `builder` processors
    /// pre-registered.
    #[must_use]
    pub fn with_builtins(registry: &Arc<Self>) -> (Arc<ProcessorHandle>, Arc<ProcessorHandle>) {
        let data = registry.register("data", Processor::Native(Arc::new(DataProcessor)));
        let builder = registry.register("builder", Processor::Native(Arc::new(BuilderProcessor)));
        (data, builder)
    }

    /// Appends a processor for `name`, returning its handle.
    pub fn register(self: &Arc<Self>, name: &str, processor: Processor) -> Arc<ProcessorHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("registry lock")
            .entry(name.to_owned())
            .or_default()
            .push(RegEntry {
                id,
                processor: processor.clone(),
            });
        Arc::new(ProcessorHandle {
            name: name.to_owned(),
            id,
            registry: Arc::downgrade(self),
            processor: Mutex::new(processor),
        })
    }

    fn append_existing(&self, name: &str, id: u64, processor: Processor) {
        let mut entries = self.entries.lock().expect("registry lock");
        let list = entries.entry(name.to_owned()).or_default();
        if list.iter().any(|e| e.id == id) {
            return; // still registered; keep current position
        }
        list.push(RegEntry { id, processor });
    }

    fn remove(&self, name: &str, id: u64) {
        if let Some(list) = self.entries.lock().expect("registry lock").get_mut(name) {
            list.retain(|e| e.id != id);
        }
    }

    fn swap(&self, name: &str, id: u64, processor: Processor) {
        if let Some(list) = self.entries.lock().expect("registry lock").get_mut(name) {
            if let Some(entry) = list.iter_mut().find(|e| e.id == id) {
                entry.processor = processor;
            }
        }
    }

    /// Processors for one annotation, in registration order.
    #[must_use]
    pub fn processors_for(&self, name: &str) -> Vec<Processor> {
        self.entries
            .lock()
            .expect("registry lock")
            .get(name)
            .map(|list| list.iter().map(|e| e.processor.clone()).collect())
            .unwrap_or_default()
    }
}

/// Controller for a single registration.
///
/// Holds only a weak link to the registry: a handle cannot keep the
/// interpreter alive.
#[derive(Debug)]
pub struct ProcessorHandle {
    pub name: String,
    pub id: u64,
    registry: Weak<Registry>,
    processor: Mutex<Processor>,
}

impl ProcessorHandle {
    /// Re-registers after an `unregister`: appends to the end of the list
    /// (registration order is re-observed). A no-op while still registered.
    pub fn register(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let processor = self.processor.lock().expect("handle lock").clone();
            registry.append_existing(&self.name, self.id, processor);
        }
    }

    /// Removes only this handle's entry; other handlers for the same name
    /// are unaffected.
    pub fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.name, self.id);
        }
    }

    /// Swaps the handler function in place (order preserved).
    pub fn replace(&self, new_handler: Processor) {
        *self.processor.lock().expect("handle lock") = new_handler.clone();
        if let Some(registry) = self.registry.upgrade() {
            registry.swap(&self.name, self.id, new_handler);
        }
    }
}

// --- built-in processors ---

/// `@data`: marks the class so the VM synthesizes `equals`, `toString`,
/// `hashCode`, `copy` and `componentN`.
#[derive(Debug)]
struct DataProcessor;

impl NativeProcessor for DataProcessor {
    fn annotation_name(&self) -> &str {
        "data"
    }

    fn process_class(&self, target: &ClassTarget, _args: &IndexMap<String, Value>) -> RunResult<()> {
        target.class.mark_data();
        Ok(())
    }
}

/// `@builder`: marks the class so `ClassName.builder()` synthesizes a fluent
/// builder object.
#[derive(Debug)]
struct BuilderProcessor;

impl NativeProcessor for BuilderProcessor {
    fn annotation_name(&self) -> &str {
        "builder"
    }

    fn process_class(&self, target: &ClassTarget, _args: &IndexMap<String, Value>) -> RunResult<()> {
        target.class.mark_builder();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Recorder(&'static str);

    impl NativeProcessor for Recorder {
        fn annotation_name(&self) -> &str {
            self.0
        }

        fn process_class(&self, _target: &ClassTarget, _args: &IndexMap<String, Value>) -> RunResult<()> {
            Ok(())
        }
    }

    fn ids(registry: &Registry, name: &str) -> usize {
        registry.processors_for(name).len()
    }

    #[test]
    fn unregister_removes_only_own_entry() {
        let registry = Arc::new(Registry::default());
        let first = registry.register("tag", Processor::Native(Arc::new(Recorder("tag"))));
        let _second = registry.register("tag", Processor::Native(Arc::new(Recorder("tag"))));
        assert_eq!(ids(&registry, "tag"), 2);
        first.unregister();
        assert_eq!(ids(&registry, "tag"), 1);
    }

    #[test]
    fn re_register_appends_to_end() {
        let registry = Arc::new(Registry::default());
        let first = registry.register("tag", Processor::Native(Arc::new(Recorder("a"))));
        let _second = registry.register("tag", Processor::Native(Arc::new(Recorder("b"))));
        first.unregister();
        first.register();
        let processors = registry.processors_for("tag");
        assert_eq!(processors.len(), 2);
        // The re-registered handler is now last.
        let Processor::Native(last) = &processors[1] else { panic!() };
        assert_eq!(format!("{last:?}"), "Recorder(\"a\")");
    }

    #[test]
    fn register_while_registered_keeps_position() {
        let registry = Arc::new(Registry::default());
        let first = registry.register("tag", Processor::Native(Arc::new(Recorder("a"))));
        let _second = registry.register("tag", Processor::Native(Arc::new(Recorder("b"))));
        first.register();
        let processors = registry.processors_for("tag");
        assert_eq!(processors.len(), 2);
        let Processor::Native(head) = &processors[0] else { panic!() };
        assert_eq!(format!("{head:?}"), "Recorder(\"a\")");
    }
}
