//! Class metadata and object instances.
//!
//! A [`ClassDef`] is created by executing a `class` declaration and is itself
//! a first-class value: calling it instantiates it (unless it is an
//! annotation class). Instances hold a strong reference to their class plus
//! an insertion-ordered field map. Builder objects produced by `@builder`'s
//! `builder()` are ordinary instances with `builder_target` set.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    loader::ModuleBindings,
    mir::{ClassKind, FuncId, MirCtorParam, MirModule},
    value::Value,
};

/// One `@name(args)` use recorded on a class.
#[derive(Debug, Clone)]
pub struct ClassAnnotation {
    pub name: String,
    /// Declared parameter name (or positional index string) -> evaluated Value.
    pub args: IndexMap<String, Value>,
}

/// Runtime class metadata.
#[derive(Debug)]
pub struct ClassDef {
    pub name: String,
    pub kind: ClassKind,
    pub is_open: bool,
    /// Ordered primary-constructor parameters.
    pub ctor_params: Vec<MirCtorParam>,
    /// Compiled code of the defining module; methods and init refer into it.
    pub code: Arc<MirModule>,
    /// Defining module's global bindings, used by method bodies.
    pub globals: Arc<ModuleBindings>,
    /// Constructor-init function (defaults, super call, fields, body).
    pub init_func: Option<FuncId>,
    /// Ordered method table.
    pub methods: IndexMap<String, FuncId>,
    pub static_methods: IndexMap<String, FuncId>,
    /// Static-field table; `setStaticField` and `Class.field` go through here.
    pub statics: Mutex<IndexMap<String, Value>>,
    /// Non-private field names, in declaration order.
    pub field_names: Vec<String>,
    pub private_fields: AHashSet<String>,
    /// Superclass: a Nova `Class` value or a host class (`ExternalObject`).
    pub superclass: Option<Value>,
    pub interfaces: Vec<Arc<ClassDef>>,
    pub annotations: Vec<ClassAnnotation>,
    /// Set by the built-in `data` processor.
    is_data: AtomicBool,
    /// Set by the built-in `builder` processor.
    is_builder: AtomicBool,
}

impl ClassDef {
    #[expect(clippy::too_many_arguments, reason = "single construction point in the VM")]
    #[must_use]
    pub fn new(
        name: String,
        kind: ClassKind,
        is_open: bool,
        ctor_params: Vec<MirCtorParam>,
        code: Arc<MirModule>,
        globals: Arc<ModuleBindings>,
        init_func: Option<FuncId>,
        methods: IndexMap<String, FuncId>,
        static_methods: IndexMap<String, FuncId>,
        field_names: Vec<String>,
        private_fields: AHashSet<String>,
        superclass: Option<Value>,
        interfaces: Vec<Arc<Self>>,
        annotations: Vec<ClassAnnotation>,
    ) -> Self {
        Self {
            name,
            kind,
            is_open,
            ctor_params,
            code,
            globals,
            init_func,
            methods,
            static_methods,
            statics: Mutex::new(IndexMap::new()),
            field_names,
            private_fields,
            superclass,
            interfaces,
            annotations,
            is_data: AtomicBool::new(false),
            is_builder: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_annotation(&self) -> bool {
        self.kind == ClassKind::Annotation
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        self.kind == ClassKind::Object
    }

    #[must_use]
    pub fn is_data(&self) -> bool {
        self.is_data.load(Ordering::Acquire)
    }

    pub fn mark_data(&self) {
        self.is_data.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_builder(&self) -> bool {
        self.is_builder.load(Ordering::Acquire)
    }

    pub fn mark_builder(&self) {
        self.is_builder.store(true, Ordering::Release);
    }

    /// Own method lookup; the VM layers superclass/interface/extension
    /// resolution on top.
    #[must_use]
    pub fn own_method(&self, name: &str) -> Option<FuncId> {
        self.methods.get(name).copied()
    }

    /// Reads a static field.
    #[must_use]
    pub fn static_field(&self, name: &str) -> Option<Value> {
        self.statics.lock().expect("statics lock").get(name).cloned()
    }

    /// Writes a static field (also the processor-facing `setStaticField`).
    pub fn set_static_field(&self, name: &str, value: Value) {
        self.statics.lock().expect("statics lock").insert(name.to_owned(), value);
    }

    /// True when `other` appears in this class's superclass chain or
    /// interface list (used by `is` checks).
    #[must_use]
    pub fn conforms_to(&self, type_name: &str) -> bool {
        if self.name == type_name {
            return true;
        }
        if self.interfaces.iter().any(|i| i.conforms_to(type_name)) {
            return true;
        }
        let mut current = self.superclass.clone();
        while let Some(value) = current {
            match value {
                Value::Class(class) => {
                    if class.conforms_to(type_name) {
                        return true;
                    }
                    current = None;
                }
                Value::ExternalObject(host) => return host.type_name() == type_name,
                _ => current = None,
            }
        }
        false
    }

    /// Whether instances may read/write `field` from outside the class.
    #[must_use]
    pub fn field_is_private(&self, field: &str) -> bool {
        self.private_fields.contains(field)
    }
}

/// An instance of a [`ClassDef`].
#[derive(Debug)]
pub struct ObjectInner {
    pub class: Arc<ClassDef>,
    pub fields: Mutex<IndexMap<String, Value>>,
    /// For builder objects: the class `build()` will instantiate.
    pub builder_target: Option<Arc<ClassDef>>,
    /// Opaque host delegate when the class extends a host class.
    pub host_delegate: Option<Value>,
}

impl ObjectInner {
    #[must_use]
    pub fn new(class: Arc<ClassDef>) -> Self {
        Self {
            class,
            fields: Mutex::new(IndexMap::new()),
            builder_target: None,
            host_delegate: None,
        }
    }

    #[must_use]
    pub fn builder_for(builder_class: Arc<ClassDef>, target: Arc<ClassDef>) -> Self {
        Self {
            class: builder_class,
            fields: Mutex::new(IndexMap::new()),
            builder_target: Some(target),
            host_delegate: None,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.lock().expect("fields lock").get(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.lock().expect("fields lock").insert(name.to_owned(), value);
    }

    /// `(name, value)` for each constructor parameter that is a field, in
    /// declaration order. Drives `@data` equality, `toString`, `hashCode`,
    /// `copy` and `componentN`.
    #[must_use]
    pub fn ctor_field_values(&self) -> Vec<(String, Value)> {
        let fields = self.fields.lock().expect("fields lock");
        self.class
            .ctor_params
            .iter()
            .filter(|p| p.binding != crate::mir::FieldKind::None)
            .map(|p| (p.name.clone(), fields.get(&p.name).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// All field names visible for processor reflection, with privacy info.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.lock().expect("fields lock").keys().cloned().collect()
    }
}
