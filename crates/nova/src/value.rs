//! Runtime value model: one tagged union over every Nova value.
//!
//! Small immediates (numbers, bools, chars) are stored inline; everything
//! else is `Arc`-shared. Mutable containers use `Mutex` interiors because
//! `async`/`launch` tasks run on host threads and may share values. Equality,
//! hashing and rendering are dense dispatch over tags; user-defined `equals`
//! and `toString` overrides are layered on top by the VM.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
};

use indexmap::{IndexMap, IndexSet};

use crate::{
    annotations::ProcessorHandle,
    concurrency::{ChannelValue, MutexValue, TaskHandle, TaskScope},
    loader::ModuleBindings,
    mir::{FuncId, MirModule},
    types::class::{ClassDef, ObjectInner},
};

/// A shared mutable variable cell; closures capture locals through these.
pub type CellRef = Arc<Mutex<Value>>;

/// A Nova runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Internal sentinel for an unbound defaulted parameter. Never observable
    /// from Nova code.
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Map(Arc<Mutex<IndexMap<Value, Value>>>),
    Set(Arc<Mutex<IndexSet<Value>>>),
    Range(Arc<RangeValue>),
    Pair(Arc<PairValue>),
    Function(Arc<FunctionValue>),
    Class(Arc<ClassDef>),
    Object(Arc<ObjectInner>),
    Deferred(Arc<TaskHandle>),
    Job(Arc<TaskHandle>),
    Scope(Arc<TaskScope>),
    Channel(Arc<ChannelValue>),
    Mutex(Arc<MutexValue>),
    AtomicInt(Arc<AtomicI64>),
    AtomicLong(Arc<AtomicI64>),
    AtomicRef(Arc<Mutex<Value>>),
    Regex(Arc<RegexValue>),
    /// Annotation-processor registration handle.
    Handle(Arc<ProcessorHandle>),
    /// File handle from the io stdlib.
    File(Arc<FileValue>),
    /// Opaque host-managed object (java interop boundary).
    ExternalObject(Arc<dyn HostObject>),
    /// Internal iterator state for `for` loops. Never user-visible.
    Iter(Arc<Mutex<ValueIter>>),
}

/// Opaque host object behind the interop boundary.
pub trait HostObject: fmt::Debug + Send + Sync {
    /// Host-side type name reported by `typeof`.
    fn type_name(&self) -> &str;

    /// Stdlib namespace marker (`Json`, `Dispatchers`, `System`, `Time`).
    fn as_namespace(&self) -> Option<&'static str> {
        None
    }

    /// Dispatcher payload when this object is one of `Dispatchers.*`.
    fn as_dispatcher(&self) -> Option<crate::concurrency::Dispatcher> {
        None
    }
}

/// `(start, end, step, inclusive)` integer range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub inclusive: bool,
}

impl RangeValue {
    /// Number of elements produced when iterating.
    #[must_use]
    pub fn len(&self) -> i64 {
        if self.step == 0 {
            return 0;
        }
        let (lo, hi, step) = if self.step > 0 {
            (self.start, self.end, self.step)
        } else {
            (self.end, self.start, -self.step)
        };
        let span = hi - lo + if self.inclusive { 1 } else { 0 };
        if span <= 0 { 0 } else { (span + step - 1) / step }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, v: i64) -> bool {
        let in_bounds = if self.step > 0 {
            v >= self.start && (if self.inclusive { v <= self.end } else { v < self.end })
        } else {
            v <= self.start && (if self.inclusive { v >= self.end } else { v > self.end })
        };
        in_bounds && (v - self.start) % self.step == 0
    }
}

#[derive(Debug, Clone)]
pub struct PairValue {
    pub first: Value,
    pub second: Value,
}

/// Compiled regex plus its source pattern.
#[derive(Debug)]
pub struct RegexValue {
    pub pattern: String,
    pub regex: regex::Regex,
}

/// File handle: a path plus nothing else; operations go through std::fs at
/// call time so handles stay cheap and cloneable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileValue {
    pub path: std::path::PathBuf,
}

/// A callable value.
#[derive(Debug)]
pub struct FunctionValue {
    pub name: String,
    pub kind: FunctionKind,
}

#[derive(Debug)]
pub enum FunctionKind {
    User(UserFunction),
    Builtin(crate::builtins::Builtin),
    /// `receiver::method` and member access on a method name: dispatches
    /// through the receiver's method resolution order at call time.
    BoundMethod { receiver: Value, method: String },
}

/// A user function: compiled MIR plus its defining module and captures.
#[derive(Debug)]
pub struct UserFunction {
    pub code: Arc<MirModule>,
    pub func: FuncId,
    pub globals: Arc<ModuleBindings>,
    pub captures: Vec<CellRef>,
}

/// Iterator state driving `for` loops.
#[derive(Debug)]
pub enum ValueIter {
    /// Snapshot of list/set elements (mutation during iteration does not
    /// affect the loop).
    Items { items: Vec<Value>, index: usize },
    Range { range: RangeValue, next: i64, remaining: i64 },
    Chars { chars: Vec<char>, index: usize },
    /// Map iteration yields `(key, value)` pairs.
    Pairs { pairs: Vec<(Value, Value)>, index: usize },
    /// Channel iteration blocks on `hasNext` and drains until close.
    Channel {
        channel: Arc<ChannelValue>,
        pending: Option<Value>,
    },
}

impl Value {
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self::Str(Arc::from(s.as_str()))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::new(Mutex::new(items)))
    }

    #[must_use]
    pub fn map(entries: IndexMap<Self, Self>) -> Self {
        Self::Map(Arc::new(Mutex::new(entries)))
    }

    #[must_use]
    pub fn set(entries: IndexSet<Self>) -> Self {
        Self::Set(Arc::new(Mutex::new(entries)))
    }

    #[must_use]
    pub fn pair(first: Self, second: Self) -> Self {
        Self::Pair(Arc::new(PairValue { first, second }))
    }

    /// The stable type name observable via `typeof(v)`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Undefined => "Undefined",
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Char(_) => "Char",
            Self::Str(_) => "String",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::Range(_) => "Range",
            Self::Pair(_) => "Pair",
            Self::Function(_) => "Function",
            Self::Class(_) => "Class",
            Self::Object(obj) => obj.class.name.as_str(),
            Self::Deferred(_) => "Deferred",
            Self::Job(_) => "Job",
            Self::Scope(_) => "Scope",
            Self::Channel(_) => "Channel",
            Self::Mutex(_) => "Mutex",
            Self::AtomicInt(_) => "AtomicInt",
            Self::AtomicLong(_) => "AtomicLong",
            Self::AtomicRef(_) => "AtomicRef",
            Self::Regex(_) => "Regex",
            Self::Handle(_) => "Handle",
            Self::File(_) => "File",
            Self::ExternalObject(host) => host.type_name(),
            Self::Iter(_) => "Iterator",
        }
    }

    /// True for `null` (not for `Undefined`, which only exists internally).
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view for arithmetic widening.
    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Int(v) => Some(Number::Int(*v)),
            Self::Long(v) => Some(Number::Long(*v)),
            Self::Double(v) => Some(Number::Double(*v)),
            _ => None,
        }
    }

    /// Renders the value using the default recursive rules, without invoking
    /// user `toString` overrides (the VM layers those on top).
    #[must_use]
    pub fn display_string(&self) -> String {
        let mut out = String::new();
        self.write_display(&mut out);
        out
    }

    fn write_display(&self, out: &mut String) {
        use fmt::Write as _;
        match self {
            Self::Undefined => out.push_str("undefined"),
            Self::Null => out.push_str("null"),
            Self::Bool(v) => {
                let _ = write!(out, "{v}");
            }
            Self::Int(v) | Self::Long(v) => {
                let _ = write!(out, "{v}");
            }
            Self::Double(v) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
                    let _ = write!(out, "{v:.1}");
                } else {
                    let mut buffer = ryu::Buffer::new();
                    out.push_str(buffer.format(*v));
                }
            }
            Self::Char(c) => out.push(*c),
            Self::Str(s) => out.push_str(s),
            Self::List(items) => {
                let snapshot: Vec<Self> = items.lock().expect("list lock").clone();
                out.push('[');
                for (i, item) in snapshot.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_display(out);
                }
                out.push(']');
            }
            Self::Map(entries) => {
                let snapshot: Vec<(Self, Self)> = entries
                    .lock()
                    .expect("map lock")
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                out.push('{');
                for (i, (k, v)) in snapshot.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_display(out);
                    out.push('=');
                    v.write_display(out);
                }
                out.push('}');
            }
            Self::Set(entries) => {
                let snapshot: Vec<Self> = entries.lock().expect("set lock").iter().cloned().collect();
                out.push('[');
                for (i, item) in snapshot.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_display(out);
                }
                out.push(']');
            }
            Self::Range(range) => {
                let op = if range.inclusive { ".." } else { "..<" };
                let _ = write!(out, "{}{op}{}", range.start, range.end);
                if range.step.abs() != 1 {
                    let _ = write!(out, " step {}", range.step.abs());
                }
            }
            Self::Pair(pair) => {
                out.push('(');
                pair.first.write_display(out);
                out.push_str(", ");
                pair.second.write_display(out);
                out.push(')');
            }
            Self::Function(function) => {
                let _ = write!(out, "fun {}", function.name);
            }
            Self::Class(class) => {
                let _ = write!(out, "class {}", class.name);
            }
            Self::Object(object) => {
                if object.class.is_data() {
                    let _ = write!(out, "{}(", object.class.name);
                    let fields = object.ctor_field_values();
                    for (i, (name, value)) in fields.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{name}=");
                        value.write_display(out);
                    }
                    out.push(')');
                } else {
                    let _ = write!(out, "{}@{:p}", object.class.name, Arc::as_ptr(object));
                }
            }
            Self::Deferred(_) => out.push_str("Deferred"),
            Self::Job(_) => out.push_str("Job"),
            Self::Scope(_) => out.push_str("Scope"),
            Self::Channel(_) => out.push_str("Channel"),
            Self::Mutex(_) => out.push_str("Mutex"),
            Self::AtomicInt(v) => {
                let _ = write!(out, "AtomicInt({})", v.load(Ordering::SeqCst));
            }
            Self::AtomicLong(v) => {
                let _ = write!(out, "AtomicLong({})", v.load(Ordering::SeqCst));
            }
            Self::AtomicRef(v) => {
                out.push_str("AtomicRef(");
                v.lock().expect("atomic ref lock").write_display(out);
                out.push(')');
            }
            Self::Regex(regex) => {
                let _ = write!(out, "Regex({})", regex.pattern);
            }
            Self::Handle(_) => out.push_str("Handle"),
            Self::File(file) => {
                let _ = write!(out, "File({})", file.path.display());
            }
            Self::ExternalObject(host) => {
                let _ = write!(out, "{}@host", host.type_name());
            }
            Self::Iter(_) => out.push_str("Iterator"),
        }
    }
}

/// Widened numeric view used by arithmetic dispatch.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Long(i64),
    Double(f64),
}

impl Number {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) | Self::Long(v) => v as f64,
            Self::Double(v) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            // Numerics compare by mathematical value across Int/Long;
            // Double comparisons widen.
            (Self::Int(a) | Self::Long(a), Self::Int(b) | Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Int(a) | Self::Long(a), Self::Double(b)) | (Self::Double(b), Self::Int(a) | Self::Long(a)) => {
                (*a as f64) == *b
            }
            (Self::List(a), Self::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a: Vec<Self> = a.lock().expect("list lock").clone();
                let b: Vec<Self> = b.lock().expect("list lock").clone();
                a == b
            }
            (Self::Set(a), Self::Set(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a: IndexSet<Self> = a.lock().expect("set lock").clone();
                let b: IndexSet<Self> = b.lock().expect("set lock").clone();
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Self::Map(a), Self::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a: IndexMap<Self, Self> = a.lock().expect("map lock").clone();
                let b: IndexMap<Self, Self> = b.lock().expect("map lock").clone();
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Pair(a), Self::Pair(b)) => a.first == b.first && a.second == b.second,
            (Self::Object(a), Self::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                // `@data` equality: same class, pairwise constructor fields.
                if a.class.is_data() && Arc::ptr_eq(&a.class, &b.class) {
                    let fa = a.ctor_field_values();
                    let fb = b.ctor_field_values();
                    return fa.len() == fb.len() && fa.iter().zip(&fb).all(|((_, x), (_, y))| x == y);
                }
                false
            }
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Arc::ptr_eq(a, b),
            (Self::Deferred(a), Self::Deferred(b)) | (Self::Job(a), Self::Job(b)) => Arc::ptr_eq(a, b),
            (Self::Scope(a), Self::Scope(b)) => Arc::ptr_eq(a, b),
            (Self::Channel(a), Self::Channel(b)) => Arc::ptr_eq(a, b),
            (Self::Mutex(a), Self::Mutex(b)) => Arc::ptr_eq(a, b),
            (Self::AtomicInt(a), Self::AtomicInt(b)) | (Self::AtomicLong(a), Self::AtomicLong(b)) => Arc::ptr_eq(a, b),
            (Self::AtomicRef(a), Self::AtomicRef(b)) => Arc::ptr_eq(a, b),
            (Self::Regex(a), Self::Regex(b)) => a.pattern == b.pattern,
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            (Self::File(a), Self::File(b)) => a.path == b.path,
            _ => false,
        }
    }
}

// NaN map keys degrade to identity misses, matching host-language behavior.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Char(v) => v.hash(state),
            Self::Str(v) => v.hash(state),
            // Int/Long share a hash so cross-tag equal values collide.
            Self::Int(v) | Self::Long(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Self::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    // Whole doubles hash like the equal integer.
                    0u8.hash(state);
                    (*v as i64).hash(state);
                } else {
                    v.to_bits().hash(state);
                }
            }
            Self::List(items) => {
                let snapshot: Vec<Self> = items.lock().expect("list lock").clone();
                snapshot.hash(state);
            }
            Self::Set(entries) => {
                // Order-insensitive: only the size feeds the hash; equality
                // does the precise comparison.
                entries.lock().expect("set lock").len().hash(state);
            }
            Self::Map(entries) => {
                entries.lock().expect("map lock").len().hash(state);
            }
            Self::Range(range) => range.hash(state),
            Self::Pair(pair) => {
                pair.first.hash(state);
                pair.second.hash(state);
            }
            Self::Object(object) => {
                if object.class.is_data() {
                    for (name, value) in object.ctor_field_values() {
                        name.hash(state);
                        value.hash(state);
                    }
                } else {
                    Arc::as_ptr(object).hash(state);
                }
            }
            Self::Function(v) => Arc::as_ptr(v).hash(state),
            Self::Class(v) => Arc::as_ptr(v).hash(state),
            Self::Deferred(v) | Self::Job(v) => Arc::as_ptr(v).hash(state),
            Self::Scope(v) => Arc::as_ptr(v).hash(state),
            Self::Channel(v) => Arc::as_ptr(v).hash(state),
            Self::Mutex(v) => Arc::as_ptr(v).hash(state),
            Self::AtomicInt(v) | Self::AtomicLong(v) => Arc::as_ptr(v).hash(state),
            Self::AtomicRef(v) => Arc::as_ptr(v).hash(state),
            Self::Regex(v) => v.pattern.hash(state),
            Self::Handle(v) => Arc::as_ptr(v).hash(state),
            Self::File(v) => v.path.hash(state),
            Self::ExternalObject(v) => Arc::as_ptr(v).cast::<()>().hash(state),
            Self::Iter(v) => Arc::as_ptr(v).hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_are_stable() {
        assert_eq!(Value::Int(1).type_name(), "Int");
        assert_eq!(Value::Long(1).type_name(), "Long");
        assert_eq!(Value::str("x").type_name(), "String");
        assert_eq!(Value::list(vec![]).type_name(), "List");
    }

    #[test]
    fn numeric_equality_widens() {
        assert_eq!(Value::Int(3), Value::Long(3));
        assert_eq!(Value::Int(3), Value::Double(3.0));
        assert_ne!(Value::Int(3), Value::Double(3.5));
    }

    #[test]
    fn list_equality_is_structural() {
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(a, b);
    }

    #[test]
    fn display_renders_collections_recursively() {
        let list = Value::list(vec![Value::Int(1), Value::list(vec![Value::str("a")])]);
        assert_eq!(list.display_string(), "[1, [a]]");
        let mut entries = IndexMap::new();
        entries.insert(Value::str("k"), Value::Int(2));
        assert_eq!(Value::map(entries).display_string(), "{k=2}");
    }

    #[test]
    fn range_membership_and_len() {
        let range = RangeValue {
            start: 0,
            end: 5,
            step: 1,
            inclusive: false,
        };
        assert_eq!(range.len(), 5);
        assert!(range.contains(4));
        assert!(!range.contains(5));
        let down = RangeValue {
            start: 10,
            end: 1,
            step: -1,
            inclusive: true,
        };
        assert_eq!(down.len(), 10);
        assert!(down.contains(1));
    }

    #[test]
    fn doubles_render_with_decimal_point() {
        assert_eq!(Value::Double(3.0).display_string(), "3.0");
        assert_eq!(Value::Double(3.25).display_string(), "3.25");
    }
}
