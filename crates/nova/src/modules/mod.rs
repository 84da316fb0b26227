//! Standard-library namespaces: `Json`, `Time`, `System`, `Dispatchers`.
//!
//! Each namespace is a singleton host object; member access and method calls
//! on it route here. Value-attached stdlib surfaces (regex, file) also live
//! in this directory.

pub mod io;
pub mod json;
pub mod system;
pub mod test;
pub mod text;
pub mod time;

use std::sync::Arc;

use crate::{
    concurrency::Dispatcher,
    error::{Error, RunResult},
    value::{HostObject, Value},
    vm::Vm,
};

/// A stdlib namespace singleton (`Json`, `Time`, ...).
#[derive(Debug)]
struct NamespaceObject(&'static str);

impl HostObject for NamespaceObject {
    fn type_name(&self) -> &str {
        self.0
    }

    fn as_namespace(&self) -> Option<&'static str> {
        Some(self.0)
    }
}

/// One of `Dispatchers.IO` / `Dispatchers.Default` / `Dispatchers.Unconfined`.
#[derive(Debug)]
struct DispatcherObject(Dispatcher);

impl HostObject for DispatcherObject {
    fn type_name(&self) -> &str {
        "Dispatcher"
    }

    fn as_dispatcher(&self) -> Option<Dispatcher> {
        Some(self.0)
    }
}

/// Resolves a stdlib namespace global by name.
#[must_use]
pub fn namespace_value(name: &str) -> Option<Value> {
    match name {
        "Json" | "Time" | "System" | "Dispatchers" => {
            let ns: &'static str = match name {
                "Json" => "Json",
                "Time" => "Time",
                "System" => "System",
                _ => "Dispatchers",
            };
            Some(Value::ExternalObject(Arc::new(NamespaceObject(ns))))
        }
        _ => None,
    }
}

/// Member access on a namespace (`Dispatchers.IO`).
pub fn namespace_member(ns: &str, name: &str) -> RunResult<Value> {
    match (ns, name) {
        ("Dispatchers", "IO") => Ok(Value::ExternalObject(Arc::new(DispatcherObject(Dispatcher::Io)))),
        ("Dispatchers", "Default") => Ok(Value::ExternalObject(Arc::new(DispatcherObject(Dispatcher::Default)))),
        ("Dispatchers", "Unconfined") => Ok(Value::ExternalObject(Arc::new(DispatcherObject(Dispatcher::Unconfined)))),
        _ => Err(Error::type_error(format!("{ns} has no member '{name}'"))),
    }
}

/// Method call on a namespace (`Json.parse(text)`).
pub fn namespace_call(vm: &mut Vm, ns: &str, name: &str, args: &[Value]) -> RunResult<Value> {
    match ns {
        "Json" => json::call(vm, name, args),
        "Time" => time::call(vm, name, args),
        "System" => system::call(vm, name, args),
        "Dispatchers" => Err(Error::type_error(format!("Dispatchers.{name} is not callable"))),
        _ => Err(Error::type_error(format!("unknown namespace {ns}"))),
    }
}
