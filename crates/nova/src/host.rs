//! Host interop boundary.
//!
//! JVM-style interop (method-handle resolution, proxy generation, host-class
//! subclassing) lives outside the runtime core. The VM talks to it through
//! [`HostInterop`]; embedders provide an implementation, and the default
//! [`NoHostInterop`] reports every operation as unavailable. All calls are
//! additionally gated by `allowJavaInterop` in the security policy.

use std::fmt;

use crate::{
    error::{Error, RunResult},
    value::Value,
};

/// Resolution and invocation services for host (java) classes.
///
/// Contract notes for implementors:
/// - `call_method` resolves the best-match overload for the argument shapes,
///   widening numerics under JVM rules and supporting variadic trailing
///   parameters; implementations are expected to cache `(class, name,
///   argShapes)` lookups.
/// - `get_property` reads a public field first, then `getFoo()`, then
///   `isFoo()`; `set_property` tries the field then `setFoo(v)`.
pub trait HostInterop: fmt::Debug + Send + Sync {
    /// Resolves a fully qualified host class to a value.
    fn resolve_class(&self, fq_name: &str) -> RunResult<Value>;

    /// Resolves a fully qualified static member (`import static`).
    fn resolve_static(&self, fq_member: &str) -> RunResult<Value>;

    /// Invokes a method on a host-backed receiver.
    fn call_method(&self, receiver: &Value, name: &str, args: &[Value]) -> RunResult<Value>;

    /// Bean-style property read.
    fn get_property(&self, receiver: &Value, name: &str) -> RunResult<Value>;

    /// Bean-style property write.
    fn set_property(&self, receiver: &Value, name: &str, value: &Value) -> RunResult<()>;
}

/// Default interop: every operation fails with a uniform message.
#[derive(Debug, Default)]
pub struct NoHostInterop;

impl NoHostInterop {
    fn unavailable(what: &str) -> Error {
        Error::type_error(format!("host interop is not available: {what}"))
    }
}

impl HostInterop for NoHostInterop {
    fn resolve_class(&self, fq_name: &str) -> RunResult<Value> {
        Err(Error::import(format!("host class '{fq_name}' is not available")))
    }

    fn resolve_static(&self, fq_member: &str) -> RunResult<Value> {
        Err(Error::import(format!("host member '{fq_member}' is not available")))
    }

    fn call_method(&self, _receiver: &Value, name: &str, _args: &[Value]) -> RunResult<Value> {
        Err(Self::unavailable(name))
    }

    fn get_property(&self, _receiver: &Value, name: &str) -> RunResult<Value> {
        Err(Self::unavailable(name))
    }

    fn set_property(&self, _receiver: &Value, name: &str, _value: &Value) -> RunResult<()> {
        Err(Self::unavailable(name))
    }
}
