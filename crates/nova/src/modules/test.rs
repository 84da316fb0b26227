//! Assertion builtins; failures raise `AssertionError`.

use crate::{
    error::{Error, RunResult},
    value::Value,
    vm::Vm,
};

pub fn assert_cond(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Some(cond) = args.first() else {
        return Err(Error::type_error("assert() expects a condition"));
    };
    if vm.truthy(cond)? {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(message) => vm.to_display(message)?,
        None => "assertion failed".to_owned(),
    };
    Err(Error::assertion(message))
}

pub fn assert_equals(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let (Some(expected), Some(actual)) = (args.first(), args.get(1)) else {
        return Err(Error::type_error("assertEquals() expects two values"));
    };
    if vm.values_equal(expected, actual)? {
        Ok(Value::Null)
    } else {
        Err(Error::assertion(format!(
            "expected {} but was {}",
            vm.to_display(expected)?,
            vm.to_display(actual)?
        )))
    }
}

pub fn assert_true(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    match args.first() {
        Some(Value::Bool(true)) => Ok(Value::Null),
        Some(other) => Err(Error::assertion(format!("expected true but was {}", vm.to_display(other)?))),
        None => Err(Error::type_error("assertTrue() expects a value")),
    }
}

pub fn assert_false(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    match args.first() {
        Some(Value::Bool(false)) => Ok(Value::Null),
        Some(other) => Err(Error::assertion(format!(
            "expected false but was {}",
            vm.to_display(other)?
        ))),
        None => Err(Error::type_error("assertFalse() expects a value")),
    }
}

pub fn assert_null(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    match args.first() {
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(Error::assertion(format!("expected null but was {}", vm.to_display(other)?))),
        None => Err(Error::type_error("assertNull() expects a value")),
    }
}

pub fn assert_not_null(args: &[Value]) -> RunResult<Value> {
    match args.first() {
        Some(Value::Null) => Err(Error::assertion("expected a non-null value")),
        Some(value) => Ok(value.clone()),
        None => Err(Error::type_error("assertNotNull() expects a value")),
    }
}

pub fn fail(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let message = match args.first() {
        Some(message) => vm.to_display(message)?,
        None => "fail() called".to_owned(),
    };
    Err(Error::assertion(message))
}
