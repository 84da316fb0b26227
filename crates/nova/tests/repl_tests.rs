//! REPL behavior: persistent bindings, error isolation, script-mode reset.

use nova::{ErrorKind, Interpreter, Value};

/// Top-level bindings persist across eval_repl calls.
#[test]
fn bindings_persist_across_calls() {
    let mut interp = Interpreter::new();
    interp.eval_repl("val x = 42").unwrap();
    assert_eq!(interp.eval_repl("x + 1").unwrap(), Value::Int(43));
}

#[test]
fn functions_and_classes_persist() {
    let mut interp = Interpreter::new();
    interp.eval_repl("fun double(n) = n * 2").unwrap();
    interp.eval_repl("@data class P(val a: Int)").unwrap();
    assert_eq!(interp.eval_repl("double(P(3).a)").unwrap(), Value::Int(6));
}

/// A user error reports without aborting the session or dropping bindings.
#[test]
fn errors_do_not_abort_the_session() {
    let mut interp = Interpreter::new();
    interp.eval_repl("val x = 10").unwrap();
    let err = interp.eval_repl("x / 0").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArithmeticError);
    assert_eq!(interp.eval_repl("x * 2").unwrap(), Value::Int(20));
}

#[test]
fn syntax_errors_do_not_abort_the_session() {
    let mut interp = Interpreter::new();
    interp.eval_repl("val ok = 1").unwrap();
    assert!(interp.eval_repl("val = broken").is_err());
    assert_eq!(interp.eval_repl("ok").unwrap(), Value::Int(1));
}

#[test]
fn rebinding_replaces_value() {
    let mut interp = Interpreter::new();
    interp.eval_repl("var n = 1").unwrap();
    interp.eval_repl("n = n + 1").unwrap();
    assert_eq!(interp.eval_repl("n").unwrap(), Value::Int(2));
}

/// Script-mode eval gets a fresh environment each time.
#[test]
fn script_mode_is_isolated() {
    let mut interp = Interpreter::new();
    interp.eval("val hidden = 1", "a.nova").unwrap();
    let err = interp.eval("hidden", "b.nova").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameError);
}

/// set_repl_mode makes plain eval persistent.
#[test]
fn repl_mode_flag_applies_to_eval() {
    let mut interp = Interpreter::new();
    interp.set_repl_mode(true);
    interp.eval("val kept = 5", "line1").unwrap();
    assert_eq!(interp.eval("kept", "line2").unwrap(), Value::Int(5));
}

#[test]
fn repl_names_lists_defined_bindings() {
    let mut interp = Interpreter::new();
    interp.eval_repl("val alpha = 1\nfun beta() = 2").unwrap();
    let names = interp.repl_names();
    assert!(names.contains(&"alpha".to_owned()));
    assert!(names.contains(&"beta".to_owned()));
}

/// Annotation processors registered in one line fire for classes declared in
/// later lines (the registry lives on the interpreter).
#[test]
fn registry_persists_across_repl_lines() {
    let mut interp = Interpreter::new();
    interp
        .eval_repl("var seen = []\nregisterAnnotationProcessor(\"tag\") { t, a -> seen.add(t.name) }")
        .unwrap();
    interp.eval_repl("annotation class tag").unwrap();
    interp.eval_repl("@tag class Later").unwrap();
    assert_eq!(interp.eval_repl("seen.size()").unwrap(), Value::Int(1));
}
