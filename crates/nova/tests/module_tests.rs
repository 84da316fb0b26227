//! Module loader: resolution, caching, cycles, import forms.

use std::path::PathBuf;

use nova::{ErrorKind, Interpreter, Value};

/// Creates a unique module tree under the system temp dir.
fn module_tree(test: &str, files: &[(&str, &str)]) -> PathBuf {
    let base = std::env::temp_dir().join(format!("nova-mod-{test}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&base);
    for (rel, content) in files {
        let path = base.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    base
}

fn eval_with_base(base: &PathBuf, source: &str) -> Result<Value, nova::Error> {
    let mut interp = Interpreter::new();
    interp.set_script_base_path(base.clone());
    interp.eval(source, "app.nova")
}

/// Python-style cyclic imports: each module sees the other's live bindings.
#[test]
fn cyclic_imports_resolve_live() {
    let base = module_tree(
        "cycle",
        &[
            ("a.nova", "fun greetA() = \"A\"\nimport b.greetB\nfun callB() = greetB()"),
            ("b.nova", "fun greetB() = \"B\"\nimport a.greetA"),
        ],
    );
    let result = eval_with_base(&base, "import a.*\ncallB()").unwrap();
    assert_eq!(result, Value::str("B"));
}

/// File-level side effects run exactly once regardless of import count.
#[test]
fn module_side_effects_run_once() {
    let base = module_tree(
        "once",
        &[(
            "counter.nova",
            "val loads = mutableListOf()\nloads.add(1)\nfun value() = 7",
        )],
    );
    let source = r#"
import counter.value
import counter.loads
import counter.*
loads.size() * 10 + value()
"#;
    assert_eq!(eval_with_base(&base, source).unwrap(), Value::Int(17));
}

/// Repeated loads hand back identical top-level bindings.
#[test]
fn module_bindings_are_cached() {
    let base = module_tree("cache", &[("lib.nova", "val state = mutableListOf()\nfun push(v) { state.add(v) }")]);
    let source = r#"
import lib.push
import lib.state
push(1)
push(2)
state.size()
"#;
    assert_eq!(eval_with_base(&base, source).unwrap(), Value::Int(2));
}

#[test]
fn named_import_with_alias() {
    let base = module_tree("alias", &[("util/strings.nova", "fun shout(s) = s.uppercase()")]);
    let result = eval_with_base(&base, "import util.strings.shout as yell\nyell(\"ok\")").unwrap();
    assert_eq!(result, Value::str("OK"));
}

#[test]
fn wildcard_import_binds_all_public_symbols() {
    let base = module_tree(
        "wild",
        &[("math2.nova", "val pi2 = 6\nfun twice(x) = x * 2")],
    );
    let result = eval_with_base(&base, "import math2.*\ntwice(pi2)").unwrap();
    assert_eq!(result, Value::Int(12));
}

/// Everything above an import is visible to the imported module; the loader
/// resolves `a.b.c` to `a/b/c.nova` first, then `a/b.nova` with symbol `c`.
#[test]
fn nested_path_resolution() {
    let base = module_tree(
        "nested",
        &[("pkg/inner/leaf.nova", "fun f() = 41")],
    );
    let result = eval_with_base(&base, "import pkg.inner.leaf.f\nf() + 1").unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn missing_module_is_an_import_error() {
    let base = module_tree("missing", &[]);
    let err = eval_with_base(&base, "import nope.thing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImportError);
    assert!(err.message().contains("nope"));
}

#[test]
fn missing_symbol_names_the_symbol() {
    let base = module_tree("missing-sym", &[("lib.nova", "fun real() = 1")]);
    let err = eval_with_base(&base, "import lib.imaginary").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImportError);
    assert!(err.message().contains("imaginary"));
}

/// A failing module body propagates and the module is not cached as loaded.
#[test]
fn failing_module_body_propagates() {
    let base = module_tree("failing", &[("bad.nova", "throw \"broken module\"")]);
    let err = eval_with_base(&base, "import bad.anything").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserError);
}

/// `import java` is gated by allowJavaInterop and reaches the host boundary.
#[test]
fn java_import_requires_capability_and_host() {
    let base = module_tree("java", &[]);
    let mut interp = Interpreter::new();
    interp.set_script_base_path(base);
    // Default policy denies interop.
    let denied = interp.eval("import java java.util.ArrayList", "app.nova").unwrap_err();
    assert_eq!(denied.kind(), ErrorKind::SecurityError);

    // With the capability, the default host reports the class unavailable.
    let mut policy = nova::SecurityPolicy::standard();
    policy.allow_java_interop = true;
    interp.set_security_policy(policy);
    let unavailable = interp.eval("import java java.util.ArrayList", "app.nova").unwrap_err();
    assert_eq!(unavailable.kind(), ErrorKind::ImportError);
}

#[test]
fn import_without_base_path_fails() {
    let mut interp = Interpreter::new();
    let err = interp.eval("import a.b", "app.nova").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImportError);
}
