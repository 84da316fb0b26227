//! Pipeline telemetry, precompilation and MIR snapshots.

use nova::{Interpreter, MirModule, Value};

/// HIR and MIR passes are enumerable by name, in order, with CSE present.
#[test]
fn pipeline_names_are_exposed() {
    let interp = Interpreter::new();
    let names = interp.pipeline_names();
    assert!(names.contains(&"cse"), "CSE is a required pass: {names:?}");
    assert!(names.contains(&"resolve-names"));
    assert!(names.contains(&"desugar-when"));
    let cse = names.iter().position(|n| *n == "cse").unwrap();
    let fold = names.iter().position(|n| *n == "const-fold").unwrap();
    let dce = names.iter().position(|n| *n == "dce").unwrap();
    assert!(fold < cse && cse < dce, "fixed order: {names:?}");
}

#[test]
fn precompile_then_execute() {
    let mut interp = Interpreter::new();
    let module = interp
        .precompile_to_mir("fun f(a, b) = a * b\nf(6, 7)", "pre.nova")
        .unwrap();
    assert_eq!(interp.execute_mir(&module).unwrap(), Value::Int(42));
    // Re-execution works against a fresh environment.
    assert_eq!(interp.execute_mir(&module).unwrap(), Value::Int(42));
}

/// Precompiled modules round-trip through postcard bytes.
#[test]
fn mir_snapshot_round_trips() {
    let mut interp = Interpreter::new();
    let module = interp
        .precompile_to_mir("val xs = listOf(1, 2, 3)\nxs.sum()", "snap.nova")
        .unwrap();
    let bytes = module.to_bytes().unwrap();
    let restored = MirModule::from_bytes(&bytes).unwrap();
    assert_eq!(module, restored);
    assert_eq!(interp.execute_mir(&restored).unwrap(), Value::Int(6));
}

/// Optimizations preserve observable behavior on a mixed workload.
#[test]
fn optimized_execution_matches_semantics() {
    let source = r#"
fun busy(n) {
    var total = 0
    for (i in 1..n) {
        val square = i * i
        total = total + square - square + i
    }
    return total
}
busy(10)
"#;
    assert_eq!(
        Interpreter::new().eval(source, "opt.nova").unwrap(),
        Value::Int(55)
    );
}

#[test]
fn instantiate_via_embedding_api() {
    let mut interp = Interpreter::new();
    interp
        .eval_repl("@data class P(val a: Int, val b: Int = 9)")
        .unwrap();
    let class = interp.eval_repl("P").unwrap();
    let instance = interp
        .instantiate(&class, vec![Value::Int(1)], vec![])
        .unwrap();
    let Value::Object(object) = &instance else {
        panic!("expected object");
    };
    assert_eq!(object.field("a"), Some(Value::Int(1)));
    assert_eq!(object.field("b"), Some(Value::Int(9)));
}
