//! Security policy: capability gates and execution quotas.

use nova::{ErrorKind, Interpreter, SecurityPolicy, Value};

fn eval_with(policy: SecurityPolicy, source: &str) -> Result<Value, nova::Error> {
    let mut interp = Interpreter::new();
    interp.set_security_policy(policy);
    interp.eval(source, "test.nova")
}

/// Every policy-gated operation fails under `strict` with the canonical
/// denial message.
#[test]
fn strict_denies_gated_operations() {
    for source in [
        "println(\"hi\")",
        "readLine()",
        "File(\"/tmp/x\").readText()",
        "System.exec(\"true\")",
        "System.env(\"PATH\")",
        "import java java.util.ArrayList",
    ] {
        let err = eval_with(SecurityPolicy::strict(), source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityError, "source: {source}");
        assert!(
            err.message().contains("Security policy denied"),
            "message: {}",
            err.message()
        );
    }
}

#[test]
fn standard_allows_stdio_and_file_io() {
    let mut interp = Interpreter::new();
    let out = std::sync::Arc::new(std::sync::Mutex::new(nova::CollectStringPrint::default()));
    interp.set_stdout(out.clone());
    interp.eval("println(\"ok\")", "test.nova").unwrap();
    assert_eq!(out.lock().unwrap().output(), "ok\n");
}

#[test]
fn computation_is_allowed_under_strict() {
    assert_eq!(
        eval_with(SecurityPolicy::strict(), "val xs = listOf(1, 2, 3)\nxs.sum()").unwrap(),
        Value::Int(6)
    );
}

#[test]
fn loop_iteration_quota_trips() {
    let mut policy = SecurityPolicy::standard();
    policy.max_loop_iterations = 100;
    let err = eval_with(policy, "var n = 0\nwhile (true) { n = n + 1 }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceededError);
}

#[test]
fn zero_quota_means_unlimited() {
    let mut policy = SecurityPolicy::standard();
    policy.max_loop_iterations = 0;
    let result = eval_with(policy, "var n = 0\nwhile (n < 5000) { n = n + 1 }\nn").unwrap();
    assert_eq!(result, Value::Int(5000));
}

#[test]
fn recursion_limit_is_a_stack_overflow() {
    let mut policy = SecurityPolicy::standard();
    policy.max_recursion_depth = 64;
    let err = eval_with(policy, "fun f(n) = f(n + 1)\nf(0)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StackOverflowError);
}

#[test]
fn execution_time_limit_trips() {
    let mut policy = SecurityPolicy::standard();
    policy.max_execution_time_ms = 50;
    let err = eval_with(policy, "var n = 0\nwhile (true) { n = n + 1 }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceededError);
}

#[test]
fn async_task_quota_trips() {
    let mut policy = SecurityPolicy::standard();
    policy.max_async_tasks = 2;
    let source = r#"
coroutineScope { s ->
    s.launch { delay(200) }
    s.launch { delay(200) }
    s.launch { delay(200) }
}
"#;
    let err = eval_with(policy, source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceededError);
}

#[test]
fn security_errors_are_catchable() {
    let source = r#"
val out = try { println("x")
"printed" } catch (e: SecurityError) { "denied" }
out
"#;
    assert_eq!(eval_with(SecurityPolicy::strict(), source).unwrap(), Value::str("denied"));
}
