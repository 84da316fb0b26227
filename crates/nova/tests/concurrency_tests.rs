//! Structured concurrency: scopes, tasks, channels, mutexes, atomics,
//! cancellation and timeouts.

use nova::{ErrorKind, Interpreter, Value};

fn eval(source: &str) -> Value {
    Interpreter::new().eval(source, "test.nova").unwrap()
}

fn eval_err(source: &str) -> nova::Error {
    Interpreter::new().eval(source, "test.nova").unwrap_err()
}

/// Structured concurrency end-to-end: both asyncs complete before the scope
/// returns.
#[test]
fn coroutine_scope_joins_asyncs() {
    let source = "coroutineScope { s -> val a = s.async { 10 }\nval b = s.async { 20 }\na.get() + b.get() }";
    assert_eq!(eval(source), Value::Int(30));
}

/// Supervisor isolation: a failed launch does not poison siblings.
#[test]
fn supervisor_scope_isolates_failures() {
    let source = "supervisorScope { s -> s.launch { throw \"x\" }\nval d = s.async { 42 }\nd.get() }";
    assert_eq!(eval(source), Value::Int(42));
}

/// In a coroutineScope the first child failure cancels siblings and
/// rethrows.
#[test]
fn coroutine_scope_rethrows_first_failure() {
    let source = r#"
coroutineScope { s ->
    s.launch { throw "boom" }
    val d = s.async { delay(200)
99 }
    d.get()
}
"#;
    let err = eval_err(source);
    assert!(
        matches!(err.kind(), ErrorKind::UserError | ErrorKind::CancellationError),
        "unexpected kind {:?}",
        err.kind()
    );
}

/// The failed task's Deferred still throws on await inside a supervisor.
#[test]
fn supervisor_failed_deferred_throws_on_await() {
    let source = r#"
supervisorScope { s ->
    val bad = s.async { throw "x" }
    val out = try { bad.get() } catch (e) { "caught:" + e }
    out
}
"#;
    assert_eq!(eval(source), Value::str("caught:x"));
}

#[test]
fn scope_returns_lambda_result() {
    assert_eq!(eval("coroutineScope { s -> 7 }"), Value::Int(7));
}

#[test]
fn deferred_status_flags() {
    let source = r#"
coroutineScope { s ->
    val d = s.async { 5 }
    d.get()
    listOf(d.isDone(), d.isCompleted(), d.isCancelled())
}
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Bool(true), Value::Bool(true), Value::Bool(false)])
    );
}

/// Channel FIFO: receive order equals send order for one producer and one
/// consumer.
#[test]
fn channel_fifo_order() {
    let source = r#"
val ch = Channel(16)
coroutineScope { s ->
    s.launch {
        for (i in 0..<10) { ch.send(i) }
        ch.close()
    }
    var out = []
    for (v in ch) { out.add(v) }
    out
}
"#;
    let expected: Vec<Value> = (0..10).map(Value::Int).collect();
    assert_eq!(eval(source), Value::list(expected));
}

#[test]
fn rendezvous_channel_hands_off() {
    let source = r#"
val ch = Channel()
coroutineScope { s ->
    s.launch { ch.send(42)
ch.close() }
    ch.receive()
}
"#;
    assert_eq!(eval(source), Value::Int(42));
}

#[test]
fn try_receive_returns_null_when_empty() {
    assert_eq!(eval("Channel(4).tryReceive()"), Value::Null);
}

#[test]
fn receive_timeout_fails_with_timeout_error() {
    let err = eval_err("Channel(4).receiveTimeout(20)");
    assert_eq!(err.kind(), ErrorKind::TimeoutError);
}

#[test]
fn closed_channel_rejects_sends_but_drains() {
    let source = r#"
val ch = Channel(4)
ch.send(1)
ch.close()
val drained = ch.receive()
val failed = try { ch.send(2)
"sent" } catch (e: ChannelClosedError) { "closed" }
listOf(drained, failed, ch.isClosed())
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Int(1), Value::str("closed"), Value::Bool(true)])
    );
}

#[test]
fn channel_size_and_is_empty() {
    let source = "val ch = Channel(8)\nch.send(1)\nch.send(2)\nlistOf(ch.size(), ch.isEmpty())";
    assert_eq!(eval(source), Value::list(vec![Value::Int(2), Value::Bool(false)]));
}

/// Captured vars plus a mutex: the canonical shared-counter exercise.
#[test]
fn mutex_with_lock_guards_shared_mutation() {
    let source = r#"
val m = Mutex()
var count = 0
coroutineScope { s ->
    for (i in 0..<8) {
        s.launch {
            for (j in 0..<100) {
                m.withLock { count = count + 1 }
            }
        }
    }
}
count
"#;
    assert_eq!(eval(source), Value::Int(800));
}

#[test]
fn mutex_is_not_reentrant() {
    let source = "val m = Mutex()\nm.lock()\nlistOf(m.tryLock(), m.isLocked())";
    assert_eq!(eval(source), Value::list(vec![Value::Bool(false), Value::Bool(true)]));
}

#[test]
fn with_lock_unlocks_on_failure() {
    let source = r#"
val m = Mutex()
try { m.withLock { throw "x" } } catch (e) { }
m.isLocked()
"#;
    assert_eq!(eval(source), Value::Bool(false));
}

#[test]
fn atomics_sequential_api() {
    let source = r#"
val a = AtomicInt(10)
val inc = a.incrementAndGet()
val add = a.addAndGet(5)
val cas1 = a.compareAndSet(16, 99)
val cas2 = a.compareAndSet(16, 77)
listOf(inc, add, cas1, cas2, a.get())
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![
            Value::Int(11),
            Value::Int(16),
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(99)
        ])
    );
}

#[test]
fn atomic_counter_across_tasks() {
    let source = r#"
val a = AtomicInt(0)
coroutineScope { s ->
    for (i in 0..<4) {
        s.launch { for (j in 0..<50) { a.incrementAndGet() } }
    }
}
a.get()
"#;
    assert_eq!(eval(source), Value::Int(200));
}

#[test]
fn atomic_ref_holds_values() {
    let source = r#"
val r = AtomicRef("a")
val swapped = r.compareAndSet("a", "b")
listOf(swapped, r.get())
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Bool(true), Value::str("b")]));
}

#[test]
fn with_timeout_completes_fast_work() {
    assert_eq!(eval("withTimeout(2000) { 5 }"), Value::Int(5));
}

#[test]
fn with_timeout_fails_slow_work() {
    let err = eval_err("withTimeout(30) { delay(5000)\n1 }");
    assert_eq!(err.kind(), ErrorKind::TimeoutError);
}

#[test]
fn with_context_runs_on_dispatcher() {
    assert_eq!(eval("withContext(Dispatchers.IO) { 11 }"), Value::Int(11));
    assert_eq!(eval("withContext(Dispatchers.Unconfined) { 12 }"), Value::Int(12));
    assert_eq!(eval("withContext(Dispatchers.Default) { 13 }"), Value::Int(13));
}

#[test]
fn scope_accepts_dispatcher_argument() {
    let source = "coroutineScope(Dispatchers.IO) { s -> s.async { 3 }.get() }";
    assert_eq!(eval(source), Value::Int(3));
}

/// launch outside any scope attaches to the interpreter's root scope.
#[test]
fn bare_launch_and_async_use_root_scope() {
    let source = "val d = async { 21 }\nval j = launch { delay(1) }\nj.join()\nd.get() * 2";
    assert_eq!(eval(source), Value::Int(42));
}

/// Exceptions in a bare launch are swallowed until join.
#[test]
fn launch_error_surfaces_at_join() {
    let source = r#"
val j = launch { throw "late" }
val out = try { j.join()
"joined" } catch (e) { "caught:" + e }
out
"#;
    assert_eq!(eval(source), Value::str("caught:late"));
}

#[test]
fn cancelled_scope_rejects_new_tasks() {
    let source = r#"
coroutineScope { outer ->
    val inner = supervisorScope { s -> s }
    inner.cancel()
    try { inner.launch { 1 }
"started" } catch (e: CancellationError) { "rejected" }
}
"#;
    assert_eq!(eval(source), Value::str("rejected"));
}

/// Cancellation is observed at loop back-edges inside a running task.
#[test]
fn cancellation_hits_loop_back_edges() {
    let source = r#"
supervisorScope { s ->
    val d = s.async {
        var n = 0
        while (true) { n = n + 1 }
        n
    }
    delay(30)
    d.cancel()
    val out = try { d.get()
"finished" } catch (e: CancellationError) { "cancelled" }
    out
}
"#;
    assert_eq!(eval(source), Value::str("cancelled"));
}

#[test]
fn delay_suspends_without_failing() {
    assert_eq!(eval("delay(5)\n1"), Value::Int(1));
}
