//! Core language behavior: bindings, control flow, desugared surface syntax.

use nova::{ErrorKind, Interpreter, Value};

fn eval(source: &str) -> Value {
    Interpreter::new().eval(source, "test.nova").unwrap()
}

fn eval_err(source: &str) -> nova::Error {
    Interpreter::new().eval(source, "test.nova").unwrap_err()
}

/// Arithmetic & binding end-to-end: loop accumulation plus a val read.
#[test]
fn arithmetic_and_binding() {
    let result = eval("val x = 10\nvar y = 0\nfor (i in 0..<5) { y = y + i }\ny + x");
    assert_eq!(result, Value::Int(20));
}

#[test]
fn integer_division_truncates_toward_zero() {
    assert_eq!(eval("7 / 2"), Value::Int(3));
    assert_eq!(eval("-7 / 2"), Value::Int(-3));
}

#[test]
fn integer_division_by_zero_fails() {
    assert_eq!(eval_err("1 / 0").kind(), ErrorKind::ArithmeticError);
}

#[test]
fn double_division_follows_ieee() {
    assert_eq!(eval("1.0 / 0.0"), Value::Double(f64::INFINITY));
}

/// Widening: Double wins over Long wins over Int.
#[test]
fn numeric_widening() {
    assert_eq!(eval("1 + 2L"), Value::Long(3));
    assert_eq!(eval("1 + 0.5"), Value::Double(1.5));
    assert_eq!(eval("2L * 1.5"), Value::Double(3.0));
}

#[test]
fn int_arithmetic_wraps_on_overflow() {
    assert_eq!(
        eval("9223372036854775807 + 1"),
        Value::Int(i64::MIN),
    );
}

#[test]
fn string_interpolation_is_recursive() {
    assert_eq!(
        eval("val xs = listOf(1, 2)\nval n = 3\n\"xs=$xs n=${n + 1}\""),
        Value::str("xs=[1, 2] n=4")
    );
}

#[test]
fn when_with_subject_evaluates_subject_once() {
    let source = r#"
var hits = 0
fun subject(): Int { hits = hits + 1
return 2 }
val label = when (subject()) {
    1 -> "one"
    2, 3 -> "few"
    in 4..9 -> "some"
    else -> "many"
}
label + hits
"#;
    assert_eq!(eval(source), Value::str("few1"));
}

#[test]
fn subjectless_when_uses_boolean_guards() {
    let source = "val n = 7\nwhen {\n n < 5 -> \"low\"\n n < 10 -> \"mid\"\n else -> \"high\"\n}";
    assert_eq!(eval(source), Value::str("mid"));
}

#[test]
fn chained_comparison_expands_with_single_evaluation() {
    let source = r#"
var evals = 0
fun mid(): Int { evals = evals + 1
return 5 }
val ok = 1 < mid() <= 5
listOf(ok, evals)
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Bool(true), Value::Int(1)]));
}

#[test]
fn elvis_and_safe_call() {
    assert_eq!(eval("val s: String? = null\ns?.length ?: -1"), Value::Int(-1));
    assert_eq!(eval("val s = \"abc\"\ns?.length ?: -1"), Value::Int(3));
}

#[test]
fn safe_call_skips_method_invocation_on_null() {
    assert_eq!(eval("val s: String? = null\ns?.uppercase()"), Value::Null);
}

#[test]
fn coalesce_assign_only_fills_null() {
    assert_eq!(eval("var a = null\na ??= 5\na ??= 9\na"), Value::Int(5));
}

#[test]
fn if_let_binds_non_null() {
    let source = "fun describe(x) = if (val v = x) { \"got $v\" } else { \"nothing\" }\ndescribe(3) + \"/\" + describe(null)";
    assert_eq!(eval(source), Value::str("got 3/nothing"));
}

#[test]
fn try_postfix_returns_null_early() {
    let source = r#"
fun first(xs): Int? {
    if (xs.isEmpty()) { return null }
    return xs.get(0)
}
fun doubledOrNull(xs): Int? {
    val v = first(xs)?
    return v * 2
}
listOf(doubledOrNull(listOf(21)), doubledOrNull(listOf()))
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Int(42), Value::Null]));
}

#[test]
fn pipeline_applies_function() {
    assert_eq!(eval("fun double(x) = x * 2\n21 |> double"), Value::Int(42));
}

#[test]
fn partial_application_synthesizes_lambda() {
    let source = "fun sub(a, b) = a - b\nval subFrom10 = sub(10, _)\nsubFrom10(3)";
    assert_eq!(eval(source), Value::Int(7));
}

#[test]
fn pipeline_into_partial_application() {
    let source = "fun sub(a, b) = a - b\n3 |> sub(10, _)";
    assert_eq!(eval(source), Value::Int(7));
}

/// Partial application captures fixed arguments at creation time.
#[test]
fn partial_application_captures_by_value() {
    let source = "fun add(a, b) = a + b\nvar n = 1\nval addN = add(n, _)\nn = 100\naddN(2)";
    assert_eq!(eval(source), Value::Int(3));
}

#[test]
fn extension_function_dispatches_on_receiver() {
    let source = "fun Int.doubled() = this * 2\n21.doubled()";
    assert_eq!(eval(source), Value::Int(42));
}

#[test]
fn extension_on_string() {
    let source = "fun String.shout() = this.uppercase() + \"!\"\n\"hey\".shout()";
    assert_eq!(eval(source), Value::str("HEY!"));
}

/// Closures capture variables by reference: mutation is observable outside.
#[test]
fn closure_mutates_captured_var() {
    let source = r#"
fun counter() {
    var n = 0
    return { n = n + 1
n }
}
val c = counter()
c()
c()
c()
"#;
    assert_eq!(eval(source), Value::Int(3));
}

#[test]
fn two_closures_share_one_cell() {
    let source = r#"
fun make() {
    var n = 0
    val inc = { n = n + 1 }
    val get = { n }
    return listOf(inc, get)
}
val fns = make()
val inc = fns.get(0)
val get = fns.get(1)
inc()
inc()
get()
"#;
    assert_eq!(eval(source), Value::Int(2));
}

#[test]
fn lambda_implicit_it() {
    assert_eq!(eval("val f = { it * 3 }\nf(14)"), Value::Int(42));
}

#[test]
fn default_arguments_complete_at_call() {
    let source = "fun greet(name, greeting = \"hi\") = greeting + \" \" + name\ngreet(\"ana\") + \"/\" + greet(\"bo\", \"yo\")";
    assert_eq!(eval(source), Value::str("hi ana/yo bo"));
}

#[test]
fn named_arguments_bind_by_parameter() {
    let source = "fun join(a, b, sep = \"-\") = a + sep + b\njoin(b = \"y\", a = \"x\", sep = \"+\")";
    assert_eq!(eval(source), Value::str("x+y"));
}

#[test]
fn while_and_do_while() {
    assert_eq!(eval("var n = 0\nwhile (n < 5) { n = n + 1 }\nn"), Value::Int(5));
    assert_eq!(eval("var n = 0\ndo { n = n + 1 } while (n < 3)\nn"), Value::Int(3));
}

#[test]
fn break_and_continue() {
    let source = "var sum = 0\nfor (i in 1..10) { if (i % 2 == 0) { continue }\nif (i > 7) { break }\nsum = sum + i }\nsum";
    // 1 + 3 + 5 + 7
    assert_eq!(eval(source), Value::Int(16));
}

#[test]
fn ranges_down_to_and_step() {
    assert_eq!(
        eval("var out = []\nfor (i in 10 downTo 6) { out.add(i) }\nout"),
        Value::list(vec![
            Value::Int(10),
            Value::Int(9),
            Value::Int(8),
            Value::Int(7),
            Value::Int(6)
        ])
    );
    assert_eq!(
        eval("var out = []\nfor (i in 0..6 step 2) { out.add(i) }\nout"),
        Value::list(vec![Value::Int(0), Value::Int(2), Value::Int(4), Value::Int(6)])
    );
}

#[test]
fn in_operator_on_collections_and_ranges() {
    assert_eq!(eval("3 in 1..5"), Value::Bool(true));
    assert_eq!(eval("9 !in 1..5"), Value::Bool(true));
    assert_eq!(eval("2 in listOf(1, 2, 3)"), Value::Bool(true));
    assert_eq!(eval("\"el\" in \"hello\""), Value::Bool(true));
}

#[test]
fn spread_in_list_literal() {
    assert_eq!(
        eval("val xs = listOf(2, 3)\n[1, *xs, 4]"),
        Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)])
    );
}

#[test]
fn is_and_cast_operators() {
    assert_eq!(eval("val x = 5\nx is Int"), Value::Bool(true));
    assert_eq!(eval("val x = 5\nx !is String"), Value::Bool(true));
    assert_eq!(eval("val x = \"s\"\nx as? Int"), Value::Null);
    assert_eq!(eval_err("\"s\" as Int").kind(), ErrorKind::CastError);
}

#[test]
fn typeof_reports_stable_tags() {
    assert_eq!(eval("typeof(1)"), Value::str("Int"));
    assert_eq!(eval("typeof(1L)"), Value::str("Long"));
    assert_eq!(eval("typeof(1.5)"), Value::str("Double"));
    assert_eq!(eval("typeof(\"s\")"), Value::str("String"));
    assert_eq!(eval("typeof(null)"), Value::str("Null"));
    assert_eq!(eval("typeof(listOf())"), Value::str("List"));
    assert_eq!(eval("typeof(1..2)"), Value::str("Range"));
}

#[test]
fn try_catch_matches_kind() {
    let source = r#"
val out = try {
    1 / 0
} catch (e: TypeError) {
    "wrong"
} catch (e: ArithmeticError) {
    "caught"
}
out
"#;
    assert_eq!(eval(source), Value::str("caught"));
}

#[test]
fn base_catch_catches_everything() {
    assert_eq!(
        eval("try { throw \"boom\" } catch (e) { e }"),
        Value::str("boom")
    );
}

#[test]
fn finally_runs_on_both_paths() {
    let source = r#"
var log = []
fun risky(fail) {
    try {
        if (fail) { throw "x" }
        log.add("ok")
    } catch (e) {
        log.add("err")
    } finally {
        log.add("fin")
    }
}
risky(false)
risky(true)
log
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![
            Value::str("ok"),
            Value::str("fin"),
            Value::str("err"),
            Value::str("fin")
        ])
    );
}

#[test]
fn finally_runs_when_returning_from_try() {
    let source = r#"
var log = []
fun f() {
    try {
        return "early"
    } finally {
        log.add("fin")
    }
}
val r = f()
log.add(r)
log
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("fin"), Value::str("early")]));
}

#[test]
fn uncaught_error_carries_position() {
    let err = eval_err("val x = 1\nx.nope()");
    assert_eq!(err.kind(), ErrorKind::TypeError);
    let pos = err.pos().expect("position");
    assert_eq!(pos.line, 2);
}

/// `use` closes the resource exactly once on normal and exceptional exit.
#[test]
fn use_closes_resource() {
    let source = r#"
var closes = 0
class Res {
    fun close() { closes = closes + 1 }
}
use (val r = Res()) { 1 }
try {
    use (val r = Res()) { throw "x" }
} catch (e) { }
closes
"#;
    assert_eq!(eval(source), Value::Int(2));
}

/// A close failure during exceptional exit attaches as a suppressed note.
#[test]
fn use_close_failure_is_suppressed_during_unwind() {
    let source = r#"
class Bad {
    fun close() { throw "close-fail" }
}
use (val r = Bad()) { throw "primary" }
"#;
    let err = eval_err(source);
    assert_eq!(err.kind(), ErrorKind::UserError);
    assert_eq!(err.message(), "primary");
    assert_eq!(err.suppressed().len(), 1);
}

/// A close failure on the normal path surfaces directly.
#[test]
fn use_close_failure_surfaces_on_normal_exit() {
    let source = r#"
class Bad {
    fun close() { throw "close-fail" }
}
use (val r = Bad()) { 1 }
"#;
    let err = eval_err(source);
    assert_eq!(err.message(), "close-fail");
}

#[test]
fn callable_reference_resolves() {
    assert_eq!(
        eval("fun double(x) = x * 2\nlistOf(1, 2, 3).map(::double)"),
        Value::list(vec![Value::Int(2), Value::Int(4), Value::Int(6)])
    );
}

#[test]
fn undefined_name_is_a_name_error() {
    assert_eq!(eval_err("nope + 1").kind(), ErrorKind::NameError);
}

#[test]
fn syntax_error_reports_position() {
    let err = eval_err("val = 3");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert!(err.pos().is_some());
}
