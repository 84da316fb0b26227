//! Standard library surface: collections, strings, numbers, json, text, time.

use nova::{ErrorKind, Interpreter, Value};

fn eval(source: &str) -> Value {
    Interpreter::new().eval(source, "test.nova").unwrap()
}

fn eval_err(source: &str) -> nova::Error {
    Interpreter::new().eval(source, "test.nova").unwrap_err()
}

#[test]
fn list_pipeline_methods() {
    let source = "listOf(1, 2, 3, 4, 5).filter { it % 2 == 1 }.map { it * 10 }.sum()";
    assert_eq!(eval(source), Value::Int(90));
}

#[test]
fn list_fold_and_reduce() {
    assert_eq!(eval("listOf(1, 2, 3).fold(10) { acc, v -> acc + v }"), Value::Int(16));
    assert_eq!(eval("listOf(1, 2, 3).reduce { acc, v -> acc * v }"), Value::Int(6));
}

#[test]
fn list_sorted_and_sorted_by() {
    assert_eq!(
        eval("listOf(3, 1, 2).sorted()"),
        Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(
        eval("listOf(\"bb\", \"a\", \"ccc\").sortedBy { it.length() }"),
        Value::list(vec![Value::str("a"), Value::str("bb"), Value::str("ccc")])
    );
}

#[test]
fn list_join_group_zip() {
    assert_eq!(eval("listOf(1, 2, 3).joinToString(\"-\")"), Value::str("1-2-3"));
    assert_eq!(
        eval("listOf(1, 2, 3, 4).groupBy { it % 2 }.size()"),
        Value::Int(2)
    );
    assert_eq!(
        eval("listOf(1, 2).zip(listOf(\"a\", \"b\"))[1].second"),
        Value::str("b")
    );
}

#[test]
fn list_index_errors() {
    assert_eq!(eval_err("listOf(1)[5]").kind(), ErrorKind::IndexError);
    assert_eq!(eval_err("listOf(1).get(-1)").kind(), ErrorKind::IndexError);
}

/// Maps preserve insertion order.
#[test]
fn map_insertion_order_is_preserved() {
    let source = "val m = mapOf(\"z\" to 1, \"a\" to 2, \"m\" to 3)\nm.keys()";
    assert_eq!(
        eval(source),
        Value::list(vec![Value::str("z"), Value::str("a"), Value::str("m")])
    );
}

#[test]
fn map_methods() {
    let source = r#"
val m = mutableMapOf("a" to 1)
m.put("b", 2)
m["c"] = 3
listOf(m.size(), m.get("b"), m["missing"], m.containsKey("c"), m.getOrDefault("x", 9))
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![
            Value::Int(3),
            Value::Int(2),
            Value::Null,
            Value::Bool(true),
            Value::Int(9)
        ])
    );
}

#[test]
fn map_iteration_yields_pairs() {
    let source = "var out = []\nfor ((k, v) in mapOf(\"a\" to 1, \"b\" to 2)) { out.add(k + v) }\nout";
    assert_eq!(eval(source), Value::list(vec![Value::str("a1"), Value::str("b2")]));
}

#[test]
fn set_operations() {
    let source = r#"
val a = setOf(1, 2, 3)
val b = setOf(3, 4)
listOf(a.size(), a.contains(2), a.union(b).size(), a.intersect(b).toList())
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![
            Value::Int(3),
            Value::Bool(true),
            Value::Int(4),
            Value::list(vec![Value::Int(3)])
        ])
    );
}

/// Both `s.length` and `s.length()` are code-unit counts.
#[test]
fn string_length_property_and_method() {
    assert_eq!(eval("\"héllo\".length"), Value::Int(5));
    assert_eq!(eval("\"héllo\".length()"), Value::Int(5));
}

#[test]
fn string_methods() {
    assert_eq!(eval("\"Hello World\".split(\" \")[1]"), Value::str("World"));
    assert_eq!(eval("\"  pad  \".trim()"), Value::str("pad"));
    assert_eq!(eval("\"abc\".reversed()"), Value::str("cba"));
    assert_eq!(eval("\"ab\".repeat(3)"), Value::str("ababab"));
    assert_eq!(eval("\"hello\".substring(1, 3)"), Value::str("el"));
    assert_eq!(eval("\"42\".toInt() + 1"), Value::Int(43));
    assert_eq!(eval("\"x\".padStart(3, '0')"), Value::str("00x"));
    assert_eq!(eval("\"hello\"[1]"), Value::Char('e'));
}

#[test]
fn number_conversions_and_rounding() {
    // Narrowing truncates toward zero; roundToInt is half away from zero.
    assert_eq!(eval("3.7.toInt()"), Value::Int(3));
    assert_eq!(eval("(-3.7).toInt()"), Value::Int(-3));
    assert_eq!(eval("3.7.roundToInt()"), Value::Int(4));
    assert_eq!(eval("3.2.roundToInt()"), Value::Int(3));
    assert_eq!(eval("(-3.5).roundToInt()"), Value::Int(-4));
    assert_eq!(eval("7.toDouble()"), Value::Double(7.0));
    assert_eq!(eval("7.toLong()"), Value::Long(7));
}

#[test]
fn math_builtins() {
    assert_eq!(eval("min(3, 1, 2)"), Value::Int(1));
    assert_eq!(eval("max(3, 1, 2)"), Value::Int(3));
    assert_eq!(eval("abs(-4)"), Value::Int(4));
    assert_eq!(eval("sqrt(9.0)"), Value::Double(3.0));
}

#[test]
fn json_parse_and_stringify() {
    let source = r#"
val parsed = Json.parse("{\"name\": \"nova\", \"tags\": [1, 2], \"ok\": true}")
listOf(parsed["name"], parsed["tags"][1], parsed["ok"])
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::str("nova"), Value::Int(2), Value::Bool(true)])
    );
    assert_eq!(
        eval("Json.stringify(mapOf(\"a\" to 1))"),
        Value::str("{\"a\":1}")
    );
}

#[test]
fn json_parse_error_is_reported() {
    let err = eval_err("Json.parse(\"{nope\")");
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("json"));
}

#[test]
fn json_round_trip_preserves_order() {
    let source = "Json.parse(Json.stringify(mapOf(\"z\" to 1, \"a\" to 2))).keys()";
    assert_eq!(eval(source), Value::list(vec![Value::str("z"), Value::str("a")]));
}

#[test]
fn regex_operations() {
    assert_eq!(eval("Regex(\"[0-9]+\").matches(\"abc123\")"), Value::Bool(true));
    assert_eq!(eval("Regex(\"[0-9]+\").find(\"abc123def\")"), Value::str("123"));
    assert_eq!(
        eval("Regex(\"[0-9]+\").findAll(\"a1b22c333\")"),
        Value::list(vec![Value::str("1"), Value::str("22"), Value::str("333")])
    );
    assert_eq!(
        eval("Regex(\"\\\\s+\").replace(\"a  b\\tc\", \"-\")"),
        Value::str("a-b-c")
    );
    assert_eq!(eval_err("Regex(\"[unclosed\")").kind(), ErrorKind::TypeError);
}

#[test]
fn time_module_surface() {
    let source = "val t = Time.now()\nval n = Time.nanoTime()\nlistOf(t > 0L, n > 0L, Time.today().length() >= 10)";
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Bool(true), Value::Bool(true), Value::Bool(true)])
    );
}

#[test]
fn measure_time_millis_returns_elapsed() {
    let source = "val ms = measureTimeMillis { delay(15) }\nms >= 10L";
    assert_eq!(eval(source), Value::Bool(true));
}

#[test]
fn assertions() {
    assert_eq!(eval("assert(1 + 1 == 2)\n\"ok\""), Value::str("ok"));
    assert_eq!(eval_err("assert(false, \"nope\")").kind(), ErrorKind::AssertionError);
    assert_eq!(eval_err("assertEquals(1, 2)").kind(), ErrorKind::AssertionError);
    assert_eq!(eval("assertNotNull(5)"), Value::Int(5));
    assert_eq!(eval_err("fail(\"boom\")").kind(), ErrorKind::AssertionError);
}

#[test]
fn file_io_round_trip() {
    let path = std::env::temp_dir().join(format!("nova-io-{}.txt", std::process::id()));
    let source = format!(
        "val f = File(\"{}\")\nf.writeText(\"line1\\nline2\")\nval back = f.lines()\nf.delete()\nback",
        path.display()
    );
    assert_eq!(
        eval(&source),
        Value::list(vec![Value::str("line1"), Value::str("line2")])
    );
}

#[test]
fn system_args_surface() {
    let mut interp = Interpreter::new();
    interp.set_cli_args(vec!["alpha".into(), "beta".into()]);
    assert_eq!(
        interp.eval("System.args()[1]", "test.nova").unwrap(),
        Value::str("beta")
    );
}

#[test]
fn pairs_and_ranges() {
    assert_eq!(eval("(1 to \"x\").first"), Value::Int(1));
    assert_eq!(eval("Pair(2, 3).second"), Value::Int(3));
    assert_eq!(eval("(1..10).count()"), Value::Int(10));
    assert_eq!(eval("(1..<10).contains(10)"), Value::Bool(false));
}
