//! Annotation engine: processor registry, handle lifecycle, firing order.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use nova::{ClassTarget, Interpreter, NativeProcessor, RunResult, Value};

fn eval(source: &str) -> Value {
    Interpreter::new().eval(source, "test.nova").unwrap()
}

/// Script-registered processors fire once per annotated class declaration.
#[test]
fn processor_fires_per_annotated_class() {
    let source = r#"
var names = []
registerAnnotationProcessor("tag") { t, a -> names.add(t.name) }
annotation class tag
@tag class A
@tag class B
listOf(names.size(), names[0], names[1])
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Int(2), Value::str("A"), Value::str("B")])
    );
}

#[test]
fn processors_fire_in_registration_order() {
    let source = r#"
var log = []
registerAnnotationProcessor("tag") { t, a -> log.add("first") }
registerAnnotationProcessor("tag") { t, a -> log.add("second") }
annotation class tag
@tag class A
log
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("first"), Value::str("second")]));
}

/// `@a @b class X` fires @a's processors before @b's.
#[test]
fn annotations_fire_left_to_right() {
    let source = r#"
var log = []
registerAnnotationProcessor("b") { t, a -> log.add("b") }
registerAnnotationProcessor("a") { t, a -> log.add("a") }
annotation class a
annotation class b
@a @b class X
log
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("a"), Value::str("b")]));
}

#[test]
fn unregister_removes_only_own_entry() {
    let source = r#"
var log = []
val h1 = registerAnnotationProcessor("tag") { t, a -> log.add("one") }
val h2 = registerAnnotationProcessor("tag") { t, a -> log.add("two") }
h1.unregister()
annotation class tag
@tag class A
log
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("two")]));
}

/// Re-registering appends to the end: order is re-observed.
#[test]
fn re_register_appends_to_end() {
    let source = r#"
var log = []
val h1 = registerAnnotationProcessor("tag") { t, a -> log.add("one") }
registerAnnotationProcessor("tag") { t, a -> log.add("two") }
h1.unregister()
h1.register()
annotation class tag
@tag class A
log
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("two"), Value::str("one")]));
}

/// `replace` swaps the handler in place, keeping its position.
#[test]
fn replace_keeps_order() {
    let source = r#"
var log = []
val h1 = registerAnnotationProcessor("tag") { t, a -> log.add("old") }
registerAnnotationProcessor("tag") { t, a -> log.add("second") }
h1.replace({ t, a -> log.add("new") })
annotation class tag
@tag class A
log
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("new"), Value::str("second")]));
}

#[test]
fn annotation_arguments_are_named_by_declared_params() {
    let source = r#"
var seen = null
annotation class route(val path: String, val method: String)
registerAnnotationProcessor("route") { t, a -> seen = a }
@route("/home", method = "GET") class Home
listOf(seen["path"], seen["method"])
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("/home"), Value::str("GET")]));
}

/// Unknown annotations never fail the declaration; they are observable on
/// the class's annotation list.
#[test]
fn unknown_annotations_are_recorded() {
    let source = r#"
@mystery("x") class A(val v: Int)
val anns = A.annotations
listOf(anns.size(), anns[0]["name"])
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Int(1), Value::str("mystery")]));
}

#[test]
fn target_exposes_fields_and_methods() {
    let source = r#"
var fields = null
var methods = null
registerAnnotationProcessor("probe") { t, a ->
    fields = t.fields
    methods = t.methods
}
annotation class probe
@probe class P(val a: Int, private val b: Int) {
    fun m(x, y) = x + y
}
listOf(
    fields.size(),
    fields[0]["name"],
    fields[1]["visibility"],
    methods[0]["name"],
    methods[0]["parameterNames"]
)
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![
            Value::Int(2),
            Value::str("a"),
            Value::str("private"),
            Value::str("m"),
            Value::list(vec![Value::str("x"), Value::str("y")]),
        ])
    );
}

#[test]
fn processor_can_set_static_fields() {
    let source = r#"
registerAnnotationProcessor("count") { t, a -> t.setStaticField("seen", true) }
annotation class count
@count class A
A.seen
"#;
    assert_eq!(eval(source), Value::Bool(true));
}

/// Native processors registered through the embedding API share the registry
/// with script processors.
#[test]
fn native_processor_participates() {
    #[derive(Debug)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl NativeProcessor for Recorder {
        fn annotation_name(&self) -> &str {
            "tag"
        }

        fn process_class(&self, target: &ClassTarget, args: &IndexMap<String, Value>) -> RunResult<()> {
            let _ = args;
            self.0.lock().unwrap().push(target.name().to_owned());
            Ok(())
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.register_annotation_processor(Arc::new(Recorder(Arc::clone(&seen))));
    interp
        .eval("annotation class tag\n@tag class Alpha\n@tag class Beta", "test.nova")
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["Alpha".to_owned(), "Beta".to_owned()]);
}

/// The built-in data and builder processors are pre-registered.
#[test]
fn builtin_processors_are_preregistered() {
    let source = "@data class P(val a: Int)\nP(1) == P(1)";
    assert_eq!(eval(source), Value::Bool(true));
}
