//! Class and object model: data classes, builders, inheritance, interfaces,
//! singletons, visibility, statics, operator methods.

use nova::{ErrorKind, Interpreter, Value};

fn eval(source: &str) -> Value {
    Interpreter::new().eval(source, "test.nova").unwrap()
}

fn eval_err(source: &str) -> nova::Error {
    Interpreter::new().eval(source, "test.nova").unwrap_err()
}

/// @data copy + destructuring end-to-end.
#[test]
fn data_copy_and_destructure() {
    let source = r#"
@data class V(val x: Int, val y: Int, val z: Int)
val a = V(1, 2, 3)
val b = a.copy(z = 10)
val (p, q, r) = b
listOf(p, q, r)
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(10)])
    );
}

/// copy leaves the other fields untouched and the original unchanged.
#[test]
fn data_copy_is_non_destructive() {
    let source = r#"
@data class P(val a: Int, val b: Int)
val orig = P(1, 2)
val changed = orig.copy(a = 9)
listOf(orig.a, orig.b, changed.a, changed.b)
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(9), Value::Int(2)])
    );
}

#[test]
fn data_equality_is_pairwise_on_ctor_fields() {
    let source = r#"
@data class P(val a: Int, val b: String)
listOf(P(1, "x") == P(1, "x"), P(1, "x") == P(2, "x"))
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Bool(true), Value::Bool(false)]));
}

#[test]
fn data_to_string_renders_fields() {
    let source = "@data class P(val a: Int, val b: String)\nP(1, \"x\").toString()";
    assert_eq!(eval(source), Value::str("P(a=1, b=x)"));
}

#[test]
fn data_hash_code_consistent_with_equals() {
    let source = r#"
@data class P(val a: Int, val b: Int)
P(1, 2).hashCode() == P(1, 2).hashCode()
"#;
    assert_eq!(eval(source), Value::Bool(true));
}

#[test]
fn plain_class_equality_is_identity() {
    let source = r#"
class P(val a: Int)
val x = P(1)
listOf(x == x, P(1) == P(1))
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Bool(true), Value::Bool(false)]));
}

#[test]
fn user_equals_overrides_identity() {
    let source = r#"
class P(val a: Int) {
    fun equals(other) = a == other.a
}
P(1) == P(1)
"#;
    assert_eq!(eval(source), Value::Bool(true));
}

#[test]
fn builder_synthesizes_fluent_api() {
    let source = r#"
@builder class Server(val host: String, val port: Int, val tls: Boolean = false)
val s = Server.builder().host("localhost").port(8080).build()
listOf(s.host, s.port)
"#;
    assert_eq!(eval(source), Value::list(vec![Value::str("localhost"), Value::Int(8080)]));
}

#[test]
fn builder_fails_on_unset_required_field() {
    let source = r#"
@builder class Server(val host: String, val port: Int)
Server.builder().host("x").build()
"#;
    let err = eval_err(source);
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("port"));
}

/// Calling an annotation class always fails.
#[test]
fn annotation_class_cannot_be_instantiated() {
    let source = "annotation class tag(val label: String)\ntag(\"x\")";
    let err = eval_err(source);
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("tag"));
}

#[test]
fn inheritance_with_super_call() {
    let source = r#"
open class Animal(val name: String) {
    fun describe() = name + " the " + kind()
    fun kind() = "animal"
}
class Dog(name: String) : Animal(name) {
    fun kind() = "dog"
}
Dog("rex").describe()
"#;
    assert_eq!(eval(source), Value::str("rex the dog"));
}

#[test]
fn extending_a_closed_class_fails() {
    let source = "class A(val x: Int)\nclass B(x: Int) : A(x)";
    let err = eval_err(source);
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("not open"));
}

#[test]
fn interface_default_and_abstract_methods() {
    let source = r#"
interface Greeter {
    fun name(): String
    fun greet() = "hello " + name()
}
class English : Greeter {
    fun name() = "world"
}
English().greet()
"#;
    assert_eq!(eval(source), Value::str("hello world"));
}

#[test]
fn is_checks_superclasses_and_interfaces() {
    let source = r#"
interface Shape { fun area(): Int }
open class Base(val tag: String)
class Square(tag: String, val side: Int) : Base(tag), Shape {
    fun area() = side * side
}
val s = Square("sq", 3)
listOf(s is Square, s is Base, s is Shape, s is String)
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![
            Value::Bool(true),
            Value::Bool(true),
            Value::Bool(true),
            Value::Bool(false)
        ])
    );
}

#[test]
fn object_declaration_is_a_singleton() {
    let source = r#"
object Config {
    var hits = 0
    fun touch() { hits = hits + 1 }
}
Config.touch()
Config.touch()
Config.hits
"#;
    assert_eq!(eval(source), Value::Int(2));
}

#[test]
fn class_body_runs_per_instantiation() {
    let source = r#"
var inits = 0
class Tracked(val id: Int) {
    inits = inits + 1
}
Tracked(1)
Tracked(2)
inits
"#;
    assert_eq!(eval(source), Value::Int(2));
}

#[test]
fn body_fields_and_methods() {
    let source = r#"
class Counter(val start: Int) {
    var current = start
    fun bump() { current = current + 1 }
    fun value() = current
}
val c = Counter(10)
c.bump()
c.bump()
c.value()
"#;
    assert_eq!(eval(source), Value::Int(12));
}

#[test]
fn private_fields_are_inaccessible_outside() {
    let source = "class Secret(private val key: String)\nSecret(\"k\").key";
    let err = eval_err(source);
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("private"));
}

#[test]
fn private_fields_are_readable_inside_methods() {
    let source = r#"
class Secret(private val key: String) {
    fun reveal() = key
}
Secret("k").reveal()
"#;
    assert_eq!(eval(source), Value::str("k"));
}

#[test]
fn val_ctor_field_cannot_be_reassigned() {
    let source = "class P(val a: Int)\nval p = P(1)\np.a = 2";
    assert_eq!(eval_err(source).kind(), ErrorKind::TypeError);
}

#[test]
fn var_ctor_field_can_be_reassigned() {
    let source = "class P(var a: Int)\nval p = P(1)\np.a = 2\np.a";
    assert_eq!(eval(source), Value::Int(2));
}

#[test]
fn static_members() {
    let source = r#"
class Ids {
    static var next = 100
    static fun take(): Int {
        val id = Ids.next
        Ids.next = id + 1
        return id
    }
}
listOf(Ids.take(), Ids.take(), Ids.next)
"#;
    assert_eq!(
        eval(source),
        Value::list(vec![Value::Int(100), Value::Int(101), Value::Int(102)])
    );
}

#[test]
fn operator_methods_bind_to_tokens() {
    let source = r#"
class Vec(val x: Int, val y: Int) {
    fun plus(other) = Vec(x + other.x, y + other.y)
    fun times(k) = Vec(x * k, y * k)
    fun get(i) = if (i == 0) { x } else { y }
}
val v = (Vec(1, 2) + Vec(3, 4)) * 2
listOf(v[0], v[1])
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Int(8), Value::Int(12)]));
}

#[test]
fn compare_to_drives_comparisons() {
    let source = r#"
class Money(val cents: Int) {
    fun compareTo(other) = cents - other.cents
}
listOf(Money(100) < Money(200), Money(300) <= Money(200))
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Bool(true), Value::Bool(false)]));
}

#[test]
fn contains_operator_method() {
    let source = r#"
class Bag(val items: List) {
    fun contains(v) = items.contains(v)
}
val b = Bag(listOf(1, 2))
listOf(1 in b, 5 in b)
"#;
    assert_eq!(eval(source), Value::list(vec![Value::Bool(true), Value::Bool(false)]));
}

#[test]
fn user_to_string_wins_in_interpolation() {
    let source = r##"
class Tag(val id: Int) {
    fun toString() = "#" + id
}
"tag=${Tag(7)}"
"##;
    assert_eq!(eval(source), Value::str("tag=#7"));
}

#[test]
fn ctor_defaults_evaluate_in_declaration_order() {
    let source = "class Box(val w: Int, val h: Int = w * 2)\nval b = Box(3)\nlistOf(b.w, b.h)";
    assert_eq!(eval(source), Value::list(vec![Value::Int(3), Value::Int(6)]));
}

#[test]
fn instantiate_with_named_arguments() {
    let source = "class P(val a: Int, val b: Int)\nval p = P(b = 2, a = 1)\nlistOf(p.a, p.b)";
    assert_eq!(eval(source), Value::list(vec![Value::Int(1), Value::Int(2)]));
}

#[test]
fn destructure_via_user_component_methods() {
    let source = r#"
class Two(val a: Int, val b: Int) {
    fun component1() = a
    fun component2() = b
}
val (x, y) = Two(4, 5)
x * 10 + y
"#;
    assert_eq!(eval(source), Value::Int(45));
}

#[test]
fn destructure_lists_and_pairs_positionally() {
    assert_eq!(
        eval("val (a, b) = listOf(7, 8)\na * 10 + b"),
        Value::Int(78)
    );
    assert_eq!(eval("val (k, v) = \"x\" to 9\nlistOf(k, v)"), Value::list(vec![Value::str("x"), Value::Int(9)]));
}
