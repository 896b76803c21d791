//! Expression operator semantics: arithmetic, comparison, equality,
//! logical short-circuit, ternary, and the comma operator.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use lox::diagnostic::{BufferReporter, Reporter};
use lox::interpreter::{run_source, Interpreter};

struct Run {
    output: String,
    reporter: Rc<BufferReporter>,
}

fn run(source: &str) -> Run {
    let reporter = Rc::new(BufferReporter::new());
    let out: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(
        Rc::clone(&reporter) as Rc<dyn Reporter>,
        Rc::clone(&out) as Rc<RefCell<dyn Write>>,
    );
    let _ = run_source(source, &mut interpreter);
    let output = String::from_utf8(out.borrow().clone()).unwrap();
    Run { output, reporter }
}

fn lines(source: &str) -> Vec<String> {
    run(source).output.lines().map(str::to_string).collect()
}

fn first_error(source: &str) -> String {
    let result = run(source);
    assert!(
        result.reporter.had_error() || result.reporter.had_runtime_error(),
        "expected an error for: {}",
        source
    );
    result.reporter.messages().first().cloned().unwrap_or_default()
}

// ============================================================================
// ARITHMETIC
// ============================================================================

#[test]
fn test_addition_and_precedence() {
    assert_eq!(lines("print 1 + 2 * 3;"), vec!["7"]);
    assert_eq!(lines("print (1 + 2) * 3;"), vec!["9"]);
    assert_eq!(lines("print 10 - 4 - 3;"), vec!["3"]);
}

#[test]
fn test_division() {
    assert_eq!(lines("print 7 / 2;"), vec!["3.5"]);
    assert_eq!(lines("print 8 / 2 / 2;"), vec!["2"]);
}

#[test]
fn test_division_by_zero_is_a_runtime_error() {
    let result = run("print 1 / 0;");
    assert!(result.reporter.had_runtime_error());
    assert!(result.output.is_empty());
    assert!(result.reporter.messages()[0].contains("Right operand of division must not be 0"));
}

#[test]
fn test_integer_valued_numbers_print_without_fraction() {
    assert_eq!(lines("print 3;"), vec!["3"]);
    assert_eq!(lines("print 6 / 2;"), vec!["3"]);
    assert_eq!(lines("print -0 - 7;"), vec!["-7"]);
}

#[test]
fn test_unary_minus() {
    assert_eq!(lines("print -5;"), vec!["-5"]);
    assert_eq!(lines("print --5;"), vec!["5"]);
    assert!(first_error("print -\"a\";").contains("Operands must be numbers"));
}

#[test]
fn test_arithmetic_requires_numbers() {
    assert!(first_error("print 1 - \"a\";").contains("Operands must be numbers"));
    assert!(first_error("print true * 2;").contains("Operands must be numbers"));
}

// ============================================================================
// STRING CONCATENATION
// ============================================================================

#[test]
fn test_string_concatenation() {
    assert_eq!(lines("print \"foo\" + \"bar\";"), vec!["foobar"]);
}

#[test]
fn test_plus_coerces_when_either_side_is_a_string() {
    assert_eq!(lines("print \"n = \" + 4;"), vec!["n = 4"]);
    assert_eq!(lines("print 4 + \"!\";"), vec!["4!"]);
    assert_eq!(lines("print \"is \" + true;"), vec!["is true"]);
    assert_eq!(lines("print \"x \" + nil;"), vec!["x nil"]);
}

#[test]
fn test_plus_on_bools_is_an_error() {
    assert!(first_error("print true + false;").contains("numbers or strings"));
}

// ============================================================================
// COMPARISON
// ============================================================================

#[test]
fn test_number_comparison() {
    assert_eq!(
        lines("print 1 < 2; print 2 <= 2; print 3 > 4; print 4 >= 4;"),
        vec!["true", "true", "false", "true"]
    );
}

#[test]
fn test_string_comparison_is_bytewise() {
    assert_eq!(lines("print \"abc\" < \"abd\";"), vec!["true"]);
    assert_eq!(lines("print \"b\" > \"a\";"), vec!["true"]);
    assert_eq!(lines("print \"Z\" < \"a\";"), vec!["true"]);
}

#[test]
fn test_mixed_comparison_is_an_error() {
    assert!(first_error("print \"a\" < 1;").contains("numbers or strings"));
    assert!(first_error("print nil < nil;").contains("numbers or strings"));
}

// ============================================================================
// EQUALITY
// ============================================================================

#[test]
fn test_equality_on_primitives() {
    assert_eq!(
        lines("print 1 == 1; print 1 == 2; print \"a\" == \"a\"; print true == true;"),
        vec!["true", "false", "true", "true"]
    );
}

#[test]
fn test_nil_equals_nil() {
    assert_eq!(lines("print nil == nil; print nil != nil;"), vec!["true", "false"]);
}

#[test]
fn test_cross_variant_equality_is_always_false() {
    assert_eq!(
        lines("print 1 == \"1\"; print 0 == false; print nil == false; print 1 != \"1\";"),
        vec!["false", "false", "false", "true"]
    );
}

#[test]
fn test_function_equality_is_identity() {
    assert_eq!(
        lines("fun a() {} fun b() {} var c = a; print a == b; print a == c;"),
        vec!["false", "true"]
    );
}

#[test]
fn test_instance_equality_is_identity() {
    assert_eq!(
        lines("class C {} var x = C(); var y = C(); var z = x; print x == y; print x == z;"),
        vec!["false", "true"]
    );
}

// ============================================================================
// TRUTHINESS AND LOGICAL OPERATORS
// ============================================================================

#[test]
fn test_only_nil_and_false_are_falsy() {
    assert_eq!(
        lines("print !nil; print !false; print !0; print !\"\"; print !true;"),
        vec!["true", "true", "false", "false", "false"]
    );
}

#[test]
fn test_logical_operators_return_the_deciding_operand() {
    assert_eq!(lines("print nil or 5;"), vec!["5"]);
    assert_eq!(lines("print 0 or 5;"), vec!["0"]);
    assert_eq!(lines("print false and 3;"), vec!["false"]);
    assert_eq!(lines("print 1 and 2;"), vec!["2"]);
    assert_eq!(lines("print nil and 2;"), vec!["nil"]);
}

#[test]
fn test_and_short_circuits() {
    assert_eq!(
        lines(
            "var called = false;\n\
             fun mark() { called = true; return true; }\n\
             var r = false and mark();\n\
             print called; print r;"
        ),
        vec!["false", "false"]
    );
}

#[test]
fn test_or_short_circuits() {
    assert_eq!(
        lines(
            "var called = false;\n\
             fun mark() { called = true; return true; }\n\
             var r = true or mark();\n\
             print called; print r;"
        ),
        vec!["false", "true"]
    );
}

// ============================================================================
// TERNARY
// ============================================================================

#[test]
fn test_ternary_selects_branch() {
    assert_eq!(lines("print true ? 1 : 2;"), vec!["1"]);
    assert_eq!(lines("print false ? 1 : 2;"), vec!["2"]);
    assert_eq!(lines("print nil ? \"y\" : \"n\";"), vec!["n"]);
}

#[test]
fn test_ternary_evaluates_exactly_one_branch() {
    assert_eq!(
        lines(
            "var trace = \"\";\n\
             fun note(x) { trace = trace + x; return x; }\n\
             print true ? note(\"t\") : note(\"f\");\n\
             print trace;"
        ),
        vec!["t", "t"]
    );
}

#[test]
fn test_ternary_nests_in_else_position() {
    assert_eq!(lines("print false ? 1 : true ? 2 : 3;"), vec!["2"]);
}

// ============================================================================
// COMMA
// ============================================================================

#[test]
fn test_comma_yields_the_right_operand() {
    assert_eq!(lines("print (1, 2);"), vec!["2"]);
}

#[test]
fn test_comma_evaluates_the_left_operand_for_effect() {
    assert_eq!(lines("var a = 0; print (a = 1, a + 1); print a;"), vec!["2", "1"]);
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

#[test]
fn test_assignment_is_an_expression() {
    assert_eq!(lines("var a = 1; print a = 5; print a;"), vec!["5", "5"]);
}

#[test]
fn test_assignment_is_right_associative() {
    assert_eq!(lines("var a = 0; var b = 0; a = b = 3; print a; print b;"), vec!["3", "3"]);
}

#[test]
fn test_assigning_undefined_is_a_runtime_error() {
    assert!(first_error("ghost = 1;").contains("Cannot assign to undefined identifier 'ghost'"));
}
