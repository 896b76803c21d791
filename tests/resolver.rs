//! Static-analysis rules: everything the resolver rejects or warns about
//! before a program is allowed to run.

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

fn expect_static_error(source: &str, fragment: &str) -> Run {
    let result = run(source);
    assert!(
        result.reporter.had_error(),
        "expected a static error for: {}",
        source
    );
    assert!(
        result
            .reporter
            .messages()
            .iter()
            .any(|message| message.contains(fragment)),
        "no message containing {:?} in {:?}",
        fragment,
        result.reporter.messages()
    );
    result
}

#[test]
fn test_return_outside_a_function() {
    let result = expect_static_error("return 1;", "Cannot return from top-level code");
    // A static error blocks interpretation entirely
    assert!(result.output.is_empty());
}

#[test]
fn test_static_error_prevents_interpretation() {
    let result = expect_static_error(
        "print \"never\"; return 1;",
        "Cannot return from top-level code",
    );
    assert!(result.output.is_empty());
}

#[test]
fn test_return_with_value_in_constructor() {
    expect_static_error(
        "class C { init() { return 1; } }",
        "Cannot return a value from a constructor",
    );
}

#[test]
fn test_bare_return_in_constructor_is_allowed() {
    let result = run("class C { init() { return; } } C();");
    assert!(!result.reporter.had_error());
    assert!(!result.reporter.had_runtime_error());
}

#[test]
fn test_reading_a_local_in_its_own_initializer() {
    expect_static_error(
        "var a = 1; { var a = a + 1; }",
        "Cannot read local variable in its own initializer",
    );
}

#[test]
fn test_local_redeclaration_in_same_scope() {
    expect_static_error(
        "{ var a = 1; var a = 2; }",
        "Variable with this name is already declared in this scope",
    );
}

#[test]
fn test_duplicate_parameter_names() {
    expect_static_error(
        "fun f(a, a) { return a; }",
        "Variable with this name is already declared in this scope",
    );
}

#[test]
fn test_global_redeclaration_is_not_a_static_error() {
    let result = run("var a = 1; var a = 2; print a;");
    assert!(!result.reporter.had_error());
    assert_eq!(result.output, "2\n");
}

#[test]
fn test_this_outside_a_class() {
    expect_static_error("print this;", "Cannot use 'this' outside of a class");
    expect_static_error(
        "fun f() { return this; }",
        "Cannot use 'this' outside of a class",
    );
}

#[test]
fn test_this_inside_an_unbound_member() {
    expect_static_error(
        "class C { unbound f() { return this; } }",
        "Cannot use 'this' in an unbound function",
    );
}

#[test]
fn test_super_outside_a_class() {
    expect_static_error("print super.x;", "Cannot use 'super' outside of a class");
}

#[test]
fn test_super_in_a_class_without_superclass() {
    expect_static_error(
        "class C { m() { return super.m(); } }",
        "Cannot use 'super' in a class with no superclass",
    );
}

#[test]
fn test_class_cannot_inherit_from_itself() {
    expect_static_error("class A < A {}", "A class cannot inherit from itself");
}

#[test]
fn test_resolution_continues_after_an_error() {
    // Both bad statements produce diagnostics in one pass
    let result = run("return 1; print this;");
    assert!(result.reporter.had_error());
    let messages = result.reporter.messages();
    assert!(messages
        .iter()
        .any(|message| message.contains("Cannot return from top-level code")));
    assert!(messages
        .iter()
        .any(|message| message.contains("Cannot use 'this' outside of a class")));
}

#[test]
fn test_getter_without_return_warns_but_runs() {
    let result = run("class C { broken { var x = 1; } } print \"ran\";");
    assert!(!result.reporter.had_error());
    assert!(result
        .reporter
        .messages()
        .iter()
        .any(|message| message.contains("Warning")
            && message.contains("Getter does not return a value")));
    assert_eq!(result.output, "ran\n");
}

#[test]
fn test_getter_with_return_does_not_warn() {
    let result = run("class C { fine { return 1; } }");
    assert!(result.reporter.messages().is_empty());
}

#[test]
fn test_getter_conditional_return_counts() {
    // Any non-empty return inside the getter body clears the warning
    let result = run("class C { maybe { if (true) return 1; } }");
    assert!(result.reporter.messages().is_empty());
}

#[test]
fn test_lambda_inside_getter_does_not_satisfy_the_return_rule() {
    let result = run("class C { broken { var f = || 1; } }");
    assert!(result
        .reporter
        .messages()
        .iter()
        .any(|message| message.contains("Getter does not return a value")));
}

#[test]
fn test_return_inside_lambda_is_allowed() {
    let result = run("var f = |x| { return x; }; print f(3);");
    assert!(!result.reporter.had_error());
    assert_eq!(result.output, "3\n");
}

#[test]
fn test_shadowing_in_inner_scope_is_allowed() {
    let result = run("{ var a = 1; { var a = 2; print a; } print a; }");
    assert!(!result.reporter.had_error());
    assert_eq!(result.output, "2\n1\n");
}
