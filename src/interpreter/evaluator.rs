//! The tree-walking evaluator.
//!
//! Statements execute against a current environment frame; `Return` and
//! `Exit` travel dedicated channels so no generic error handling can swallow
//! them, and every block restores its previous environment on every exit
//! path.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::ast::{Expr, FunctionKind, Stmt};
use crate::diagnostic::Reporter;
use crate::lexer::Lexer;
use crate::token::{Token, TokenType};
use crate::value::{stringify, Value};

use super::builtins;
use super::class::{Class, Instance, MemberMap};
use super::control_flow::{ControlFlow, Exit};
use super::environment::Environment;
use super::error::{Halt, RuntimeError};
use super::function::{Callable, Function};
use super::parser::Parser;
use super::resolver::Resolver;

const MAX_RECURSION_DEPTH: usize = 1000;

/// Runs one source unit through the whole pipeline against a live
/// interpreter. Each stage stops the run when it reported errors; `Err(Exit)`
/// surfaces a call to the `exit()` built-in.
pub fn run_source(source: &str, interpreter: &mut Interpreter) -> Result<(), Exit> {
    let reporter = interpreter.reporter();

    let tokens = Lexer::new(source, Rc::clone(&reporter)).lex();
    if reporter.had_error() {
        return Ok(());
    }

    let statements = Parser::new(tokens, Rc::clone(&reporter)).parse();
    if reporter.had_error() {
        return Ok(());
    }

    Resolver::new(Rc::clone(&reporter)).resolve(&statements);
    if reporter.had_error() {
        return Ok(());
    }

    interpreter.interpret(&statements)
}

pub struct Interpreter {
    pub globals: Rc<Environment>,
    environment: Rc<Environment>,
    reporter: Rc<dyn Reporter>,
    out: Rc<RefCell<dyn Write>>,
    base_dir: PathBuf,
    recursion_depth: Rc<Cell<usize>>,
    last_value: Value,
}

impl Interpreter {
    pub fn new(reporter: Rc<dyn Reporter>, out: Rc<RefCell<dyn Write>>) -> Self {
        let globals = Rc::new(Environment::new());
        builtins::install(&globals);
        Self {
            environment: Rc::clone(&globals),
            globals,
            reporter,
            out,
            base_dir: PathBuf::from("."),
            recursion_depth: Rc::new(Cell::new(0)),
            last_value: Value::Nil,
        }
    }

    /// Directory `includeStr` paths are resolved against; the driver points
    /// this at the initial script's directory.
    pub fn with_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = base_dir;
        self
    }

    pub fn reporter(&self) -> Rc<dyn Reporter> {
        Rc::clone(&self.reporter)
    }

    pub fn out(&self) -> Rc<RefCell<dyn Write>> {
        Rc::clone(&self.out)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn current_environment(&self) -> Rc<Environment> {
        Rc::clone(&self.environment)
    }

    /// Value of the most recently evaluated statement expression; what
    /// `eval` hands back to the caller.
    pub fn last_value(&self) -> Value {
        self.last_value.clone()
    }

    /// Executes a program. Runtime errors are reported and abandon the rest
    /// of the program; globals and closures survive for the next call, which
    /// is what keeps the REPL alive across lines.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), Exit> {
        for statement in statements {
            match self.execute(statement) {
                Ok(_) => {}
                Err(Halt::Error(error)) => {
                    self.reporter.runtime_error(&error.token, &error.message);
                    return Ok(());
                }
                Err(Halt::Exit) => return Err(Exit),
            }
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<ControlFlow, Halt> {
        match statement {
            Stmt::Print(value) => {
                let value = self.evaluate(value)?;
                writeln!(self.out.borrow_mut(), "{}", stringify(&value)).ok();
                self.last_value = value;
                Ok(ControlFlow::Normal)
            }
            Stmt::Expr(value) => {
                self.last_value = self.evaluate(value)?;
                Ok(ControlFlow::Normal)
            }
            Stmt::Var { name, initializer } => {
                // An Empty initializer evaluates to nil
                let value = self.evaluate(initializer)?;
                self.last_value = value.clone();
                self.define_declaration(name, value)?;
                Ok(ControlFlow::Normal)
            }
            Stmt::Block(statements) => {
                self.execute_block(statements, Rc::clone(&self.environment))
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else {
                    // An absent else is an Empty statement and does nothing
                    self.execute(else_branch)
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let ControlFlow::Return(value) = self.execute(body)? {
                        return Ok(ControlFlow::Return(value));
                    }
                }
                Ok(ControlFlow::Normal)
            }
            Stmt::Empty => Ok(ControlFlow::Normal),
            Stmt::Function(declaration) => {
                debug!("declaring {} '{}'", declaration.kind.get(), declaration.name.lexeme);
                let function =
                    Function::new(Rc::clone(declaration), Rc::clone(&self.environment));
                self.define_declaration(&declaration.name, Value::Function(Rc::new(function)))?;
                Ok(ControlFlow::Normal)
            }
            Stmt::Return { value, .. } => {
                // An empty return carries nil; constructors fix the value up
                // at the call layer
                let value = self.evaluate(value)?;
                Ok(ControlFlow::Return(value))
            }
            Stmt::Class {
                name,
                members,
                superclass,
            } => self.execute_class(name, members, superclass.as_ref()),
            Stmt::Malformed { critical, message } => {
                if *critical {
                    let token = Token::new(TokenType::Eof, "MALFORMED", None, 0);
                    return Err(RuntimeError::new(
                        &token,
                        format!(
                            "Malformed statement node in AST. Syntax was not valid: {}",
                            message
                        ),
                    )
                    .into());
                }
                Ok(ControlFlow::Normal)
            }
        }
    }

    /// Runs `body` in a fresh frame chained onto `enclosing`, restoring the
    /// previous frame on every exit path. Closures rely on the restored
    /// frame being the same shared reference they captured.
    pub fn execute_block(
        &mut self,
        body: &[Stmt],
        enclosing: Rc<Environment>,
    ) -> Result<ControlFlow, Halt> {
        let previous = Rc::clone(&self.environment);
        self.environment = Rc::new(Environment::with_enclosing(enclosing));

        let mut result = Ok(ControlFlow::Normal);
        for statement in body {
            match self.execute(statement) {
                Ok(ControlFlow::Normal) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.environment = previous;
        result
    }

    fn execute_class(
        &mut self,
        name: &Token,
        members: &[Rc<crate::ast::FunctionDecl>],
        superclass: Option<&Expr>,
    ) -> Result<ControlFlow, Halt> {
        let superclass = match superclass {
            Some(expression) => {
                let token = match expression {
                    Expr::Variable { name, .. } => name,
                    _ => name,
                };
                match self.evaluate(expression)? {
                    Value::Class(class) => Some(class),
                    _ => {
                        return Err(
                            RuntimeError::new(token, "Superclass must be a class").into()
                        )
                    }
                }
            }
            None => None,
        };

        // Member closures of a subclass capture an extra frame where `super`
        // names the superclass
        let defining_env = match &superclass {
            Some(class) => Rc::new(Environment::with_binding(
                Rc::clone(&self.environment),
                "super",
                Value::Class(Rc::clone(class)),
            )),
            None => Rc::clone(&self.environment),
        };

        let mut methods = MemberMap::new();
        let mut unbounds = MemberMap::new();
        let mut getters = MemberMap::new();
        for member in members {
            let function = Rc::new(Function::new(Rc::clone(member), Rc::clone(&defining_env)));
            let table = match member.kind.get() {
                FunctionKind::Unbound => &mut unbounds,
                FunctionKind::Getter => &mut getters,
                _ => &mut methods,
            };
            table.insert(member.name.lexeme.clone(), function);
        }

        let class = Class::new(name.lexeme.clone(), superclass, methods, unbounds, getters);
        self.define_declaration(name, Value::Class(Rc::new(class)))?;
        Ok(ControlFlow::Normal)
    }

    /// Declaration statements define into the current frame; at the global
    /// frame they redefine silently so REPL lines can shadow earlier ones.
    fn define_declaration(&self, name: &Token, value: Value) -> Result<(), Halt> {
        if Rc::ptr_eq(&self.environment, &self.globals) {
            self.globals.redefine(&name.lexeme, value);
            return Ok(());
        }
        self.environment
            .define(&name.lexeme, value)
            .map_err(|message| RuntimeError::new(name, message).into())
    }

    fn evaluate(&mut self, expression: &Expr) -> Result<Value, Halt> {
        match expression {
            Expr::Literal(literal) => Ok(Value::from(literal)),
            Expr::Grouping(inner) => self.evaluate(inner),
            Expr::Empty => Ok(Value::Nil),
            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand)?;
                self.unary_op(op, value)
            }
            Expr::Binary { left, op, right } => {
                // Operands evaluate left to right
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary_op(left, op, right)
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                // Exactly one branch is evaluated
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }
            Expr::Logical { left, op, right } => {
                let left = self.evaluate(left)?;
                // The deciding operand is the result, never a coerced bool
                match op.kind {
                    TokenType::Or if left.is_truthy() => Ok(left),
                    TokenType::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;
                let callable = match callee.as_callable() {
                    Some(callable) => callable,
                    None => {
                        return Err(RuntimeError::new(
                            paren,
                            "Can only call functions and classes.",
                        )
                        .into())
                    }
                };

                let mut evaluated = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated.push(self.evaluate(argument)?);
                }

                if evaluated.len() != callable.arity() {
                    return Err(RuntimeError::new(
                        paren,
                        format!(
                            "Expected {} arguments but got {}.",
                            callable.arity(),
                            evaluated.len()
                        ),
                    )
                    .into());
                }

                let _guard = self.enter_call(paren)?;
                callable.call(self, evaluated)
            }
            Expr::Variable { name, depth } => self.lookup_variable(name, depth.get()),
            Expr::Assign { name, value, depth } => {
                let value = self.evaluate(value)?;
                let assigned = match depth.get() {
                    Some(depth) => {
                        self.environment
                            .assign_at(depth, &name.lexeme, value.clone())
                    }
                    None => self.globals.assign(&name.lexeme, value.clone()),
                };
                assigned.map_err(|message| RuntimeError::new(name, message))?;
                Ok(value)
            }
            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => self.get_property(&instance, name),
                    Value::Class(class) => match class.find_unbound(&name.lexeme) {
                        Some(unbound) => Ok(Value::Function(unbound)),
                        None => Err(RuntimeError::new(
                            name,
                            format!("Unbound function {} is not defined", name.lexeme),
                        )
                        .into()),
                    },
                    _ => Err(RuntimeError::new(
                        name,
                        "Expression before '.' must evaluate to an object",
                    )
                    .into()),
                }
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => {
                        let value = self.evaluate(value)?;
                        instance
                            .set_field(&name.lexeme, value.clone())
                            .map_err(|message| RuntimeError::new(name, message))?;
                        Ok(value)
                    }
                    _ => Err(RuntimeError::new(
                        name,
                        "Expression before '.' must evaluate to an object",
                    )
                    .into()),
                }
            }
            Expr::This { keyword, depth } => self.lookup_variable(keyword, depth.get()),
            Expr::Super {
                keyword,
                member,
                in_unbound,
                depth,
            } => self.evaluate_super(keyword, member, in_unbound.get(), depth.get()),
            Expr::Lambda(declaration) => Ok(Value::Function(Rc::new(Function::new(
                Rc::clone(declaration),
                Rc::clone(&self.environment),
            )))),
            Expr::Malformed { critical, message } => {
                if *critical {
                    let token = Token::new(TokenType::Eof, "MALFORMED", None, 0);
                    return Err(RuntimeError::new(
                        &token,
                        format!(
                            "Malformed expression node in AST. Syntax was not valid: {}",
                            message
                        ),
                    )
                    .into());
                }
                Ok(Value::Nil)
            }
        }
    }

    fn lookup_variable(&self, name: &Token, depth: Option<usize>) -> Result<Value, Halt> {
        let resolved = match depth {
            Some(depth) => self.environment.get_at(depth, &name.lexeme),
            None => self.globals.get(&name.lexeme),
        };
        resolved.map_err(|message| RuntimeError::new(name, message).into())
    }

    /// Property access on an instance: getter first (invoked on the spot),
    /// then a plain field, then a method freshly bound to the instance.
    fn get_property(&mut self, instance: &Rc<Instance>, name: &Token) -> Result<Value, Halt> {
        if let Some(getter) = instance.class().find_getter(&name.lexeme) {
            let _guard = self.enter_call(name)?;
            return Rc::new(getter.bind(instance)).call(self, Vec::new());
        }

        if let Some(value) = instance.field(&name.lexeme) {
            return Ok(value);
        }

        if let Some(method) = instance.class().find_method(&name.lexeme) {
            return Ok(Value::Function(Rc::new(method.bind(instance))));
        }

        Err(RuntimeError::new(
            name,
            format!("Property {} is not defined", name.lexeme),
        )
        .into())
    }

    /// `super` lives one frame outside `this` in the scope chain. In an
    /// unbound member there is no `this` binding frame at runtime, so the
    /// resolved depth overshoots by one and only unbound members of the
    /// superclass are reachable.
    fn evaluate_super(
        &mut self,
        keyword: &Token,
        member: &Token,
        in_unbound: bool,
        depth: Option<usize>,
    ) -> Result<Value, Halt> {
        let depth = match depth {
            Some(depth) if depth > 0 => depth,
            _ => {
                return Err(RuntimeError::new(
                    keyword,
                    "Cannot access undefined identifier 'super'.",
                )
                .into())
            }
        };

        if in_unbound {
            let superclass = self
                .environment
                .get_at(depth - 1, "super")
                .map_err(|message| RuntimeError::new(keyword, message))?;
            let superclass = match superclass {
                Value::Class(class) => class,
                _ => {
                    return Err(RuntimeError::new(keyword, "'super' is not a class").into());
                }
            };
            return match superclass.find_unbound(&member.lexeme) {
                Some(unbound) => Ok(Value::Function(unbound)),
                None => Err(RuntimeError::new(
                    member,
                    format!("Unbound function {} is not defined", member.lexeme),
                )
                .into()),
            };
        }

        let superclass = self
            .environment
            .get_at(depth, "super")
            .map_err(|message| RuntimeError::new(keyword, message))?;
        let superclass = match superclass {
            Value::Class(class) => class,
            _ => return Err(RuntimeError::new(keyword, "'super' is not a class").into()),
        };

        let this = self
            .environment
            .get_at(depth - 1, "this")
            .map_err(|message| RuntimeError::new(keyword, message))?;
        let instance = match this {
            Value::Instance(instance) => instance,
            _ => return Err(RuntimeError::new(keyword, "'this' is not an instance").into()),
        };

        if let Some(method) = superclass.find_method(&member.lexeme) {
            return Ok(Value::Function(Rc::new(method.bind(&instance))));
        }
        if let Some(unbound) = superclass.find_unbound(&member.lexeme) {
            return Ok(Value::Function(unbound));
        }
        if let Some(getter) = superclass.find_getter(&member.lexeme) {
            let _guard = self.enter_call(member)?;
            return Rc::new(getter.bind(&instance)).call(self, Vec::new());
        }

        Err(RuntimeError::new(
            member,
            format!("Property {} is not defined", member.lexeme),
        )
        .into())
    }

    fn unary_op(&self, op: &Token, value: Value) -> Result<Value, Halt> {
        match op.kind {
            TokenType::Minus => match value {
                Value::Number(value) => Ok(Value::Number(-value)),
                _ => Err(RuntimeError::new(op, "Operands must be numbers").into()),
            },
            TokenType::Bang => Ok(Value::Bool(!value.is_truthy())),
            _ => Err(RuntimeError::new(op, "Unknown token type in unary operator eval").into()),
        }
    }

    fn binary_op(&self, left: Value, op: &Token, right: Value) -> Result<Value, Halt> {
        match op.kind {
            TokenType::Minus => {
                let (left, right) = number_operands(op, &left, &right)?;
                Ok(Value::Number(left - right))
            }
            TokenType::Star => {
                let (left, right) = number_operands(op, &left, &right)?;
                Ok(Value::Number(left * right))
            }
            TokenType::Slash => {
                let (left, right) = number_operands(op, &left, &right)?;
                if right == 0.0 {
                    return Err(RuntimeError::new(
                        op,
                        "Right operand of division must not be 0",
                    )
                    .into());
                }
                Ok(Value::Number(left / right))
            }
            TokenType::Plus => match (&left, &right) {
                (Value::Number(left), Value::Number(right)) => Ok(Value::Number(left + right)),
                (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(Rc::from(
                    format!("{}{}", stringify(&left), stringify(&right)).as_str(),
                ))),
                _ => Err(RuntimeError::new(op, "Operands must all be numbers or strings").into()),
            },
            TokenType::Greater => comparison(op, &left, &right, |ordering| {
                ordering == std::cmp::Ordering::Greater
            }),
            TokenType::GreaterEqual => comparison(op, &left, &right, |ordering| {
                ordering != std::cmp::Ordering::Less
            }),
            TokenType::Less => comparison(op, &left, &right, |ordering| {
                ordering == std::cmp::Ordering::Less
            }),
            TokenType::LessEqual => comparison(op, &left, &right, |ordering| {
                ordering != std::cmp::Ordering::Greater
            }),
            TokenType::BangEqual => Ok(Value::Bool(left != right)),
            TokenType::EqualEqual => Ok(Value::Bool(left == right)),
            // The comma operator evaluates both sides and yields the right
            TokenType::Comma => Ok(right),
            _ => {
                Err(RuntimeError::new(op, "Unexpected operator in binary expression eval").into())
            }
        }
    }

    /// Every call dispatch takes a recursion slot; runaway user recursion
    /// surfaces as a runtime error instead of exhausting the native stack.
    fn enter_call(&self, at: &Token) -> Result<RecursionGuard, Halt> {
        let depth = self.recursion_depth.get() + 1;
        if depth > MAX_RECURSION_DEPTH {
            return Err(RuntimeError::new(
                at,
                format!("Maximum recursion depth of {} exceeded", MAX_RECURSION_DEPTH),
            )
            .into());
        }
        self.recursion_depth.set(depth);
        Ok(RecursionGuard {
            depth: Rc::clone(&self.recursion_depth),
        })
    }

    /// Dumps globals and the current frame; backs the `printEnv` built-in.
    pub fn print_environments(&self) {
        let out = self.out();
        let mut out = out.borrow_mut();
        writeln!(out, "Globals: \n{}", self.globals).ok();
        writeln!(out, "Locals: \n{}", self.environment).ok();
    }
}

/// Releases the recursion slot on drop, whatever the exit path was.
struct RecursionGuard {
    depth: Rc<Cell<usize>>,
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

fn number_operands(op: &Token, left: &Value, right: &Value) -> Result<(f64, f64), Halt> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => Ok((*left, *right)),
        _ => Err(RuntimeError::new(op, "Operands must be numbers").into()),
    }
}

/// Relational comparison: both numbers, or both strings compared bytewise.
fn comparison(
    op: &Token,
    left: &Value,
    right: &Value,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, Halt> {
    let ordering = match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.partial_cmp(right),
        (Value::String(left), Value::String(right)) => Some(left.as_bytes().cmp(right.as_bytes())),
        _ => {
            return Err(RuntimeError::new(op, "Operands must all be numbers or strings").into())
        }
    };
    match ordering {
        Some(ordering) => Ok(Value::Bool(accept(ordering))),
        None => Ok(Value::Bool(false)),
    }
}
