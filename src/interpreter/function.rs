use std::fmt;
use std::rc::Rc;

use crate::ast::{FunctionDecl, FunctionKind};
use crate::value::Value;

use super::class::Instance;
use super::control_flow::ControlFlow;
use super::environment::Environment;
use super::error::{Halt, RuntimeError};
use super::evaluator::Interpreter;

/// Anything that can sit on the left of a call expression: user functions,
/// classes, and native built-ins.
pub trait Callable {
    fn arity(&self) -> usize;

    fn call(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, Halt>;
}

/// A user function: a shared declaration plus the environment captured where
/// it was declared. Binding a method produces a new `Function` whose closure
/// is a one-entry `this` frame over the original.
pub struct Function {
    declaration: Rc<FunctionDecl>,
    closure: Rc<Environment>,
}

impl Function {
    pub fn new(declaration: Rc<FunctionDecl>, closure: Rc<Environment>) -> Self {
        Self {
            declaration,
            closure,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name.lexeme
    }

    pub fn kind(&self) -> FunctionKind {
        self.declaration.kind.get()
    }

    pub fn bind(&self, instance: &Rc<Instance>) -> Function {
        let frame = Environment::with_binding(
            Rc::clone(&self.closure),
            "this",
            Value::Instance(Rc::clone(instance)),
        );
        Function {
            declaration: Rc::clone(&self.declaration),
            closure: Rc::new(frame),
        }
    }
}

impl Callable for Function {
    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    fn call(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, Halt> {
        // Parameters get their own frame over the closure; the body then runs
        // in a block frame over that, mirroring the resolver's two scopes.
        let frame = Environment::with_enclosing(Rc::clone(&self.closure));
        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            frame
                .define(&param.lexeme, argument)
                .map_err(|message| RuntimeError::new(param, message))?;
        }

        let flow = interpreter.execute_block(&self.declaration.body, Rc::new(frame))?;

        if self.kind() == FunctionKind::Constructor {
            // A constructor yields its instance no matter how the body ended;
            // `this` lives in the binding frame the method was bound with.
            return self
                .closure
                .get_at(0, "this")
                .map_err(|message| RuntimeError::new(&self.declaration.name, message).into());
        }

        match flow {
            ControlFlow::Return(value) => Ok(value),
            ControlFlow::Normal => Ok(Value::Nil),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name())
    }
}

pub type NativeFn = fn(&mut Interpreter, Vec<Value>) -> Result<Value, Halt>;

#[derive(Debug)]
pub struct NativeFunction {
    pub name: &'static str,
    arity: usize,
    function: NativeFn,
}

impl NativeFunction {
    pub fn new(name: &'static str, arity: usize, function: NativeFn) -> Self {
        Self {
            name,
            arity,
            function,
        }
    }
}

impl Callable for NativeFunction {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, Halt> {
        (self.function)(interpreter, arguments)
    }
}
