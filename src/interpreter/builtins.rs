//! Native functions bound into the global environment at interpreter
//! construction.

use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, LevelFilter};

use crate::token::Token;
use crate::value::Value;

use super::environment::Environment;
use super::error::{Halt, RuntimeError};
use super::evaluator::{run_source, Interpreter};
use super::function::NativeFunction;

pub fn install(globals: &Environment) {
    for native in [
        NativeFunction::new("clock", 0, native_clock),
        NativeFunction::new("printEnv", 0, native_print_env),
        NativeFunction::new("exit", 0, native_exit),
        NativeFunction::new("setLogLevel", 1, native_set_log_level),
        NativeFunction::new("assert", 2, native_assert),
        NativeFunction::new("includeStr", 1, native_include_str),
        NativeFunction::new("eval", 1, native_eval),
    ] {
        globals.redefine(native.name, Value::Native(Rc::new(native)));
    }
}

fn native_clock(_interpreter: &mut Interpreter, _arguments: Vec<Value>) -> Result<Value, Halt> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as f64)
        .unwrap_or(0.0);
    Ok(Value::Number(seconds))
}

fn native_print_env(interpreter: &mut Interpreter, _arguments: Vec<Value>) -> Result<Value, Halt> {
    interpreter.print_environments();
    Ok(Value::Nil)
}

fn native_exit(_interpreter: &mut Interpreter, _arguments: Vec<Value>) -> Result<Value, Halt> {
    Err(Halt::Exit)
}

fn native_set_log_level(
    _interpreter: &mut Interpreter,
    arguments: Vec<Value>,
) -> Result<Value, Halt> {
    let level = match &arguments[0] {
        Value::String(name) => match name.as_ref() {
            "error" => Some(LevelFilter::Error),
            "warning" => Some(LevelFilter::Warn),
            "info" => Some(LevelFilter::Info),
            "debug" => Some(LevelFilter::Debug),
            _ => None,
        },
        _ => None,
    };

    match level {
        Some(level) => {
            log::set_max_level(level);
            Ok(Value::Nil)
        }
        None => Err(RuntimeError::new(
            &Token::native("setLogLevel"),
            "Must be called with one of: ['error', 'warning', 'info', 'debug']",
        )
        .into()),
    }
}

fn native_assert(_interpreter: &mut Interpreter, arguments: Vec<Value>) -> Result<Value, Halt> {
    let condition = match &arguments[0] {
        Value::Bool(condition) => *condition,
        _ => {
            return Err(RuntimeError::new(
                &Token::native("assert"),
                "must be a boolean expression that is asserted",
            )
            .into())
        }
    };
    let message = match &arguments[1] {
        Value::String(message) => Rc::clone(message),
        _ => {
            return Err(RuntimeError::new(
                &Token::native("assert"),
                "must be a string that specifies what went wrong",
            )
            .into())
        }
    };

    if !condition {
        return Err(RuntimeError::new(&Token::native("assert"), message.as_ref()).into());
    }
    Ok(Value::Nil)
}

/// Reads a file relative to the initial script's directory and returns its
/// contents; the textual cousin of a module system.
fn native_include_str(
    interpreter: &mut Interpreter,
    arguments: Vec<Value>,
) -> Result<Value, Halt> {
    let path = match &arguments[0] {
        Value::String(path) => Rc::clone(path),
        _ => {
            return Err(RuntimeError::new(
                &Token::native("includeStr"),
                "must be a string that specifies the name of the file to include",
            )
            .into())
        }
    };

    let file = interpreter.base_dir().join(path.as_ref());
    debug!("reading file for includeStr(): {}", file.display());

    match std::fs::read_to_string(&file) {
        Ok(contents) => Ok(Value::String(Rc::from(contents.as_str()))),
        Err(_) => Err(RuntimeError::new(
            &Token::native("includeStr"),
            "There was an error reading the file for includeStr()",
        )
        .into()),
    }
}

/// Runs its argument through the full pipeline against the live interpreter.
/// Errors in any phase are reported through the usual reporter and nil comes
/// back; otherwise the last evaluated value does.
fn native_eval(interpreter: &mut Interpreter, arguments: Vec<Value>) -> Result<Value, Halt> {
    let source = match &arguments[0] {
        Value::String(source) => Rc::clone(source),
        _ => {
            return Err(RuntimeError::new(
                &Token::native("eval"),
                "eval()'s first argument must be a string containing the source code",
            )
            .into())
        }
    };

    if run_source(&source, interpreter).is_err() {
        return Err(Halt::Exit);
    }

    if interpreter.reporter().had_error() {
        return Ok(Value::Nil);
    }
    Ok(interpreter.last_value())
}
