use crate::value::Value;

/// Outcome of executing a statement. `Return` unwinds through enclosing
/// blocks (each restoring its environment on the way) until the active
/// function call catches it.
#[derive(Debug, Clone)]
pub enum ControlFlow {
    Normal,
    Return(Value),
}

/// Raised by the `exit()` built-in. Propagates through every layer and is
/// caught only by the driver, which terminates cleanly.
#[derive(Debug, Clone, Copy)]
pub struct Exit;
