use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// One scope frame: a name→value map plus a link to the enclosing frame.
/// Frames are shared (`Rc`) between the interpreter and every closure that
/// captured them; mutation through one handle is visible to all.
#[derive(Default)]
pub struct Environment {
    values: RefCell<IndexMap<String, Value>>,
    enclosing: Option<Rc<Environment>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enclosing(enclosing: Rc<Environment>) -> Self {
        Self {
            values: RefCell::new(IndexMap::new()),
            enclosing: Some(enclosing),
        }
    }

    /// A fresh frame holding a single binding, used for bound methods
    /// (`this`) and class declarations with a superclass (`super`).
    pub fn with_binding(enclosing: Rc<Environment>, name: &str, value: Value) -> Self {
        let environment = Self::with_enclosing(enclosing);
        environment.values.borrow_mut().insert(name.to_string(), value);
        environment
    }

    pub fn define(&self, name: &str, value: Value) -> Result<(), String> {
        let mut values = self.values.borrow_mut();
        if values.contains_key(name) {
            return Err(format!(
                "Identifier '{}' is already defined in this scope.",
                name
            ));
        }
        values.insert(name.to_string(), value);
        Ok(())
    }

    /// Inserts or replaces without the duplicate check. Declaration
    /// statements executing in the global frame use this, keeping the REPL
    /// usable across lines; built-ins are installed through it as well.
    pub fn redefine(&self, name: &str, value: Value) {
        self.values.borrow_mut().insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Result<Value, String> {
        if let Some(value) = self.values.borrow().get(name) {
            return Ok(value.clone());
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.get(name),
            None => Err(format!("Cannot access undefined identifier '{}'.", name)),
        }
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), String> {
        {
            let mut values = self.values.borrow_mut();
            if let Some(slot) = values.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.assign(name, value),
            None => Err(format!("Cannot assign to undefined identifier '{}'.", name)),
        }
    }

    /// Reads from the frame exactly `depth` links up the chain. Presence of
    /// both the frame and the name is the resolver's guarantee.
    pub fn get_at(&self, depth: usize, name: &str) -> Result<Value, String> {
        if depth == 0 {
            return self
                .values
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| format!("Cannot access undefined identifier '{}'.", name));
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.get_at(depth - 1, name),
            None => Err(format!("Cannot access undefined identifier '{}'.", name)),
        }
    }

    pub fn assign_at(&self, depth: usize, name: &str, value: Value) -> Result<(), String> {
        if depth == 0 {
            let mut values = self.values.borrow_mut();
            return match values.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(format!("Cannot assign to undefined identifier '{}'.", name)),
            };
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.assign_at(depth - 1, name, value),
            None => Err(format!("Cannot assign to undefined identifier '{}'.", name)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (name, value) in self.values.borrow().iter() {
            write!(f, "{}: {}, ", name, value)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let environment = Environment::new();
        environment.define("x", Value::Number(42.0)).unwrap();
        assert_eq!(environment.get("x"), Ok(Value::Number(42.0)));
    }

    #[test]
    fn test_define_rejects_duplicates_in_frame() {
        let environment = Environment::new();
        environment.define("x", Value::Number(1.0)).unwrap();
        assert!(environment.define("x", Value::Number(2.0)).is_err());
        assert_eq!(environment.get("x"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn test_redefine_replaces() {
        let environment = Environment::new();
        environment.redefine("x", Value::Number(1.0));
        environment.redefine("x", Value::Number(2.0));
        assert_eq!(environment.get("x"), Ok(Value::Number(2.0)));
    }

    #[test]
    fn test_get_walks_enclosing_chain() {
        let outer = Rc::new(Environment::new());
        outer.define("x", Value::Number(1.0)).unwrap();
        let inner = Environment::with_enclosing(Rc::clone(&outer));
        assert_eq!(inner.get("x"), Ok(Value::Number(1.0)));
        assert!(inner.get("missing").is_err());
    }

    #[test]
    fn test_shadowing_resolves_to_innermost() {
        let outer = Rc::new(Environment::new());
        outer.define("x", Value::Number(1.0)).unwrap();
        let inner = Environment::with_enclosing(Rc::clone(&outer));
        inner.define("x", Value::Number(2.0)).unwrap();
        assert_eq!(inner.get("x"), Ok(Value::Number(2.0)));
        assert_eq!(outer.get("x"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn test_assign_writes_through_to_defining_frame() {
        let outer = Rc::new(Environment::new());
        outer.define("x", Value::Number(1.0)).unwrap();
        let inner = Environment::with_enclosing(Rc::clone(&outer));
        inner.assign("x", Value::Number(5.0)).unwrap();
        assert_eq!(outer.get("x"), Ok(Value::Number(5.0)));
    }

    #[test]
    fn test_assign_to_undefined_errors() {
        let environment = Environment::new();
        assert!(environment.assign("ghost", Value::Nil).is_err());
    }

    #[test]
    fn test_get_at_walks_exact_depth() {
        let global = Rc::new(Environment::new());
        global.define("x", Value::Number(0.0)).unwrap();
        let middle = Rc::new(Environment::with_enclosing(Rc::clone(&global)));
        middle.define("x", Value::Number(1.0)).unwrap();
        let inner = Environment::with_enclosing(Rc::clone(&middle));

        assert_eq!(inner.get_at(1, "x"), Ok(Value::Number(1.0)));
        assert_eq!(inner.get_at(2, "x"), Ok(Value::Number(0.0)));
        assert!(inner.get_at(0, "x").is_err());
    }

    #[test]
    fn test_assign_at_targets_exact_frame() {
        let global = Rc::new(Environment::new());
        global.define("x", Value::Number(0.0)).unwrap();
        let inner = Environment::with_enclosing(Rc::clone(&global));
        inner.assign_at(1, "x", Value::Number(9.0)).unwrap();
        assert_eq!(global.get("x"), Ok(Value::Number(9.0)));
    }

    #[test]
    fn test_with_binding_seeds_one_name() {
        let global = Rc::new(Environment::new());
        let bound = Environment::with_binding(global, "this", Value::Nil);
        assert_eq!(bound.get_at(0, "this"), Ok(Value::Nil));
    }

    #[test]
    fn test_display_lists_bindings_in_insertion_order() {
        let environment = Environment::new();
        environment.define("a", Value::Number(1.0)).unwrap();
        environment.define("b", Value::Bool(true)).unwrap();
        assert_eq!(environment.to_string(), "{a: 1, b: true, }");
    }
}
