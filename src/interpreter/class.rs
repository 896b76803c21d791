use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

use super::error::Halt;
use super::evaluator::Interpreter;
use super::function::{Callable, Function};

pub type MemberMap = IndexMap<String, Rc<Function>>;

/// A runtime class: three member tables plus an optional superclass. Member
/// lookups walk the superclass chain, so a subclass member shadows a
/// same-named one above it.
pub struct Class {
    name: String,
    superclass: Option<Rc<Class>>,
    methods: MemberMap,
    unbounds: MemberMap,
    getters: MemberMap,
}

impl Class {
    pub fn new(
        name: String,
        superclass: Option<Rc<Class>>,
        methods: MemberMap,
        unbounds: MemberMap,
        getters: MemberMap,
    ) -> Self {
        Self {
            name,
            superclass,
            methods,
            unbounds,
            getters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        self.methods.get(name).cloned().or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_method(name))
        })
    }

    pub fn find_unbound(&self, name: &str) -> Option<Rc<Function>> {
        self.unbounds.get(name).cloned().or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_unbound(name))
        })
    }

    pub fn find_getter(&self, name: &str) -> Option<Rc<Function>> {
        self.getters.get(name).cloned().or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_getter(name))
        })
    }
}

impl Callable for Class {
    /// Calling a class forwards the arguments to `init`, so the class takes
    /// whatever arity the constructor has, or none.
    fn arity(&self) -> usize {
        self.find_method("init")
            .map(|constructor| constructor.arity())
            .unwrap_or(0)
    }

    fn call(
        self: Rc<Self>,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, Halt> {
        let instance = Rc::new(Instance::new(Rc::clone(&self)));

        if let Some(constructor) = self.find_method("init") {
            Rc::new(constructor.bind(&instance)).call(interpreter, arguments)?;
        }

        Ok(Value::Instance(instance))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

pub struct Instance {
    class: Rc<Class>,
    fields: RefCell<IndexMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(IndexMap::new()),
        }
    }

    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Fields are created on first write. A name served by a class getter is
    /// off limits: the field could never be read back.
    pub fn set_field(&self, name: &str, value: Value) -> Result<(), String> {
        if self.class.find_getter(name).is_some() {
            return Err(
                "A getter by this name exists. A property of the same name would be inaccessible"
                    .to_string(),
            );
        }
        self.fields.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.class.name)
    }
}
