//! Static resolution pass: walks the AST between parsing and interpretation,
//! annotating every variable reference with the number of scopes between its
//! use and its declaration, and enforcing the language's static rules.
//!
//! Errors are reported through the reporter and resolution continues with the
//! next statement; the driver refuses to interpret a program that produced
//! any resolution error.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::ast::{Expr, FunctionDecl, FunctionKind, Stmt};
use crate::diagnostic::Reporter;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassContext {
    None,
    Class,
    Subclass,
}

struct CompileError {
    token: Token,
    message: String,
}

impl CompileError {
    fn new(token: &Token, message: impl Into<String>) -> Self {
        Self {
            token: token.clone(),
            message: message.into(),
        }
    }
}

type ResolveResult = Result<(), CompileError>;

pub struct Resolver {
    reporter: Rc<dyn Reporter>,
    /// Innermost scope last. `false` marks a name that is declared but still
    /// resolving its initializer. Globals are not tracked.
    scopes: Vec<HashMap<String, bool>>,
    current_function: Option<FunctionKind>,
    current_class: ClassContext,
    /// Set when entering a getter, cleared by any non-empty `return` inside
    /// it; still set on exit means the getter never produces a value.
    getter_needs_return: bool,
}

impl Resolver {
    pub fn new(reporter: Rc<dyn Reporter>) -> Self {
        Self {
            reporter,
            scopes: Vec::new(),
            current_function: None,
            current_class: ClassContext::None,
            getter_needs_return: false,
        }
    }

    pub fn resolve(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_stmt(statement);
        }
    }

    /// Statement-level recovery point: an error unwinds to here, gets
    /// reported, and the walk moves on to the next statement.
    fn resolve_stmt(&mut self, statement: &Stmt) {
        if let Err(error) = self.try_stmt(statement) {
            self.reporter.error_at(&error.token, &error.message);
        }
    }

    fn try_stmt(&mut self, statement: &Stmt) -> ResolveResult {
        match statement {
            Stmt::Print(value) => self.resolve_expr(value),
            Stmt::Expr(value) => self.resolve_expr(value),
            Stmt::Var { name, initializer } => {
                self.declare(name)?;
                self.resolve_expr(initializer)?;
                self.define(&name.lexeme);
                Ok(())
            }
            Stmt::Block(statements) => {
                self.begin_scope();
                for statement in statements {
                    self.resolve_stmt(statement);
                }
                self.end_scope();
                Ok(())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition)?;
                // Unlike execution, resolution always walks both branches
                self.resolve_stmt(then_branch);
                self.resolve_stmt(else_branch);
                Ok(())
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(body);
                Ok(())
            }
            Stmt::Empty | Stmt::Malformed { .. } => Ok(()),
            Stmt::Function(declaration) => {
                // Name is defined eagerly so the body can recurse into it
                self.declare(&declaration.name)?;
                self.define(&declaration.name.lexeme);
                self.resolve_function(declaration);
                Ok(())
            }
            Stmt::Return { keyword, value } => {
                match self.current_function {
                    None => {
                        return Err(CompileError::new(keyword, "Cannot return from top-level code"))
                    }
                    Some(FunctionKind::Constructor) if !matches!(value, Expr::Empty) => {
                        return Err(CompileError::new(
                            keyword,
                            "Cannot return a value from a constructor",
                        ))
                    }
                    _ => {}
                }
                if !matches!(value, Expr::Empty) {
                    self.getter_needs_return = false;
                }
                self.resolve_expr(value)
            }
            Stmt::Class {
                name,
                members,
                superclass,
            } => {
                let enclosing_class = self.current_class;
                let result = self.resolve_class(name, members, superclass.as_ref());
                self.current_class = enclosing_class;
                result
            }
        }
    }

    fn resolve_class(
        &mut self,
        name: &Token,
        members: &[Rc<FunctionDecl>],
        superclass: Option<&Expr>,
    ) -> ResolveResult {
        self.declare(name)?;
        self.define(&name.lexeme);

        self.current_class = if superclass.is_some() {
            ClassContext::Subclass
        } else {
            ClassContext::Class
        };

        if let Some(superclass) = superclass {
            if let Expr::Variable {
                name: superclass_name,
                ..
            } = superclass
            {
                if superclass_name.lexeme == name.lexeme {
                    return Err(CompileError::new(
                        superclass_name,
                        "A class cannot inherit from itself",
                    ));
                }
            }
            self.resolve_expr(superclass)?;
            // Members of a subclass resolve `super` one scope outside `this`
            self.begin_scope();
            self.define("super");
        }

        self.begin_scope();
        self.define("this");

        for member in members {
            if member.kind.get() == FunctionKind::Method && member.name.lexeme == "init" {
                member.kind.set(FunctionKind::Constructor);
            }
            self.resolve_function(member);
        }

        self.end_scope();
        if superclass.is_some() {
            self.end_scope();
        }

        Ok(())
    }

    /// Resolves a function body under two fresh scopes: one where the
    /// parameters live and an inner one for the body block, mirroring the
    /// frame pair the interpreter creates per call.
    fn resolve_function(&mut self, declaration: &FunctionDecl) {
        let kind = declaration.kind.get();
        let enclosing_function = self.current_function;
        let enclosing_getter_flag = self.getter_needs_return;
        self.current_function = Some(kind);
        self.getter_needs_return = kind == FunctionKind::Getter;

        debug!(
            "resolving {} '{}'",
            kind, declaration.name.lexeme
        );

        self.begin_scope();
        for param in &declaration.params {
            if let Err(error) = self.declare(param) {
                self.reporter.error_at(&error.token, &error.message);
            }
            self.define(&param.lexeme);
        }

        self.begin_scope();
        for statement in &declaration.body {
            self.resolve_stmt(statement);
        }
        self.end_scope();
        self.end_scope();

        if self.getter_needs_return {
            self.reporter.warn_at(
                &declaration.name,
                "Getter does not return a value on any path",
            );
        }

        self.getter_needs_return = enclosing_getter_flag;
        self.current_function = enclosing_function;
    }

    fn resolve_expr(&mut self, expression: &Expr) -> ResolveResult {
        match expression {
            Expr::Literal(_) | Expr::Empty | Expr::Malformed { .. } => Ok(()),
            Expr::Grouping(inner) => self.resolve_expr(inner),
            Expr::Unary { operand, .. } => self.resolve_expr(operand),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(condition)?;
                self.resolve_expr(then_branch)?;
                self.resolve_expr(else_branch)
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee)?;
                for argument in arguments {
                    self.resolve_expr(argument)?;
                }
                Ok(())
            }
            Expr::Variable { name, depth } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(&name.lexeme) == Some(&false) {
                        return Err(CompileError::new(
                            name,
                            "Cannot read local variable in its own initializer",
                        ));
                    }
                }
                self.resolve_local(depth, name);
                Ok(())
            }
            Expr::Assign { name, value, depth } => {
                self.resolve_expr(value)?;
                self.resolve_local(depth, name);
                Ok(())
            }
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expr(object)?;
                // The property name is looked up dynamically; only the object
                // and the value are variables here
                self.resolve_expr(value)
            }
            Expr::This { keyword, depth } => {
                if self.current_class == ClassContext::None {
                    return Err(CompileError::new(keyword, "Cannot use 'this' outside of a class"));
                }
                if self.current_function == Some(FunctionKind::Unbound) {
                    return Err(CompileError::new(
                        keyword,
                        "Cannot use 'this' in an unbound function",
                    ));
                }
                self.resolve_local(depth, keyword);
                Ok(())
            }
            Expr::Super {
                keyword,
                in_unbound,
                depth,
                ..
            } => match self.current_class {
                ClassContext::None => {
                    Err(CompileError::new(keyword, "Cannot use 'super' outside of a class"))
                }
                ClassContext::Class => Err(CompileError::new(
                    keyword,
                    "Cannot use 'super' in a class with no superclass",
                )),
                ClassContext::Subclass => {
                    in_unbound.set(self.current_function == Some(FunctionKind::Unbound));
                    self.resolve_local(depth, keyword);
                    Ok(())
                }
            },
            Expr::Lambda(declaration) => {
                self.resolve_function(declaration);
                Ok(())
            }
        }
    }

    /// Finds the innermost scope declaring the name and stores the distance
    /// from the use site into the node. No match means the name is global
    /// (or undefined, which only the runtime can tell).
    fn resolve_local(&self, depth: &Cell<Option<usize>>, name: &Token) {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            if scope.contains_key(&name.lexeme) {
                let distance = self.scopes.len() - 1 - index;
                debug!("resolved '{}' at depth {}", name.lexeme, distance);
                depth.set(Some(distance));
                return;
            }
        }
    }

    fn declare(&mut self, name: &Token) -> ResolveResult {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.insert(name.lexeme.clone(), false).is_some() {
                return Err(CompileError::new(
                    name,
                    "Variable with this name is already declared in this scope",
                ));
            }
        }
        Ok(())
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }
}
