//! Recursive-descent parser with statement-level error recovery.
//!
//! Parse errors are reported as they are found; the failing declaration
//! becomes a critical `Malformed` node and `synchronize` skips to the next
//! statement boundary so one typo yields one diagnostic, not a cascade.

use std::cell::Cell;
use std::rc::Rc;

use crate::ast::{Expr, FunctionDecl, FunctionKind, Stmt};
use crate::diagnostic::Reporter;
use crate::token::{Literal, Token, TokenType};

const MAX_PARAMETER_COUNT: usize = 255;

struct ParseError {
    message: String,
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    reporter: Rc<dyn Reporter>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, reporter: Rc<dyn Reporter>) -> Self {
        Self {
            tokens,
            current: 0,
            reporter,
        }
    }

    pub fn parse(mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.declaration());
        }
        statements
    }

    //------------------------- Declarations --------------------------------

    fn declaration(&mut self) -> Stmt {
        match self.try_declaration() {
            Ok(statement) => statement,
            Err(error) => {
                self.synchronize();
                Stmt::Malformed {
                    critical: true,
                    message: error.message,
                }
            }
        }
    }

    fn try_declaration(&mut self) -> ParseResult<Stmt> {
        if self.match_one(TokenType::Fun) {
            return Ok(Stmt::Function(
                self.function_declaration(FunctionKind::Function)?,
            ));
        }
        if self.match_one(TokenType::Var) {
            return self.var_declaration();
        }
        if self.match_one(TokenType::Class) {
            return self.class_declaration();
        }
        self.statement()
    }

    fn var_declaration(&mut self) -> ParseResult<Stmt> {
        let name = self.consume(TokenType::Identifier, "Expect variable identifier")?;

        let initializer = if self.match_one(TokenType::Equal) {
            self.expression()?
        } else {
            Expr::Empty
        };
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration")?;

        Ok(Stmt::Var { name, initializer })
    }

    fn function_declaration(&mut self, kind: FunctionKind) -> ParseResult<Rc<FunctionDecl>> {
        let name = self.consume(
            TokenType::Identifier,
            &format!("Expected valid identifier as {} name.", kind),
        )?;

        // A member without a parameter list is a getter
        if !self.match_one(TokenType::LeftParen) {
            return self.getter_declaration(name);
        }

        let params = if self.check(TokenType::RightParen) {
            Vec::new()
        } else {
            self.parameters()?
        };

        self.consume(TokenType::RightParen, "Expect ')' after parameter list.")?;
        self.consume(
            TokenType::LeftBrace,
            &format!("Expect '{{' before {} body.", kind),
        )?;

        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body: self.block()?,
            kind: Cell::new(kind),
        }))
    }

    fn getter_declaration(&mut self, name: Token) -> ParseResult<Rc<FunctionDecl>> {
        self.consume(TokenType::LeftBrace, "Expect '{' after getter identifier")?;

        Ok(Rc::new(FunctionDecl {
            name,
            params: Vec::new(),
            body: self.block()?,
            kind: Cell::new(FunctionKind::Getter),
        }))
    }

    fn class_declaration(&mut self) -> ParseResult<Stmt> {
        let name = self.consume(TokenType::Identifier, "Expect class name after 'class' keyword")?;

        let superclass = if self.match_one(TokenType::Less) {
            let superclass_name = self.consume(TokenType::Identifier, "Expect superclass name")?;
            Some(Expr::Variable {
                name: superclass_name,
                depth: Cell::new(None),
            })
        } else {
            None
        };

        self.consume(TokenType::LeftBrace, "Expect '{' after class identifier")?;

        let mut members = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            let kind = if self.match_one(TokenType::Unbound) {
                FunctionKind::Unbound
            } else {
                FunctionKind::Method
            };
            members.push(self.function_declaration(kind)?);
        }

        self.consume(TokenType::RightBrace, "Expect '}' after class body")?;

        Ok(Stmt::Class {
            name,
            members,
            superclass,
        })
    }

    fn parameters(&mut self) -> ParseResult<Vec<Token>> {
        let mut params = Vec::new();
        loop {
            if params.len() > MAX_PARAMETER_COUNT {
                let token = self.peek().clone();
                return Err(self.error(&token, "Cannot define more than 255 parameters."));
            }
            params.push(self.consume(TokenType::Identifier, "Expect parameter name.")?);
            if !self.match_one(TokenType::Comma) {
                break;
            }
        }
        Ok(params)
    }

    //------------------------- Statements ----------------------------------

    fn statement(&mut self) -> ParseResult<Stmt> {
        if self.match_one(TokenType::If) {
            return self.if_statement();
        }
        if self.match_one(TokenType::For) {
            return self.for_statement();
        }
        if self.match_one(TokenType::While) {
            return self.while_statement();
        }
        if self.match_one(TokenType::LeftBrace) {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.match_one(TokenType::Print) {
            return self.print_statement();
        }
        if self.match_one(TokenType::Return) {
            return self.return_statement();
        }
        self.expression_statement()
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            statements.push(self.declaration());
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(
            TokenType::RightParen,
            "Expect ')' after condition of if statement.",
        )?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_one(TokenType::Else) {
            Box::new(self.statement()?)
        } else {
            Box::new(Stmt::Empty)
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after while condition")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    /// `for` is sugar: the init moves into an outer block, the increment is
    /// appended to the body, and what remains is a while loop.
    fn for_statement(&mut self) -> ParseResult<Stmt> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.match_one(TokenType::Semicolon) {
            None
        } else if self.match_one(TokenType::Var) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition")?;

        let increment = if self.check(TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::RightParen, "Expect ')' after for loop clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expr(increment)]);
        }

        let condition = condition.unwrap_or(Expr::Literal(Literal::Bool(true)));
        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block(vec![initializer, body]);
        }

        Ok(body)
    }

    fn print_statement(&mut self) -> ParseResult<Stmt> {
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after statement")?;
        Ok(Stmt::Print(value))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.previous().clone();

        let value = if self.check(TokenType::Semicolon) {
            Expr::Empty
        } else {
            self.expression()?
        };
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after 'return' statement's expression",
        )?;

        Ok(Stmt::Return { keyword, value })
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression")?;
        Ok(Stmt::Expr(value))
    }

    //------------------------- Expressions ---------------------------------

    /// Shared shape of the left-associative binary levels. When the current
    /// token is one of `forbidden_unaries` the operator was used as a prefix;
    /// the right operand is parsed and discarded so scanning stays in sync,
    /// and a critical `Malformed` node takes the expression's place.
    fn binary_production(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<Expr>,
        operators: &[TokenType],
        forbidden_unaries: &[TokenType],
        logical: bool,
    ) -> ParseResult<Expr> {
        if self.match_any(forbidden_unaries) {
            let op = self.previous().clone();
            operand(self)?;
            let message = format!("Illegal use of unary operator {}", op.lexeme);
            self.reporter.error_at(&op, &message);
            return Ok(Expr::Malformed {
                critical: true,
                message,
            });
        }

        let mut result = operand(self)?;
        while self.match_any(operators) {
            let op = self.previous().clone();
            let right = operand(self)?;
            result = if logical {
                Expr::Logical {
                    left: Box::new(result),
                    op,
                    right: Box::new(right),
                }
            } else {
                Expr::Binary {
                    left: Box::new(result),
                    op,
                    right: Box::new(right),
                }
            };
        }
        Ok(result)
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.binary_production(
            Self::comma_operand,
            &[TokenType::Comma],
            &[TokenType::Comma],
            false,
        )
    }

    fn comma_operand(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let target = self.ternary()?;

        if self.match_one(TokenType::Equal) {
            let equal = self.previous().clone();
            let value = Box::new(self.assignment()?);

            return Ok(match target {
                Expr::Variable { name, .. } => Expr::Assign {
                    name,
                    value,
                    depth: Cell::new(None),
                },
                Expr::Get { object, name } => Expr::Set {
                    object,
                    name,
                    value,
                },
                other => {
                    // Reported but not thrown; parsing continues in place
                    self.reporter.error_at(&equal, "Invalid assignment target");
                    other
                }
            });
        }

        Ok(target)
    }

    fn ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.or_expression()?;

        if self.match_one(TokenType::QuestionMark) {
            let question = self.previous().clone();
            let then_branch = self.expression()?;
            let colon = self.consume(
                TokenType::Colon,
                "Expected ':' after '?' for ternary conditional operator",
            )?;
            let else_branch = self.expression()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                question,
                then_branch: Box::new(then_branch),
                colon,
                else_branch: Box::new(else_branch),
            });
        }

        Ok(condition)
    }

    fn or_expression(&mut self) -> ParseResult<Expr> {
        self.binary_production(Self::and_expression, &[TokenType::Or], &[TokenType::Or], true)
    }

    fn and_expression(&mut self) -> ParseResult<Expr> {
        self.binary_production(Self::equality, &[TokenType::And], &[TokenType::And], true)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_production(
            Self::comparison,
            &[TokenType::BangEqual, TokenType::EqualEqual],
            &[TokenType::BangEqual, TokenType::EqualEqual],
            false,
        )
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary_production(
            Self::addition,
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            false,
        )
    }

    fn addition(&mut self) -> ParseResult<Expr> {
        // '-' is a legal prefix, so only '+' is forbidden as a unary here
        self.binary_production(
            Self::multiplication,
            &[TokenType::Minus, TokenType::Plus],
            &[TokenType::Plus],
            false,
        )
    }

    fn multiplication(&mut self) -> ParseResult<Expr> {
        self.binary_production(
            Self::unary,
            &[TokenType::Star, TokenType::Slash],
            &[TokenType::Star, TokenType::Slash],
            false,
        )
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if self.match_any(&[TokenType::Bang, TokenType::Minus]) {
            let op = self.previous().clone();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.call()
    }

    fn call(&mut self) -> ParseResult<Expr> {
        let mut result = self.primary()?;

        loop {
            if self.match_one(TokenType::LeftParen) {
                result = self.finish_call(result)?;
            } else if self.match_one(TokenType::Dot) {
                let name = self.consume(TokenType::Identifier, "Expect property name after '.'")?;
                result = Expr::Get {
                    object: Box::new(result),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(result)
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let mut arguments = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_PARAMETER_COUNT {
                    let token = self.peek().clone();
                    return Err(
                        self.error(&token, "Cannot have more than 255 function arguments")
                    );
                }
                // Arguments sit below the comma operator, so `f(a, b)` is two
                // arguments rather than one comma expression
                arguments.push(self.comma_operand()?);
                if !self.match_one(TokenType::Comma) {
                    break;
                }
            }
        }

        let paren = self.consume(TokenType::RightParen, "Expect ')' after arguments")?;

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        if self.match_one(TokenType::False) {
            return Ok(Expr::Literal(Literal::Bool(false)));
        }
        if self.match_one(TokenType::True) {
            return Ok(Expr::Literal(Literal::Bool(true)));
        }
        if self.match_one(TokenType::Nil) {
            return Ok(Expr::Literal(Literal::Nil));
        }

        if self.match_any(&[TokenType::Number, TokenType::String]) {
            let literal = self.previous().literal.clone().unwrap_or(Literal::Nil);
            return Ok(Expr::Literal(literal));
        }

        if self.match_one(TokenType::This) {
            return Ok(Expr::This {
                keyword: self.previous().clone(),
                depth: Cell::new(None),
            });
        }

        if self.match_one(TokenType::Identifier) {
            return Ok(Expr::Variable {
                name: self.previous().clone(),
                depth: Cell::new(None),
            });
        }

        if self.match_one(TokenType::LeftParen) {
            let middle = self.expression()?;
            self.consume(TokenType::RightParen, "Expected ')' after expression")?;
            return Ok(Expr::Grouping(Box::new(middle)));
        }

        if self.match_one(TokenType::Super) {
            let keyword = self.previous().clone();
            self.consume(TokenType::Dot, "Expect '.' after super")?;
            let member =
                self.consume(TokenType::Identifier, "Expect identifier for super access")?;
            return Ok(Expr::Super {
                keyword,
                member,
                in_unbound: Cell::new(false),
                depth: Cell::new(None),
            });
        }

        if self.match_one(TokenType::Pipe) {
            return self.lambda();
        }

        let token = self.peek().clone();
        Err(self.error(&token, "Expect expression."))
    }

    fn lambda(&mut self) -> ParseResult<Expr> {
        let opening = self.previous().clone();

        let params = if self.check(TokenType::Pipe) {
            Vec::new()
        } else {
            self.parameters()?
        };
        self.consume(TokenType::Pipe, "Expect '|' to finish lambda parameter list")?;

        let body = if self.match_one(TokenType::LeftBrace) {
            self.block()?
        } else {
            // `|x| expr` is sugar for `|x| { return expr; }`
            let keyword = self.previous().clone();
            let value = self.expression()?;
            vec![Stmt::Return { keyword, value }]
        };

        let name = Token::new(TokenType::Identifier, "lambda", None, opening.line);
        Ok(Expr::Lambda(Rc::new(FunctionDecl {
            name,
            params,
            body,
            kind: Cell::new(FunctionKind::Lambda),
        })))
    }

    //------------------------- Primitives ----------------------------------

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn check(&self, kind: TokenType) -> bool {
        !self.is_at_end() && self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn match_one(&mut self, kind: TokenType) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn match_any(&mut self, kinds: &[TokenType]) -> bool {
        kinds.iter().any(|kind| self.match_one(*kind))
    }

    fn consume(&mut self, kind: TokenType, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            return Ok(self.advance().clone());
        }
        let token = self.peek().clone();
        Err(self.error(&token, message))
    }

    fn error(&self, token: &Token, message: &str) -> ParseError {
        self.reporter.error_at(token, message);
        ParseError {
            message: message.to_string(),
        }
    }

    /// Skip to the next likely statement boundary: just past a `;`, or right
    /// before a keyword that starts a statement.
    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() && self.previous().kind != TokenType::Semicolon {
            match self.peek().kind {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}
