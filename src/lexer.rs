//! Single-pass scanner turning a source string into a token sequence.
//!
//! The scanner walks bytes: every structural character of the language is
//! ASCII, so multi-byte UTF-8 sequences can only appear inside string
//! literals (kept verbatim) or as unrecognized input. Runs of unrecognized
//! bytes are coalesced into a single diagnostic instead of one error per
//! byte.

use std::rc::Rc;

use log::debug;

use crate::diagnostic::Reporter;
use crate::token::{self, Literal, Token, TokenType};

pub struct Lexer<'src> {
    source: &'src str,
    reporter: Rc<dyn Reporter>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    error_run: Vec<u8>,
    error_run_start_line: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, reporter: Rc<dyn Reporter>) -> Self {
        Self {
            source,
            reporter,
            tokens: Vec::with_capacity(source.len() / 3),
            start: 0,
            current: 0,
            line: 1,
            error_run: Vec::new(),
            error_run_start_line: 1,
        }
    }

    pub fn lex(mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }
        self.flush_error_run();
        self.tokens
            .push(Token::new(TokenType::Eof, "", None, self.line));

        if log::log_enabled!(log::Level::Debug) {
            for token in &self.tokens {
                debug!("lexed {}", token);
            }
        }

        self.tokens
    }

    fn scan_token(&mut self) {
        let byte = self.advance();
        match byte {
            b'(' => self.add_token(TokenType::LeftParen),
            b')' => self.add_token(TokenType::RightParen),
            b'{' => self.add_token(TokenType::LeftBrace),
            b'}' => self.add_token(TokenType::RightBrace),
            b'|' => self.add_token(TokenType::Pipe),
            b',' => self.add_token(TokenType::Comma),
            b'.' => self.add_token(TokenType::Dot),
            b'-' => self.add_token(TokenType::Minus),
            b'+' => self.add_token(TokenType::Plus),
            b';' => self.add_token(TokenType::Semicolon),
            b'*' => self.add_token(TokenType::Star),
            b'?' => self.add_token(TokenType::QuestionMark),
            b':' => self.add_token(TokenType::Colon),
            b'!' => {
                let kind = if self.expect(b'=') {
                    TokenType::BangEqual
                } else {
                    TokenType::Bang
                };
                self.add_token(kind);
            }
            b'=' => {
                let kind = if self.expect(b'=') {
                    TokenType::EqualEqual
                } else {
                    TokenType::Equal
                };
                self.add_token(kind);
            }
            b'<' => {
                let kind = if self.expect(b'=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.add_token(kind);
            }
            b'>' => {
                let kind = if self.expect(b'=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(kind);
            }
            b'/' => self.slash_or_comment(),
            b' ' | b'\t' | b'\r' => {}
            b'\n' => self.line += 1,
            b'"' => self.string(),
            _ => {
                if byte.is_ascii_digit() {
                    self.number();
                } else if byte.is_ascii_alphabetic() {
                    self.identifier();
                } else {
                    self.unknown_byte(byte);
                }
            }
        }
    }

    fn slash_or_comment(&mut self) {
        if self.expect(b'/') {
            // Comment until end of line
            while self.peek() != b'\n' && !self.is_at_end() {
                self.advance();
            }
        } else if self.expect(b'*') {
            let start_line = self.line;
            // Comment until the next */; pairs do not nest
            loop {
                while self.peek() != b'*' && !self.is_at_end() {
                    if self.peek() == b'\n' {
                        self.line += 1;
                    }
                    self.advance();
                }
                if self.is_at_end() {
                    self.reporter.error(
                        self.line,
                        &format!("Unterminated comment starting at line {}", start_line),
                    );
                    return;
                }
                self.advance(); // the '*'
                if self.peek() == b'/' {
                    self.advance();
                    return;
                }
            }
        } else {
            self.add_token(TokenType::Slash);
        }
    }

    fn string(&mut self) {
        let start_line = self.line;
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            self.reporter.error(
                self.line,
                &format!("Unterminated string starting at line {}", start_line),
            );
            return;
        }

        self.advance(); // the closing quote

        let contents = &self.source[self.start + 1..self.current - 1];
        self.add_literal_token(TokenType::String, Some(Literal::String(Rc::from(contents))));
    }

    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // A '.' belongs to the number only when a digit follows it
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let value: f64 = self.source[self.start..self.current]
            .parse()
            .unwrap_or_default();
        self.add_literal_token(TokenType::Number, Some(Literal::Number(value)));
    }

    fn identifier(&mut self) {
        while self.peek().is_ascii_alphanumeric() {
            self.advance();
        }

        let lexeme = &self.source[self.start..self.current];
        match token::keyword(lexeme) {
            Some(kind) => self.add_token(kind),
            None => self.add_token(TokenType::Identifier),
        }
    }

    fn unknown_byte(&mut self, byte: u8) {
        if self.error_run.is_empty() {
            self.error_run_start_line = self.line;
        }
        self.error_run.push(byte);
    }

    /// Reports the pending run of unrecognized bytes, if any. Called when a
    /// valid token ends the run and once more at end of input.
    fn flush_error_run(&mut self) {
        if self.error_run.is_empty() {
            return;
        }

        let mut message = String::from("Syntax error");
        if self.error_run_start_line != self.line {
            message.push_str(&format!(" starting at line: {}", self.error_run_start_line));
        }
        message.push_str(&format!(" ending at line: {}: ", self.line));
        if self.error_run.len() >= 50 {
            message.push_str("with more than 50 characters");
        } else {
            message.push_str(&format!("'{}'", String::from_utf8_lossy(&self.error_run)));
        }

        self.reporter.error(self.line, &message);
        self.error_run.clear();
    }

    fn add_token(&mut self, kind: TokenType) {
        self.add_literal_token(kind, None);
    }

    fn add_literal_token(&mut self, kind: TokenType, literal: Option<Literal>) {
        self.flush_error_run();
        let lexeme = &self.source[self.start..self.current];
        self.tokens.push(Token::new(kind, lexeme, literal, self.line));
    }

    fn advance(&mut self) -> u8 {
        let byte = self.source.as_bytes()[self.current];
        self.current += 1;
        byte
    }

    fn expect(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source.as_bytes()[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            return b'\0';
        }
        self.source.as_bytes()[self.current]
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            return b'\0';
        }
        self.source.as_bytes()[self.current + 1]
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}
