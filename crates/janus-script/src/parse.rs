//! Lexer, parser and name analysis for the script language.
//!
//! A cell is a sequence of statements separated by newlines or `;`.
//! Each statement is either `name = expr` or a bare expression. The
//! expression grammar covers numbers, strings, `true`/`false`/`null`,
//! identifiers, unary minus, the four arithmetic operators, parentheses
//! and calls to the built-in functions. `#` starts a line comment.

use std::fmt;

use janus_core::{CellParser, ParsedCell};
use thiserror::Error;

/// Functions the runtime provides; calling anything else is a parse
/// error so typos surface before execution.
pub(crate) const BUILTINS: [&str; 3] = ["sleep", "fail", "len"];

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("malformed number `{0}`")]
    MalformedNumber(String),
    #[error("unexpected end of statement")]
    UnexpectedEnd,
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

// ==== Tokens ====

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Assign,
    Separator,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier `{name}`"),
            Token::Int(v) => write!(f, "number `{v}`"),
            Token::Float(v) => write!(f, "number `{v}`"),
            Token::Str(_) => write!(f, "string literal"),
            Token::Plus => write!(f, "`+`"),
            Token::Minus => write!(f, "`-`"),
            Token::Star => write!(f, "`*`"),
            Token::Slash => write!(f, "`/`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Comma => write!(f, "`,`"),
            Token::Assign => write!(f, "`=`"),
            Token::Separator => write!(f, "end of statement"),
        }
    }
}

fn tokenize(code: &str) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '\n' | ';' => {
                chars.next();
                tokens.push(Token::Separator);
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Assign);
            }
            '"' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars)?));
            }
            c if c.is_ascii_digit() => {
                tokens.push(lex_number(&mut chars)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_alphanumeric() && c != '_' {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(name));
            }
            other => return Err(ScriptError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<String, ScriptError> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None | Some('\n') => return Err(ScriptError::UnterminatedString),
            Some('"') => return Ok(out),
            Some('\\') => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => return Err(ScriptError::UnexpectedChar(other)),
                None => return Err(ScriptError::UnterminatedString),
            },
            Some(c) => out.push(c),
        }
    }
}

fn lex_number(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<Token, ScriptError> {
    let mut text = String::new();
    let mut float = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            chars.next();
        } else if c == '.' && !float {
            float = true;
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ScriptError::MalformedNumber(text))
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ScriptError::MalformedNumber(text))
    }
}

// ==== Syntax tree ====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// One statement: an optional binding plus its expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stmt {
    pub(crate) name: Option<String>,
    pub(crate) expr: Expr,
}

// ==== Parser ====

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), ScriptError> {
        match self.next() {
            Some(found) if found == token => Ok(()),
            Some(found) => Err(ScriptError::UnexpectedToken(found.to_string())),
            None => Err(ScriptError::UnexpectedEnd),
        }
    }

    fn skip_separators(&mut self) {
        while self.peek() == Some(&Token::Separator) {
            self.at += 1;
        }
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let name = if let (Some(Token::Ident(name)), Some(Token::Assign)) =
            (self.tokens.get(self.at), self.tokens.get(self.at + 1))
        {
            let name = name.clone();
            self.at += 2;
            Some(name)
        } else {
            None
        };
        let expr = self.expression()?;
        match self.peek() {
            None | Some(Token::Separator) => Ok(Stmt { name, expr }),
            Some(found) => Err(ScriptError::UnexpectedToken(found.to_string())),
        }
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.at += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.at += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        if self.peek() == Some(&Token::Minus) {
            self.at += 1;
            return Ok(Expr::Neg(Box::new(self.factor()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Expr::Int(v)),
            Some(Token::Float(v)) => Ok(Expr::Float(v)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.at += 1;
                    if !BUILTINS.contains(&name.as_str()) {
                        return Err(ScriptError::UnknownFunction(name));
                    }
                    let args = self.arguments()?;
                    return Ok(Expr::Call { name, args });
                }
                match name.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    "null" => Ok(Expr::Null),
                    _ => Ok(Expr::Ident(name)),
                }
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(found) => Err(ScriptError::UnexpectedToken(found.to_string())),
            None => Err(ScriptError::UnexpectedEnd),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.at += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(found) => return Err(ScriptError::UnexpectedToken(found.to_string())),
                None => return Err(ScriptError::UnexpectedEnd),
            }
        }
    }
}

/// Parses a whole cell body into statements.
pub(crate) fn parse_program(code: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(code)?,
        at: 0,
    };
    let mut program = Vec::new();
    loop {
        parser.skip_separators();
        if parser.peek().is_none() {
            return Ok(program);
        }
        program.push(parser.statement()?);
    }
}

// ==== Name analysis ====

fn collect_free(expr: &Expr, defined: &[String], consumed: &mut Vec<String>) {
    match expr {
        Expr::Ident(name) => {
            if !defined.iter().any(|d| d == name) && !consumed.iter().any(|c| c == name) {
                consumed.push(name.clone());
            }
        }
        Expr::Neg(inner) => collect_free(inner, defined, consumed),
        Expr::Binary { lhs, rhs, .. } => {
            collect_free(lhs, defined, consumed);
            collect_free(rhs, defined, consumed);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_free(arg, defined, consumed);
            }
        }
        _ => {}
    }
}

/// The engine-facing parser: extracts the names a cell reads from other
/// cells and the names it defines for them.
///
/// A name assigned earlier in the same cell shadows any outside
/// producer, so `x = 1` followed by `y = x` consumes nothing.
pub struct ScriptParser;

impl CellParser for ScriptParser {
    fn parse(&self, code: &str) -> janus_core::Result<ParsedCell> {
        let program =
            parse_program(code).map_err(|error| janus_core::Error::Parse(error.to_string()))?;
        let mut consumed: Vec<String> = Vec::new();
        let mut created: Vec<String> = Vec::new();
        for stmt in &program {
            collect_free(&stmt.expr, &created, &mut consumed);
            if let Some(name) = &stmt.name
                && !created.iter().any(|c| c == name)
            {
                created.push(name.clone());
            }
        }
        Ok(ParsedCell {
            consumed,
            created,
            body: code.into(),
        })
    }
}
