//! Lexer and recursive-descent parser for the expression language.
//!
//! Keywords and function names are matched case-insensitively. Placeholders
//! keep their sigil (`#n1`, `:v1`) so they can be looked up verbatim in the
//! request's name and value maps.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use super::ast::{
    AttributePath, CompareOp, Expr, FunctionName, LogicalOp, Operand, PathElement, PathValue,
    SetAction, SetValue, UpdateExpr,
};

/// Errors produced while parsing or evaluating an expression.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// An unexpected token was encountered.
    #[error("Invalid expression: expected {expected}, found {found}")]
    UnexpectedToken {
        /// What was expected.
        expected: String,
        /// What was found.
        found: String,
    },
    /// A `#name` placeholder has no entry in the name map.
    #[error("An expression attribute name used in the document path is not defined; attribute name: {name}")]
    UnresolvedName {
        /// The placeholder.
        name: String,
    },
    /// A `:value` placeholder has no entry in the value map.
    #[error("An expression attribute value used in expression is not defined; attribute value: {name}")]
    UnresolvedValue {
        /// The placeholder.
        name: String,
    },
    /// An operand cannot be used where it appears.
    #[error("Invalid operand for {operation}: {message}")]
    InvalidOperand {
        /// The operation.
        operation: String,
        /// Explanation.
        message: String,
    },
    /// Operand types do not fit the operation.
    #[error("Type mismatch: {message}")]
    TypeMismatch {
        /// Explanation.
        message: String,
    },
}

impl ExpressionError {
    fn unexpected(expected: impl Into<String>, found: &Token) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Name(String),
    Value(String),
    Number(usize),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    And,
    Or,
    Not,
    Between,
    In,
    Set,
    Remove,
    Add,
    Delete,
    Function(FunctionName),
    Size,
    IfNotExists,
    ListAppend,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(s) => write!(f, "identifier '{s}'"),
            Self::Name(s) | Self::Value(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Eq => f.write_str("'='"),
            Self::Ne => f.write_str("'<>'"),
            Self::Lt => f.write_str("'<'"),
            Self::Le => f.write_str("'<='"),
            Self::Gt => f.write_str("'>'"),
            Self::Ge => f.write_str("'>='"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Dot => f.write_str("'.'"),
            Self::Comma => f.write_str("','"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
            Self::Not => f.write_str("NOT"),
            Self::Between => f.write_str("BETWEEN"),
            Self::In => f.write_str("IN"),
            Self::Set => f.write_str("SET"),
            Self::Remove => f.write_str("REMOVE"),
            Self::Add => f.write_str("ADD"),
            Self::Delete => f.write_str("DELETE"),
            Self::Function(name) => write!(f, "{name}"),
            Self::Size => f.write_str("size"),
            Self::IfNotExists => f.write_str("if_not_exists"),
            Self::ListAppend => f.write_str("list_append"),
            Self::Eof => f.write_str("end of expression"),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn bump(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        while self.chars.peek().is_some_and(char::is_ascii_whitespace) {
            self.chars.next();
        }
        let Some(&ch) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '#' | ':' => {
                self.chars.next();
                let name = self.read_ident();
                if name.is_empty() {
                    return Err(ExpressionError::UnexpectedToken {
                        expected: format!("placeholder name after '{ch}'"),
                        found: "nothing".to_owned(),
                    });
                }
                if ch == '#' {
                    Token::Name(format!("#{name}"))
                } else {
                    Token::Value(format!(":{name}"))
                }
            }
            '=' => self.bump(Token::Eq),
            '<' => {
                self.chars.next();
                match self.chars.peek() {
                    Some('=') => self.bump(Token::Le),
                    Some('>') => self.bump(Token::Ne),
                    _ => Token::Lt,
                }
            }
            '>' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.bump(Token::Ge)
                } else {
                    Token::Gt
                }
            }
            '+' => self.bump(Token::Plus),
            '-' => self.bump(Token::Minus),
            '.' => self.bump(Token::Dot),
            ',' => self.bump(Token::Comma),
            '(' => self.bump(Token::LParen),
            ')' => self.bump(Token::RParen),
            '[' => self.bump(Token::LBracket),
            ']' => self.bump(Token::RBracket),
            c if c.is_ascii_digit() => {
                let digits = self.read_ident();
                let n = digits
                    .parse()
                    .map_err(|_| ExpressionError::InvalidOperand {
                        operation: "list index".to_owned(),
                        message: format!("'{digits}' is not a valid index"),
                    })?;
                Token::Number(n)
            }
            c if c.is_ascii_alphabetic() || c == '_' => keyword(self.read_ident()),
            other => {
                return Err(ExpressionError::UnexpectedToken {
                    expected: "a valid token".to_owned(),
                    found: format!("'{other}'"),
                });
            }
        };
        Ok(token)
    }

    fn read_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            s.push(c);
            self.chars.next();
        }
        s
    }
}

fn keyword(ident: String) -> Token {
    match ident.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "between" => Token::Between,
        "in" => Token::In,
        "set" => Token::Set,
        "remove" => Token::Remove,
        "add" => Token::Add,
        "delete" => Token::Delete,
        "attribute_exists" => Token::Function(FunctionName::AttributeExists),
        "attribute_not_exists" => Token::Function(FunctionName::AttributeNotExists),
        "attribute_type" => Token::Function(FunctionName::AttributeType),
        "begins_with" => Token::Function(FunctionName::BeginsWith),
        "contains" => Token::Function(FunctionName::Contains),
        "size" => Token::Size,
        "if_not_exists" => Token::IfNotExists,
        "list_append" => Token::ListAppend,
        _ => Token::Identifier(ident),
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            tokens: Lexer::new(input).tokenize()?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        let token = self.advance();
        if &token == expected {
            Ok(())
        } else {
            Err(ExpressionError::unexpected(expected.to_string(), &token))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn finish<T>(&self, parsed: T) -> Result<T, ExpressionError> {
        match self.peek() {
            Token::Eof => Ok(parsed),
            other => Err(ExpressionError::unexpected("end of expression", other)),
        }
    }

    fn comma_separated<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<Vec<T>, ExpressionError> {
        let mut items = vec![item(self)?];
        while self.eat(&Token::Comma) {
            items.push(item(self)?);
        }
        Ok(items)
    }
}

// -- conditions, lowest precedence first: OR, AND, NOT, primary --

impl Parser {
    fn or_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::LParen) {
            let expr = self.or_expr()?;
            self.expect(&Token::RParen)?;
            return Ok(expr);
        }
        if let Token::Function(name) = *self.peek() {
            self.advance();
            self.expect(&Token::LParen)?;
            let args = self.comma_separated(Self::operand)?;
            self.expect(&Token::RParen)?;
            if args.len() != name.arity() {
                return Err(ExpressionError::InvalidOperand {
                    operation: name.to_string(),
                    message: format!("expected {} argument(s), got {}", name.arity(), args.len()),
                });
            }
            return Ok(Expr::Function { name, args });
        }

        let left = self.operand()?;
        match self.peek().clone() {
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => {
                let op = compare_op(&self.advance());
                let right = self.operand()?;
                Ok(Expr::Compare { left, op, right })
            }
            Token::Between => {
                self.advance();
                let low = self.operand()?;
                self.expect(&Token::And)?;
                let high = self.operand()?;
                Ok(Expr::Between {
                    value: left,
                    low,
                    high,
                })
            }
            Token::In => {
                self.advance();
                self.expect(&Token::LParen)?;
                let list = self.comma_separated(Self::operand)?;
                self.expect(&Token::RParen)?;
                Ok(Expr::In { value: left, list })
            }
            other => Err(ExpressionError::unexpected(
                "comparison operator, BETWEEN or IN",
                &other,
            )),
        }
    }

    fn operand(&mut self) -> Result<Operand, ExpressionError> {
        match self.peek().clone() {
            Token::Value(name) => {
                self.advance();
                Ok(Operand::Value(name))
            }
            Token::Size => {
                self.advance();
                self.expect(&Token::LParen)?;
                let path = self.path()?;
                self.expect(&Token::RParen)?;
                Ok(Operand::Size(path))
            }
            _ => Ok(Operand::Path(self.path()?)),
        }
    }

    fn path(&mut self) -> Result<AttributePath, ExpressionError> {
        let mut elements = vec![self.path_name()?];
        loop {
            if self.eat(&Token::Dot) {
                elements.push(self.path_name()?);
            } else if self.eat(&Token::LBracket) {
                match self.advance() {
                    Token::Number(n) => elements.push(PathElement::Index(n)),
                    other => return Err(ExpressionError::unexpected("list index", &other)),
                }
                self.expect(&Token::RBracket)?;
            } else {
                return Ok(AttributePath { elements });
            }
        }
    }

    fn path_name(&mut self) -> Result<PathElement, ExpressionError> {
        match self.advance() {
            Token::Identifier(name) | Token::Name(name) => Ok(PathElement::Attribute(name)),
            other => Err(ExpressionError::unexpected("attribute name or #name", &other)),
        }
    }
}

fn compare_op(token: &Token) -> CompareOp {
    match token {
        Token::Ne => CompareOp::Ne,
        Token::Lt => CompareOp::Lt,
        Token::Le => CompareOp::Le,
        Token::Gt => CompareOp::Gt,
        Token::Ge => CompareOp::Ge,
        _ => CompareOp::Eq,
    }
}

// -- updates --

impl Parser {
    fn update_expr(&mut self) -> Result<UpdateExpr, ExpressionError> {
        let mut update = UpdateExpr::default();
        loop {
            match self.advance() {
                Token::Set => {
                    let actions = self.comma_separated(Self::set_action)?;
                    update.set_actions.extend(actions);
                }
                Token::Remove => {
                    let paths = self.comma_separated(Self::path)?;
                    update.remove_paths.extend(paths);
                }
                Token::Add => {
                    let actions = self.comma_separated(Self::path_value)?;
                    update.add_actions.extend(actions);
                }
                Token::Delete => {
                    let actions = self.comma_separated(Self::path_value)?;
                    update.delete_actions.extend(actions);
                }
                Token::Eof if !update.is_empty() => return Ok(update),
                other => return Err(ExpressionError::unexpected("SET, REMOVE, ADD or DELETE", &other)),
            }
        }
    }

    fn set_action(&mut self) -> Result<SetAction, ExpressionError> {
        let path = self.path()?;
        self.expect(&Token::Eq)?;
        let value = self.set_value()?;
        Ok(SetAction { path, value })
    }

    fn set_value(&mut self) -> Result<SetValue, ExpressionError> {
        let mut value = self.set_term()?;
        loop {
            if self.eat(&Token::Plus) {
                value = SetValue::Plus(Box::new(value), Box::new(self.set_term()?));
            } else if self.eat(&Token::Minus) {
                value = SetValue::Minus(Box::new(value), Box::new(self.set_term()?));
            } else {
                return Ok(value);
            }
        }
    }

    fn set_term(&mut self) -> Result<SetValue, ExpressionError> {
        if self.eat(&Token::IfNotExists) {
            self.expect(&Token::LParen)?;
            let path = self.path()?;
            self.expect(&Token::Comma)?;
            let default = self.operand()?;
            self.expect(&Token::RParen)?;
            return Ok(SetValue::IfNotExists(path, default));
        }
        if self.eat(&Token::ListAppend) {
            self.expect(&Token::LParen)?;
            let first = self.operand()?;
            self.expect(&Token::Comma)?;
            let second = self.operand()?;
            self.expect(&Token::RParen)?;
            return Ok(SetValue::ListAppend(first, second));
        }
        Ok(SetValue::Operand(self.operand()?))
    }

    fn path_value(&mut self) -> Result<PathValue, ExpressionError> {
        let path = self.path()?;
        let value = self.operand()?;
        Ok(PathValue { path, value })
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a condition, filter or key-condition expression.
pub fn parse_condition(input: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.or_expr()?;
    parser.finish(expr)
}

/// Parse an update expression.
pub fn parse_update(input: &str) -> Result<UpdateExpr, ExpressionError> {
    Parser::new(input)?.update_expr()
}

/// Parse a projection expression.
pub fn parse_projection(input: &str) -> Result<Vec<AttributePath>, ExpressionError> {
    let mut parser = Parser::new(input)?;
    let paths = parser.comma_separated(Parser::path)?;
    parser.finish(paths)
}
