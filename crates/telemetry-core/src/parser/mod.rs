// Recursive-descent parser producing commands and expression trees
use std::path::Path;

use indexmap::IndexMap;

use crate::{
    ast::{Command, Position, Script, Token, TokenKind},
    evaluator::{BinaryOp, CallArgument, Expression, ExpressionKind, ScriptError, UnaryOp},
};

pub mod lexer;


pub use lexer::Lexer;

/// Parses a whole script
pub fn parse(source: &str) -> Result<Script, ScriptError> {
    Parser::new(Lexer::new(source).tokenize()?).script()
}

/// Parses a single expression, e.g. for evaluating ad hoc input
pub fn parse_expression(source: &str) -> Result<Expression, ScriptError> {
    let mut parser = Parser::new(Lexer::new(source).tokenize()?);
    parser.skip_separators();
    let expression = parser.expression()?;
    parser.skip_separators();
    parser.expect(TokenKind::Eof)?;
    Ok(expression)
}

/// Reads and parses a script file
pub fn parse_file(path: &Path) -> Result<Script, ScriptError> {
    let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&source)
}

/// Deepest nesting of parentheses, brackets, calls and unary operators
pub const MAX_NESTING: usize = 128;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    /// `tokens` must end with `Eof`, as produced by [`Lexer::tokenize`]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn peek_kind(&self) -> TokenKind {
        if self.tokens.is_empty() {
            TokenKind::Eof
        } else {
            self.peek().kind
        }
    }

    fn peek_second_kind(&self) -> TokenKind {
        self.tokens
            .get(self.current + 1)
            .map_or(TokenKind::Eof, |token| token.kind)
    }

    fn position(&self) -> Position {
        if self.tokens.is_empty() {
            Position::new(1, 1)
        } else {
            self.peek().position
        }
    }

    fn advance(&mut self) -> Token {
        let token = match self.tokens.get(self.current) {
            Some(token) => token.clone(),
            None => Token::new(TokenKind::Eof, "", self.position()),
        };
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        let found = if self.tokens.is_empty() {
            TokenKind::Eof.to_string()
        } else {
            match self.peek().kind {
                TokenKind::Identifier | TokenKind::Number => format!("`{}`", self.peek().text),
                kind => kind.to_string(),
            }
        };
        ScriptError::parse(format!("expected {expected}, found {found}"), self.position())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ScriptError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    pub fn script(&mut self) -> Result<Script, ScriptError> {
        let mut commands = Vec::new();

        loop {
            self.skip_separators();
            if self.check(TokenKind::Eof) {
                break;
            }

            commands.push(self.statement()?);

            if !matches!(
                self.peek_kind(),
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
            ) {
                return Err(self.unexpected("end of statement"));
            }
        }

        Ok(Script { commands })
    }

    fn statement(&mut self) -> Result<Command, ScriptError> {
        if self.check(TokenKind::Output) {
            let property = self.advance();
            self.expect(TokenKind::Assign)?;
            let expression = self.expression()?;
            return Ok(Command::Output {
                property,
                expression,
            });
        }

        Ok(Command::Evaluate {
            expression: self.expression()?,
        })
    }

    pub fn expression(&mut self) -> Result<Expression, ScriptError> {
        self.nested(Self::or)
    }

    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Expression, ScriptError>,
    ) -> Result<Expression, ScriptError> {
        if self.depth >= MAX_NESTING {
            return Err(ScriptError::parse(
                format!("expression is nested more than {MAX_NESTING} levels deep"),
                self.position(),
            ));
        }

        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn binary_level(
        &mut self,
        operators: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expression, ScriptError>,
    ) -> Result<Expression, ScriptError> {
        let mut left = next(self)?;

        loop {
            let Some(op) = operators
                .iter()
                .find(|(kind, _)| self.check(*kind))
                .map(|(_, op)| *op)
            else {
                break;
            };
            let position = self.advance().position;
            let right = next(self)?;
            left = Expression::new(
                ExpressionKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                position,
            );
        }

        Ok(left)
    }

    fn or(&mut self) -> Result<Expression, ScriptError> {
        self.binary_level(&[(TokenKind::Or, BinaryOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expression, ScriptError> {
        self.binary_level(&[(TokenKind::And, BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expression, ScriptError> {
        self.binary_level(
            &[
                (TokenKind::Equal, BinaryOp::Equal),
                (TokenKind::NotEqual, BinaryOp::NotEqual),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expression, ScriptError> {
        self.binary_level(
            &[
                (TokenKind::Less, BinaryOp::Less),
                (TokenKind::LessEqual, BinaryOp::LessEqual),
                (TokenKind::Greater, BinaryOp::Greater),
                (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expression, ScriptError> {
        self.binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Subtract),
            ],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expression, ScriptError> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Multiply),
                (TokenKind::Slash, BinaryOp::Divide),
                (TokenKind::Percent, BinaryOp::Modulo),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expression, ScriptError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        let position = self.advance().position;
        let operand = self.nested(Self::unary)?;

        Ok(Expression::new(
            ExpressionKind::Unary {
                op,
                operand: Box::new(operand),
            },
            position,
        ))
    }

    fn postfix(&mut self) -> Result<Expression, ScriptError> {
        let mut expression = self.primary()?;

        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name("a property name after `.`")?;
                    expression = Expression::new(
                        ExpressionKind::Property {
                            target: Box::new(expression),
                            name: name.text,
                        },
                        name.position,
                    );
                }
                TokenKind::LeftParen => {
                    self.advance();
                    let arguments = self.arguments()?;
                    let position = expression.position();
                    expression = Expression::new(
                        ExpressionKind::Call {
                            target: Box::new(expression),
                            arguments,
                        },
                        position,
                    );
                }
                TokenKind::LeftBracket => {
                    let position = self.advance().position;
                    let index = self.expression()?;
                    self.expect(TokenKind::RightBracket)?;
                    expression = Expression::new(
                        ExpressionKind::Index {
                            target: Box::new(expression),
                            index: Box::new(index),
                        },
                        position,
                    );
                }
                _ => return Ok(expression),
            }
        }
    }

    /// Property names may also be keywords (`x.null` is a plain lookup)
    fn expect_name(&mut self, expected: &str) -> Result<Token, ScriptError> {
        match self.peek_kind() {
            TokenKind::Identifier | TokenKind::True | TokenKind::False | TokenKind::Null => {
                Ok(self.advance())
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    /// Call arguments after the opening parenthesis
    fn arguments(&mut self) -> Result<Vec<CallArgument>, ScriptError> {
        let mut arguments: Vec<CallArgument> = Vec::new();

        while !self.check(TokenKind::RightParen) {
            let named = self.check(TokenKind::Identifier) && self.peek_second_kind() == TokenKind::Assign;
            let argument = if named {
                let name = self.advance();
                self.advance();
                if arguments
                    .iter()
                    .any(|a| a.name.as_deref() == Some(name.text.as_str()))
                {
                    return Err(ScriptError::parse(
                        format!("argument `{}` is given more than once", name.text),
                        name.position,
                    ));
                }
                CallArgument {
                    name: Some(name.text),
                    value: self.expression()?,
                }
            } else {
                CallArgument {
                    name: None,
                    value: self.expression()?,
                }
            };
            arguments.push(argument);

            if !self.matches(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::RightParen)?;
        Ok(arguments)
    }

    fn primary(&mut self) -> Result<Expression, ScriptError> {
        let position = self.position();

        match self.peek_kind() {
            TokenKind::Number => {
                let token = self.advance();
                let value: f64 = token.text.parse().map_err(|_| {
                    ScriptError::parse(format!("invalid number `{}`", token.text), position)
                })?;
                Ok(Expression::numeric(value, position))
            }
            TokenKind::String => Ok(Expression::string(self.advance().text, position)),
            TokenKind::True => {
                self.advance();
                Ok(Expression::boolean(true, position))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::boolean(false, position))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::null(position))
            }
            TokenKind::Identifier => {
                let name = self.advance().text;
                Ok(Expression::new(
                    ExpressionKind::Property {
                        target: Box::new(Expression::global(position)),
                        name,
                    },
                    position,
                ))
            }
            TokenKind::LeftParen => {
                self.advance();
                let expression = self.expression()?;
                self.expect(TokenKind::RightParen)?;
                Ok(expression)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(TokenKind::RightBracket) {
                    items.push(self.expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RightBracket)?;
                Ok(Expression::new(ExpressionKind::Array(items), position))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut entries = IndexMap::new();
                while !self.check(TokenKind::RightBrace) {
                    let key = match self.peek_kind() {
                        TokenKind::String => self.advance(),
                        _ => self.expect_name("a map key")?,
                    };
                    self.expect(TokenKind::Colon)?;
                    let value = self.expression()?;
                    if entries.insert(key.text.clone(), value).is_some() {
                        return Err(ScriptError::parse(
                            format!("duplicate map key `{}`", key.text),
                            key.position,
                        ));
                    }
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RightBrace)?;
                Ok(Expression::new(ExpressionKind::Map(entries), position))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}
