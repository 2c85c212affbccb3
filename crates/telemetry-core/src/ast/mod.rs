// Token and command layer shared by the parser and the executor

use std::fmt;

use crate::evaluator::{ExecutionContext, Expression, ScriptError};

/// Source location of a token or expression (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Lexical categories produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals and names
    Identifier,
    /// `$name` - the target of an output command
    Output,
    String,
    Number,
    True,
    False,
    Null,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Colon,
    Dot,
    Assign,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,

    // Statement separators
    Newline,
    Semicolon,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Identifier => "identifier",
            TokenKind::Output => "output property",
            TokenKind::String => "string",
            TokenKind::Number => "number",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::Null => "`null`",
            TokenKind::LeftParen => "`(`",
            TokenKind::RightParen => "`)`",
            TokenKind::LeftBracket => "`[`",
            TokenKind::RightBracket => "`]`",
            TokenKind::LeftBrace => "`{`",
            TokenKind::RightBrace => "`}`",
            TokenKind::Comma => "`,`",
            TokenKind::Colon => "`:`",
            TokenKind::Dot => "`.`",
            TokenKind::Assign => "`=`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::Bang => "`!`",
            TokenKind::Equal => "`==`",
            TokenKind::NotEqual => "`!=`",
            TokenKind::Less => "`<`",
            TokenKind::LessEqual => "`<=`",
            TokenKind::Greater => "`>`",
            TokenKind::GreaterEqual => "`>=`",
            TokenKind::And => "`&&`",
            TokenKind::Or => "`||`",
            TokenKind::Newline => "end of line",
            TokenKind::Semicolon => "`;`",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}

/// A lexical unit. `text` holds the decoded content for strings and the
/// bare name (without `$`) for output properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }
}

/// A statement of a script
#[derive(Debug, Clone)]
pub enum Command {
    /// `$property = expression`
    Output {
        property: Token,
        expression: Expression,
    },
    /// A bare expression run for its side effects
    Evaluate { expression: Expression },
}

impl Command {
    pub fn position(&self) -> Position {
        match self {
            Command::Output { property, .. } => property.position,
            Command::Evaluate { expression } => expression.position(),
        }
    }

    pub fn execute(&self, context: &mut ExecutionContext<'_>) -> Result<(), ScriptError> {
        match self {
            Command::Output {
                property,
                expression,
            } => {
                let value = expression.evaluate(context)?;
                context.set_output(&property.text, value);
                Ok(())
            }
            Command::Evaluate { expression } => {
                expression.evaluate(context)?;
                Ok(())
            }
        }
    }
}

/// A parsed program: commands in source order
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub commands: Vec<Command>,
}

impl Script {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
