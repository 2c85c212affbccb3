// Lexer for the script language

use std::{iter::Peekable, str::Chars};

use crate::{
    ast::{Position, Token, TokenKind},
    evaluator::ScriptError,
};

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
    /// Open `(`, `[` and `{`; newlines inside them are not separators
    depth: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            depth: 0,
            tokens: Vec::new(),
        }
    }

    /// Tokenizes the whole source; the last token is always `Eof`
    pub fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        while let Some(&c) = self.chars.peek() {
            let start = self.position();
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        self.push(TokenKind::Newline, "\n", start);
                    }
                }
                '#' => self.skip_comment(),
                '/' => {
                    self.bump();
                    if self.chars.peek() == Some(&'/') {
                        self.skip_comment();
                    } else {
                        self.push(TokenKind::Slash, "/", start);
                    }
                }
                '"' | '\'' => self.string(c, start)?,
                '$' => self.output(start)?,
                c if c.is_ascii_digit() => self.number(start),
                c if c.is_alphabetic() || c == '_' => self.identifier(start),
                _ => self.punctuation(c, start)?,
            }
        }

        let end = self.position();
        self.push(TokenKind::Eof, "", end);
        Ok(self.tokens)
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, position: Position) {
        self.tokens.push(Token::new(kind, text, position));
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn take_while(&mut self, text: &mut String, accept: impl Fn(char) -> bool) {
        while let Some(&c) = self.chars.peek() {
            if !accept(c) {
                break;
            }
            text.push(c);
            self.bump();
        }
    }

    fn identifier(&mut self, start: Position) {
        let mut text = String::new();
        self.take_while(&mut text, |c| c.is_alphanumeric() || c == '_');

        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };
        self.push(kind, text, start);
    }

    fn output(&mut self, start: Position) -> Result<(), ScriptError> {
        self.bump();
        let mut name = String::new();
        if matches!(self.chars.peek(), Some(&c) if c.is_alphabetic() || c == '_') {
            self.take_while(&mut name, |c| c.is_alphanumeric() || c == '_');
        }
        if name.is_empty() {
            return Err(ScriptError::parse("expected a property name after `$`", start));
        }
        self.push(TokenKind::Output, name, start);
        Ok(())
    }

    fn number(&mut self, start: Position) {
        let mut text = String::new();
        self.take_while(&mut text, |c| c.is_ascii_digit());

        // A fraction needs a digit after the dot so `1.round()` stays a call
        let mut lookahead = self.chars.clone();
        if lookahead.next() == Some('.') && lookahead.next().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            self.take_while(&mut text, |c| c.is_ascii_digit());
        }

        let mut lookahead = self.chars.clone();
        if matches!(lookahead.next(), Some('e' | 'E')) {
            let sign = lookahead.peek().copied().filter(|c| *c == '+' || *c == '-');
            if sign.is_some() {
                lookahead.next();
            }
            if lookahead.next().is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.bump();
                if let Some(sign) = sign {
                    text.push(sign);
                    self.bump();
                }
                self.take_while(&mut text, |c| c.is_ascii_digit());
            }
        }

        self.push(TokenKind::Number, text, start);
    }

    fn string(&mut self, quote: char, start: Position) -> Result<(), ScriptError> {
        self.bump();
        let mut text = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(ScriptError::parse("unterminated string", start));
            };
            match c {
                c if c == quote => break,
                '\\' => {
                    let escape_position = self.position();
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('\\') => '\\',
                        Some(other) => {
                            return Err(ScriptError::parse(
                                format!("unknown escape sequence `\\{other}`"),
                                escape_position,
                            ))
                        }
                        None => return Err(ScriptError::parse("unterminated string", start)),
                    };
                    text.push(escaped);
                }
                c => text.push(c),
            }
        }

        self.push(TokenKind::String, text, start);
        Ok(())
    }

    fn punctuation(&mut self, c: char, start: Position) -> Result<(), ScriptError> {
        self.bump();
        let next = self.chars.peek().copied();

        let (kind, text) = match (c, next) {
            ('=', Some('=')) => (TokenKind::Equal, "=="),
            ('!', Some('=')) => (TokenKind::NotEqual, "!="),
            ('<', Some('=')) => (TokenKind::LessEqual, "<="),
            ('>', Some('=')) => (TokenKind::GreaterEqual, ">="),
            ('&', Some('&')) => (TokenKind::And, "&&"),
            ('|', Some('|')) => (TokenKind::Or, "||"),
            ('=', _) => (TokenKind::Assign, "="),
            ('!', _) => (TokenKind::Bang, "!"),
            ('<', _) => (TokenKind::Less, "<"),
            ('>', _) => (TokenKind::Greater, ">"),
            ('+', _) => (TokenKind::Plus, "+"),
            ('-', _) => (TokenKind::Minus, "-"),
            ('*', _) => (TokenKind::Star, "*"),
            ('%', _) => (TokenKind::Percent, "%"),
            (',', _) => (TokenKind::Comma, ","),
            (':', _) => (TokenKind::Colon, ":"),
            ('.', _) => (TokenKind::Dot, "."),
            (';', _) => (TokenKind::Semicolon, ";"),
            ('(', _) => (TokenKind::LeftParen, "("),
            (')', _) => (TokenKind::RightParen, ")"),
            ('[', _) => (TokenKind::LeftBracket, "["),
            (']', _) => (TokenKind::RightBracket, "]"),
            ('{', _) => (TokenKind::LeftBrace, "{"),
            ('}', _) => (TokenKind::RightBrace, "}"),
            _ => {
                return Err(ScriptError::parse(
                    format!("unexpected character `{c}`"),
                    start,
                ))
            }
        };

        if text.len() == 2 {
            self.bump();
        }
        match kind {
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => {
                self.depth += 1;
            }
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                self.depth = self.depth.saturating_sub(1);
            }
            _ => {}
        }

        self.push(kind, text, start);
        Ok(())
    }
}
