//! Tokenizer for template source

use super::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    Def,
    Return,
    Yield,
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Pass,
    Import,
    From,
    As,
    And,
    Or,
    Not,
    True,
    False,
    None,
    Raise,
    Assert,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    Newline,
    Eof,
}

impl Token {
    fn keyword(word: &str) -> Option<Token> {
        let token = match word {
            "def" => Token::Def,
            "return" => Token::Return,
            "yield" => Token::Yield,
            "if" => Token::If,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "while" => Token::While,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "pass" => Token::Pass,
            "import" => Token::Import,
            "from" => Token::From,
            "as" => Token::As,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "true" => Token::True,
            "false" => Token::False,
            "none" => Token::None,
            "raise" => Token::Raise,
            "assert" => Token::Assert,
            _ => return None,
        };
        Some(token)
    }
}

/// A token with the position it started at (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer<'a> {
    file: &'a str,
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    /// Open `(` and `[` - newlines inside them are not statement ends
    nesting: usize,
    tokens: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a str, source: &'a str) -> Self {
        Self {
            file,
            source,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            nesting: 0,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ScriptError> {
        while let Some(c) = self.peek() {
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    // explicit line continuation
                    self.advance();
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '\n' => {
                    self.advance();
                    if self.nesting == 0 {
                        self.push_newline(line, column);
                    }
                }
                '"' | '\'' => {
                    let s = self.string(c)?;
                    self.push(Token::Str(s), line, column);
                }
                c if c.is_ascii_digit() => {
                    let token = self.number()?;
                    self.push(token, line, column);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.identifier();
                    let token = Token::keyword(&word).unwrap_or(Token::Ident(word));
                    self.push(token, line, column);
                }
                _ => {
                    let token = self.punctuation()?;
                    self.push(token, line, column);
                }
            }
        }
        let (line, column) = (self.line, self.column);
        self.push_newline(line, column);
        self.push(Token::Eof, line, column);
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, token: Token, line: u32, column: u32) {
        self.tokens.push(Spanned { token, line, column });
    }

    fn push_newline(&mut self, line: u32, column: u32) {
        match self.tokens.last().map(|t| &t.token) {
            None | Some(Token::Newline) | Some(Token::LBrace) | Some(Token::Semicolon) => {}
            _ => self.push(Token::Newline, line, column),
        }
    }

    fn error(&self, line: u32, column: u32, message: impl Into<String>) -> ScriptError {
        let source_line = self.source.lines().nth(line.saturating_sub(1) as usize);
        ScriptError::syntax(self.file, line, column, source_line, message)
    }

    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn number(&mut self) -> Result<Token, ScriptError> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.advance();
            } else if c == '.' && !is_float && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                text.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                text.push(c);
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(line, column, format!("invalid number literal '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error(line, column, format!("integer literal '{}' is too large", text)))
        }
    }

    fn string(&mut self, quote: char) -> Result<String, ScriptError> {
        let (line, column) = (self.line, self.column);
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let delimiter_len = if triple { 3 } else { 1 };
        for _ in 0..delimiter_len {
            self.advance();
        }

        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error(line, column, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.advance();
                    return Ok(value);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.advance();
                    self.advance();
                    self.advance();
                    return Ok(value);
                }
                value.push(c);
                self.advance();
                continue;
            }
            if c == '\n' && !triple {
                return Err(self.error(line, column, "unterminated string literal"));
            }
            if c == '\\' {
                let (esc_line, esc_column) = (self.line, self.column);
                self.advance();
                let escaped = match self.advance() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('\\') => '\\',
                    Some('\'') => '\'',
                    Some('"') => '"',
                    Some('\n') => continue,
                    Some(other) => {
                        return Err(self.error(esc_line, esc_column, format!("unknown escape sequence '\\{}'", other)));
                    }
                    None => return Err(self.error(line, column, "unterminated string literal")),
                };
                value.push(escaped);
                continue;
            }
            value.push(c);
            self.advance();
        }
    }

    fn punctuation(&mut self) -> Result<Token, ScriptError> {
        let (line, column) = (self.line, self.column);
        let c = self.advance().unwrap_or('\0');
        let next = self.peek();
        let token = match (c, next) {
            ('*', Some('*')) => {
                self.advance();
                Token::DoubleStar
            }
            ('/', Some('/')) => {
                self.advance();
                Token::DoubleSlash
            }
            ('+', Some('=')) => {
                self.advance();
                Token::PlusAssign
            }
            ('-', Some('=')) => {
                self.advance();
                Token::MinusAssign
            }
            ('=', Some('=')) => {
                self.advance();
                Token::Eq
            }
            ('!', Some('=')) => {
                self.advance();
                Token::NotEq
            }
            ('<', Some('=')) => {
                self.advance();
                Token::LtEq
            }
            ('>', Some('=')) => {
                self.advance();
                Token::GtEq
            }
            ('(', _) => {
                self.nesting += 1;
                Token::LParen
            }
            (')', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                Token::RParen
            }
            ('[', _) => {
                self.nesting += 1;
                Token::LBracket
            }
            (']', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                Token::RBracket
            }
            ('{', _) => Token::LBrace,
            ('}', _) => Token::RBrace,
            (',', _) => Token::Comma,
            (':', _) => Token::Colon,
            ('.', _) => Token::Dot,
            (';', _) => Token::Semicolon,
            ('+', _) => Token::Plus,
            ('-', _) => Token::Minus,
            ('*', _) => Token::Star,
            ('/', _) => Token::Slash,
            ('%', _) => Token::Percent,
            ('=', _) => Token::Assign,
            ('<', _) => Token::Lt,
            ('>', _) => Token::Gt,
            (other, _) => return Err(self.error(line, column, format!("unexpected character '{}'", other))),
        };
        Ok(token)
    }
}

/// Tokenize a whole source file
pub fn tokenize(file: &str, source: &str) -> Result<Vec<Spanned>, ScriptError> {
    Lexer::new(file, source).tokenize()
}
