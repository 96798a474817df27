//! Recursive-descent parser: tokens -> syntax tree

use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use super::ast::*;
use super::error::ScriptError;
use super::lexer::{Spanned, Token, tokenize};

/// Nesting allowed before the parser gives up; bounds recursion here and in the compiler
const NESTING_BUDGET: usize = 500;
/// Cost of one nested expression, statement or prefix operator
const NESTED_COST: usize = 5;
/// Cost of one link in an operator, call or attribute chain
const CHAIN_COST: usize = 1;

/// Per-function parsing state
#[derive(Default)]
struct Scope {
    is_generator: bool,
    loops: usize,
}

pub struct Parser<'a> {
    file: &'a str,
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    /// scopes[0] is module level
    scopes: Vec<Scope>,
    nesting: usize,
}

impl<'a> Parser<'a> {
    pub fn new(file: &'a str, source: &'a str, tokens: Vec<Spanned>) -> Self {
        Self {
            file,
            source,
            tokens,
            pos: 0,
            scopes: vec![Scope::default()],
            nesting: 0,
        }
    }

    pub fn parse_program(mut self) -> Result<Program, ScriptError> {
        let mut body = Vec::new();
        self.skip_separators();
        while !self.check(&Token::Eof) {
            body.push(self.statement()?);
            self.skip_separators();
        }
        Ok(Program { body })
    }

    // --- token helpers -------------------------------------------------

    fn current(&self) -> &Spanned {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn advance(&mut self) -> Spanned {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<Spanned, ScriptError> {
        if self.check(token) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    /// Look past newlines without consuming them
    fn peek_past_newlines(&self) -> &Token {
        let mut offset = 0;
        while self.peek_at(offset) == &Token::Newline {
            offset += 1;
        }
        self.peek_at(offset)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let spanned = self.current();
        let message = message.into();
        let found = describe(&spanned.token);
        let source_line = self.source.lines().nth(spanned.line.saturating_sub(1) as usize);
        ScriptError::syntax(
            self.file,
            spanned.line,
            spanned.column,
            source_line,
            format!("{}, found {}", message, found),
        )
    }

    fn error_plain(&self, line: u32, message: impl Into<String>) -> ScriptError {
        let source_line = self.source.lines().nth(line.saturating_sub(1) as usize);
        ScriptError::syntax(self.file, line, 1, source_line, message)
    }

    /// Spends nesting budget; callers restore `self.nesting` when the construct ends
    fn descend(&mut self, cost: usize) -> Result<(), ScriptError> {
        self.nesting += cost;
        if self.nesting > NESTING_BUDGET {
            return Err(self.error("too deeply nested"));
        }
        Ok(())
    }

    fn scope(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn in_function(&self) -> bool {
        self.scopes.len() > 1
    }

    // --- statements ----------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let mark = self.nesting;
        self.descend(NESTED_COST)?;
        let stmt = self.statement_at();
        self.nesting = mark;
        stmt
    }

    fn statement_at(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.current().line;
        let kind = match self.peek() {
            Token::Def => return self.def_statement(),
            Token::If => return self.if_statement(),
            Token::For => return self.for_statement(),
            Token::While => return self.while_statement(),
            Token::Import => self.import_statement()?,
            Token::From => self.from_import_statement()?,
            Token::Return => {
                if !self.in_function() {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression()?))
                }
            }
            Token::Yield => {
                if !self.in_function() {
                    return Err(self.error("'yield' outside function"));
                }
                self.advance();
                self.scope().is_generator = true;
                if self.at_statement_end() {
                    StmtKind::Yield(Expr {
                        kind: ExprKind::Literal(Literal::None),
                        line,
                    })
                } else {
                    StmtKind::Yield(self.expression()?)
                }
            }
            Token::Break | Token::Continue => {
                if self.scopes.last().map(|s| s.loops).unwrap_or(0) == 0 {
                    return Err(self.error("loop control outside loop"));
                }
                if self.advance().token == Token::Break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Raise => {
                self.advance();
                StmtKind::Raise(self.expression()?)
            }
            Token::Assert => {
                self.advance();
                let test = self.expression()?;
                let message = if self.accept(&Token::Comma) {
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Assert { test, message }
            }
            _ => self.simple_statement()?,
        };
        if !self.at_statement_end() {
            return Err(self.error("expected end of statement"));
        }
        Ok(Stmt { kind, line })
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Newline | Token::Semicolon | Token::RBrace | Token::Eof
        )
    }

    fn simple_statement(&mut self) -> Result<StmtKind, ScriptError> {
        let expr = self.expression()?;
        let op = match self.peek() {
            Token::Assign => None,
            Token::PlusAssign => Some(BinaryOp::Add),
            Token::MinusAssign => Some(BinaryOp::Sub),
            _ => return Ok(StmtKind::Expr(expr)),
        };
        let line = expr.line;
        let target = self.to_target(expr, line)?;
        self.advance();
        let value = self.expression()?;
        Ok(match op {
            None => StmtKind::Assign { target, value },
            Some(op) => StmtKind::AugAssign { target, op, value },
        })
    }

    fn to_target(&self, expr: Expr, line: u32) -> Result<Target, ScriptError> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Index { object, index } => Ok(Target::Index {
                object: *object,
                index: *index,
            }),
            ExprKind::Attr { object, name } => Ok(Target::Attr { object: *object, name }),
            _ => Err(self.error_plain(line, "cannot assign to expression")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        self.skip_separators();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("expected '}'"));
            }
            body.push(self.statement()?);
            self.skip_separators();
        }
        self.advance();
        Ok(body)
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.scope().loops += 1;
        let body = self.block();
        self.scope().loops -= 1;
        body
    }

    fn def_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.advance().line;
        let name = self.expect_ident("function name")?;
        debug!(%name, line, "Parser::def_statement: called");
        self.expect(&Token::LParen, "'('")?;
        let params = self.params()?;
        self.expect(&Token::RParen, "')'")?;

        self.scopes.push(Scope::default());
        let body = self.block();
        let scope = self.scopes.pop().unwrap_or_default();
        let body = body?;

        let def = FunctionDef {
            name,
            params,
            body,
            line,
            is_generator: scope.is_generator,
        };
        Ok(Stmt {
            kind: StmtKind::Def(Rc::new(def)),
            line,
        })
    }

    fn params(&mut self) -> Result<Vec<Param>, ScriptError> {
        let mut params = Vec::new();
        let mut seen = HashSet::new();
        let mut seen_optional = false;
        while !self.check(&Token::RParen) {
            if params.iter().any(|p| matches!(p, Param::Keywords(_))) {
                return Err(self.error("'**' parameter must be last"));
            }
            let param = if self.accept(&Token::DoubleStar) {
                Param::Keywords(self.expect_ident("parameter name")?)
            } else if self.accept(&Token::Star) {
                if params.iter().any(|p| matches!(p, Param::Rest(_))) {
                    return Err(self.error("only one '*' parameter is allowed"));
                }
                Param::Rest(self.expect_ident("parameter name")?)
            } else {
                if params.iter().any(|p| matches!(p, Param::Rest(_))) {
                    return Err(self.error("named parameters must come before '*' parameter"));
                }
                let name = self.expect_ident("parameter name")?;
                if self.accept(&Token::Assign) {
                    seen_optional = true;
                    Param::Optional(name, self.expression()?)
                } else if seen_optional {
                    return Err(self.error("parameter without default follows parameter with default"));
                } else {
                    Param::Required(name)
                }
            };
            if !seen.insert(param.name().to_string()) {
                return Err(self.error(format!("duplicate parameter '{}'", param.name())));
            }
            params.push(param);
            if !self.accept(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.advance().line;
        let mut branches = Vec::new();
        let test = self.expression()?;
        branches.push((test, self.block()?));
        let mut orelse = None;
        loop {
            match self.peek_past_newlines() {
                Token::Elif => {
                    self.skip_newlines();
                    self.advance();
                    let test = self.expression()?;
                    branches.push((test, self.block()?));
                }
                Token::Else => {
                    self.skip_newlines();
                    self.advance();
                    orelse = Some(self.block()?);
                    break;
                }
                _ => break,
            }
        }
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.advance().line;
        let mut targets = vec![self.expect_ident("loop variable")?];
        while self.accept(&Token::Comma) {
            targets.push(self.expect_ident("loop variable")?);
        }
        self.expect(&Token::In, "'in'")?;
        let iter = self.expression()?;
        let body = self.loop_body()?;
        Ok(Stmt {
            kind: StmtKind::For { targets, iter, body },
            line,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.advance().line;
        let test = self.expression()?;
        let body = self.loop_body()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            line,
        })
    }

    fn dotted_name(&mut self) -> Result<String, ScriptError> {
        let mut name = self.expect_ident("module name")?;
        while self.accept(&Token::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident("module name")?);
        }
        Ok(name)
    }

    fn import_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.advance();
        let module = self.dotted_name()?;
        let alias = if self.accept(&Token::As) {
            Some(self.expect_ident("alias")?)
        } else {
            None
        };
        Ok(StmtKind::Import { module, alias })
    }

    fn from_import_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.advance();
        let module = self.dotted_name()?;
        self.expect(&Token::Import, "'import'")?;
        let mut names = Vec::new();
        loop {
            let name = self.expect_ident("imported name")?;
            let alias = if self.accept(&Token::As) {
                Some(self.expect_ident("alias")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.accept(&Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::FromImport { module, names })
    }

    // --- expressions ---------------------------------------------------

    pub fn expression(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.nesting;
        self.descend(NESTED_COST)?;
        let expr = self.conditional();
        self.nesting = mark;
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let expr = self.or_expr()?;
        if self.check(&Token::If) {
            let line = expr.line;
            self.advance();
            let test = self.or_expr()?;
            self.expect(&Token::Else, "'else' in conditional expression")?;
            let orelse = self.expression()?;
            return Ok(Expr {
                kind: ExprKind::Conditional {
                    test: Box::new(test),
                    then: Box::new(expr),
                    orelse: Box::new(orelse),
                },
                line,
            });
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.nesting;
        let mut left = self.and_expr()?;
        while self.check(&Token::Or) {
            self.advance();
            self.descend(CHAIN_COST)?;
            let right = self.and_expr()?;
            let line = left.line;
            left = Expr {
                kind: ExprKind::Or(Box::new(left), Box::new(right)),
                line,
            };
        }
        self.nesting = mark;
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.nesting;
        let mut left = self.not_expr()?;
        while self.check(&Token::And) {
            self.advance();
            self.descend(CHAIN_COST)?;
            let right = self.not_expr()?;
            let line = left.line;
            left = Expr {
                kind: ExprKind::And(Box::new(left), Box::new(right)),
                line,
            };
        }
        self.nesting = mark;
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ScriptError> {
        if self.check(&Token::Not) {
            let line = self.advance().line;
            let mark = self.nesting;
            self.descend(NESTED_COST)?;
            let operand = self.not_expr()?;
            self.nesting = mark;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            });
        }
        self.comparison()
    }

    fn compare_op(&self) -> Option<(CompareOp, usize)> {
        let op = match self.peek() {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::Lt => CompareOp::Lt,
            Token::LtEq => CompareOp::LtEq,
            Token::Gt => CompareOp::Gt,
            Token::GtEq => CompareOp::GtEq,
            Token::In => CompareOp::In,
            Token::Not if self.peek_at(1) == &Token::In => return Some((CompareOp::NotIn, 2)),
            _ => return None,
        };
        Some((op, 1))
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let left = self.additive()?;
        let Some((op, width)) = self.compare_op() else {
            return Ok(left);
        };
        for _ in 0..width {
            self.advance();
        }
        let right = self.additive()?;
        if self.compare_op().is_some() {
            return Err(self.error("chained comparisons are not supported"));
        }
        let line = left.line;
        Ok(Expr {
            kind: ExprKind::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            line,
        })
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.nesting;
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend(CHAIN_COST)?;
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
        self.nesting = mark;
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.nesting;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::DoubleSlash => BinaryOp::FloorDiv,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.descend(CHAIN_COST)?;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        self.nesting = mark;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        if matches!(self.peek(), Token::Minus | Token::Plus) {
            let mark = self.nesting;
            self.descend(NESTED_COST)?;
            let expr = self.prefixed();
            self.nesting = mark;
            return expr;
        }
        self.postfix()
    }

    fn prefixed(&mut self) -> Result<Expr, ScriptError> {
        match self.peek() {
            Token::Minus => {
                let line = self.advance().line;
                let operand = self.unary()?;
                Ok(Expr {
                    kind: ExprKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                    line,
                })
            }
            Token::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mark = self.nesting;
        let mut expr = self.primary()?;
        loop {
            let line = expr.line;
            if matches!(self.peek(), Token::LParen | Token::Dot | Token::LBracket) {
                self.descend(CHAIN_COST)?;
            }
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let args = self.arguments()?;
                    self.expect(&Token::RParen, "')'")?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    };
                }
                Token::Dot => {
                    self.advance();
                    let name = self.expect_ident("attribute name")?;
                    expr = Expr {
                        kind: ExprKind::Attr {
                            object: Box::new(expr),
                            name,
                        },
                        line,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    expr = self.subscript(expr)?;
                    self.expect(&Token::RBracket, "']'")?;
                }
                _ => break,
            }
        }
        self.nesting = mark;
        Ok(expr)
    }

    fn subscript(&mut self, object: Expr) -> Result<Expr, ScriptError> {
        let line = object.line;
        let start = if self.check(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if !self.accept(&Token::Colon) {
            let index = start.ok_or_else(|| self.error("expected index"))?;
            return Ok(Expr {
                kind: ExprKind::Index {
                    object: Box::new(object),
                    index,
                },
                line,
            });
        }
        let end = if self.check(&Token::RBracket) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        Ok(Expr {
            kind: ExprKind::Slice {
                object: Box::new(object),
                start,
                end,
            },
            line,
        })
    }

    fn arguments(&mut self) -> Result<Vec<Arg>, ScriptError> {
        // 0: positional, 1: after *spread, 2: keywords, 3: after **spread
        let mut phase = 0;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            let arg = if self.accept(&Token::DoubleStar) {
                if phase >= 3 {
                    return Err(self.error("only one '**' argument is allowed"));
                }
                phase = 3;
                Arg::KeywordSpread(self.expression()?)
            } else if self.accept(&Token::Star) {
                if phase >= 1 {
                    return Err(self.error("'*' argument must follow positional arguments"));
                }
                phase = 1;
                Arg::Spread(self.expression()?)
            } else if matches!(self.peek(), Token::Ident(_)) && self.peek_at(1) == &Token::Assign {
                if phase >= 3 {
                    return Err(self.error("keyword argument follows '**' argument"));
                }
                phase = 2;
                let name = self.expect_ident("keyword")?;
                self.advance();
                Arg::Keyword(name, self.expression()?)
            } else {
                if phase >= 1 {
                    return Err(self.error("positional argument follows keyword or spread argument"));
                }
                Arg::Positional(self.expression()?)
            };
            args.push(arg);
            if !self.accept(&Token::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let spanned = self.current().clone();
        let line = spanned.line;
        let kind = match spanned.token {
            Token::Int(value) => {
                self.advance();
                ExprKind::Literal(Literal::Int(value))
            }
            Token::Float(value) => {
                self.advance();
                ExprKind::Literal(Literal::Float(value))
            }
            Token::Str(value) => {
                self.advance();
                let mut value = value;
                // adjacent literals concatenate
                while let Token::Str(more) = self.peek().clone() {
                    self.advance();
                    value.push_str(&more);
                }
                ExprKind::Literal(Literal::Str(value))
            }
            Token::True => {
                self.advance();
                ExprKind::Literal(Literal::Bool(true))
            }
            Token::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(false))
            }
            Token::None => {
                self.advance();
                ExprKind::Literal(Literal::None)
            }
            Token::Ident(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.expression()?);
                    if !self.accept(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                ExprKind::List(items)
            }
            Token::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                self.skip_newlines();
                while !self.check(&Token::RBrace) {
                    let key = self.expression()?;
                    self.skip_newlines();
                    self.expect(&Token::Colon, "':'")?;
                    self.skip_newlines();
                    let value = self.expression()?;
                    self.skip_newlines();
                    entries.push((key, value));
                    if !self.accept(&Token::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&Token::RBrace, "'}'")?;
                ExprKind::Dict(entries)
            }
            _ => return Err(self.error("expected expression")),
        };
        Ok(Expr { kind, line })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let line = left.line;
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{}'", name),
        Token::Int(value) => format!("'{}'", value),
        Token::Float(value) => format!("'{}'", value),
        Token::Str(_) => "string literal".to_string(),
        Token::Newline => "end of line".to_string(),
        Token::Eof => "end of file".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

/// Parse a whole template source file
pub fn parse(file: &str, source: &str) -> Result<Program, ScriptError> {
    debug!(%file, len = source.len(), "parse: called");
    let tokens = tokenize(file, source)?;
    Parser::new(file, source, tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse("test.sf", source).unwrap()
    }

    fn parse_err(source: &str) -> ScriptError {
        parse("test.sf", source).unwrap_err()
    }

    #[test]
    fn test_generator_detection() {
        let program = parse_ok("def main(**kwargs) {\n  yield 'x'\n}\ndef helper() {\n  return 1\n}");
        let StmtKind::Def(main) = &program.body[0].kind else {
            panic!("expected def");
        };
        let StmtKind::Def(helper) = &program.body[1].kind else {
            panic!("expected def");
        };
        assert!(main.is_generator);
        assert!(!helper.is_generator);
    }

    #[test]
    fn test_nested_yield_does_not_mark_outer() {
        let program = parse_ok("def outer() {\n  def inner() { yield 1 }\n  return inner\n}");
        let StmtKind::Def(outer) = &program.body[0].kind else {
            panic!("expected def");
        };
        assert!(!outer.is_generator);
    }

    #[test]
    fn test_params() {
        let program = parse_ok("def f(a, b=2, *rest, **kw) { pass }");
        let StmtKind::Def(f) = &program.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(f.params.len(), 4);
        assert!(matches!(f.params[0], Param::Required(_)));
        assert!(matches!(f.params[1], Param::Optional(_, _)));
        assert!(matches!(f.params[2], Param::Rest(_)));
        assert!(matches!(f.params[3], Param::Keywords(_)));
    }

    #[test]
    fn test_if_elif_else_across_lines() {
        let program = parse_ok("if a {\n  x = 1\n}\nelif b {\n  x = 2\n}\nelse {\n  x = 3\n}");
        assert_eq!(program.body.len(), 1);
        let StmtKind::If { branches, orelse } = &program.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(orelse.is_some());
    }

    #[test]
    fn test_imports() {
        let program = parse_ok("import util.strings as s\nfrom helpers import a, b as c");
        assert_eq!(
            program.body[0].kind,
            StmtKind::Import {
                module: "util.strings".into(),
                alias: Some("s".into())
            }
        );
        assert_eq!(
            program.body[1].kind,
            StmtKind::FromImport {
                module: "helpers".into(),
                names: vec![("a".into(), None), ("b".into(), Some("c".into()))]
            }
        );
    }

    #[test]
    fn test_dict_literal_spanning_lines() {
        let program = parse_ok("d = {\n  'a': 1,\n  'b': [1, 2],\n}");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(&value.kind, ExprKind::Dict(entries) if entries.len() == 2));
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("x = 1 + 2 * 3");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_call_argument_order() {
        assert!(parse("t.sf", "f(a, *b, k=1, **c)").is_ok());
        assert!(parse_err("f(k=1, a)").message.contains("positional argument follows"));
    }

    #[test]
    fn test_yield_outside_function() {
        assert!(parse_err("yield 1").message.contains("'yield' outside function"));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(parse_err("def f() { break }").message.contains("outside loop"));
    }

    #[test]
    fn test_missing_brace_reports_position() {
        let err = parse_err("def main() {\n  yield 1\n");
        assert_eq!(err.kind, super::super::error::ErrorKind::Syntax);
        assert!(err.message.contains("expected '}'"));
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let parens = format!("x = {}1{}", "(".repeat(3000), ")".repeat(3000));
        let err = parse_err(&parens);
        assert_eq!(err.kind, super::super::error::ErrorKind::Syntax);
        assert!(err.message.contains("too deeply nested"));

        let lists = format!("x = {}{}", "[".repeat(3000), "]".repeat(3000));
        assert!(parse_err(&lists).message.contains("too deeply nested"));
        assert!(parse_err(&format!("x = {}1", "-".repeat(3000))).message.contains("too deeply nested"));
        assert!(parse_err(&format!("x = {}1", "not ".repeat(3000))).message.contains("too deeply nested"));
        let sum = vec!["1"; 3000].join(" + ");
        assert!(parse_err(&format!("x = {}", sum)).message.contains("too deeply nested"));

        let mut blocks = String::new();
        for _ in 0..3000 {
            blocks.push_str("if x {\n");
        }
        assert!(parse_err(&blocks).message.contains("too deeply nested"));
    }

    #[test]
    fn test_moderate_nesting_parses() {
        parse_ok(&format!("x = {}1{}", "(".repeat(50), ")".repeat(50)));
        parse_ok(&format!("x = {}", vec!["'a'"; 200].join(" + ")));
        parse_ok("x = a.b.c(1)[2].d(e=[f(g(h))], **k)");
    }

    #[test]
    fn test_assignment_to_call_rejected() {
        assert!(parse_err("f() = 1").message.contains("cannot assign"));
    }

    #[test]
    fn test_slice_and_conditional() {
        let program = parse_ok("x = items[1:] if items else []");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Conditional { then, .. } = &value.kind else {
            panic!("expected conditional");
        };
        assert!(matches!(then.kind, ExprKind::Slice { end: None, .. }));
    }
}
