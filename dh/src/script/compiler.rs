//! Syntax tree -> bytecode

use std::rc::Rc;

use tracing::debug;

use super::ast::*;
use super::code::{CallShape, Code, Constant, FunctionProto, Op, ParamKind, ParamSpec, Source};
use super::error::ScriptError;
use super::parser::parse;

struct LoopLabels {
    start: usize,
    breaks: Vec<usize>,
    is_for: bool,
}

struct Compiler {
    name: Rc<str>,
    source: Rc<Source>,
    ops: Vec<Op>,
    lines: Vec<u32>,
    line: u32,
    loops: Vec<LoopLabels>,
}

impl Compiler {
    fn new(name: &str, source: Rc<Source>) -> Self {
        Self {
            name: name.into(),
            source,
            ops: Vec::new(),
            lines: Vec::new(),
            line: 1,
            loops: Vec::new(),
        }
    }

    fn finish(mut self) -> Code {
        self.emit(Op::Const(Constant::None));
        self.emit(Op::Return);
        Code {
            name: self.name,
            ops: self.ops,
            lines: self.lines,
            source: self.source,
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.lines.push(self.line);
        self.ops.len() - 1
    }

    fn here(&self) -> usize {
        self.ops.len()
    }

    /// Point the jump at `at` to the current position
    fn patch(&mut self, at: usize) {
        let target = self.here();
        match &mut self.ops[at] {
            Op::Jump(t)
            | Op::PopJumpIfFalse(t)
            | Op::JumpIfFalseOrPop(t)
            | Op::JumpIfTrueOrPop(t)
            | Op::ForIter(t) => *t = target,
            _ => {}
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &Stmt) {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expression(expr);
                self.emit(Op::Pop);
            }
            StmtKind::Assign { target, value } => self.assign(target, value),
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::Def(def) => self.function(def),
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.expression(expr),
                    None => {
                        self.emit(Op::Const(Constant::None));
                    }
                }
                self.emit(Op::Return);
            }
            StmtKind::Yield(expr) => {
                self.expression(expr);
                self.emit(Op::Yield);
            }
            StmtKind::If { branches, orelse } => {
                let mut exits = Vec::new();
                for (test, body) in branches {
                    self.expression(test);
                    let skip = self.emit(Op::PopJumpIfFalse(0));
                    self.block(body);
                    exits.push(self.emit(Op::Jump(0)));
                    self.patch(skip);
                }
                if let Some(body) = orelse {
                    self.block(body);
                }
                for exit in exits {
                    self.patch(exit);
                }
            }
            StmtKind::While { test, body } => {
                let start = self.here();
                self.expression(test);
                let exit = self.emit(Op::PopJumpIfFalse(0));
                self.loops.push(LoopLabels {
                    start,
                    breaks: Vec::new(),
                    is_for: false,
                });
                self.block(body);
                self.emit(Op::Jump(start));
                self.patch(exit);
                self.close_loop();
            }
            StmtKind::For { targets, iter, body } => {
                self.expression(iter);
                self.emit(Op::GetIter);
                let start = self.here();
                let exit = self.emit(Op::ForIter(0));
                if targets.len() == 1 {
                    self.emit(Op::Store(targets[0].as_str().into()));
                } else {
                    self.emit(Op::Unpack(targets.len()));
                    for target in targets {
                        self.emit(Op::Store(target.as_str().into()));
                    }
                }
                self.loops.push(LoopLabels {
                    start,
                    breaks: Vec::new(),
                    is_for: true,
                });
                self.block(body);
                self.emit(Op::Jump(start));
                self.patch(exit);
                self.close_loop();
            }
            StmtKind::Break => {
                let is_for = self.loops.last().map(|l| l.is_for).unwrap_or(false);
                if is_for {
                    self.emit(Op::Pop);
                }
                let jump = self.emit(Op::Jump(0));
                if let Some(labels) = self.loops.last_mut() {
                    labels.breaks.push(jump);
                }
            }
            StmtKind::Continue => {
                let start = self.loops.last().map(|l| l.start).unwrap_or(0);
                self.emit(Op::Jump(start));
            }
            StmtKind::Pass => {}
            StmtKind::Import { module, alias } => {
                let bind = alias
                    .as_deref()
                    .unwrap_or_else(|| module.rsplit('.').next().unwrap_or(module));
                self.emit(Op::Import(module.as_str().into()));
                self.emit(Op::Store(bind.into()));
            }
            StmtKind::FromImport { module, names } => {
                let module: Rc<str> = module.as_str().into();
                for (name, alias) in names {
                    self.emit(Op::ImportFrom {
                        module: module.clone(),
                        name: name.as_str().into(),
                    });
                    self.emit(Op::Store(alias.as_deref().unwrap_or(name).into()));
                }
            }
            StmtKind::Raise(expr) => {
                self.expression(expr);
                self.emit(Op::Raise);
            }
            StmtKind::Assert { test, message } => {
                self.expression(test);
                if let Some(message) = message {
                    self.expression(message);
                }
                self.emit(Op::Assert {
                    has_message: message.is_some(),
                });
            }
        }
    }

    fn close_loop(&mut self) {
        if let Some(labels) = self.loops.pop() {
            for jump in labels.breaks {
                self.patch(jump);
            }
        }
    }

    fn assign(&mut self, target: &Target, value: &Expr) {
        match target {
            Target::Name(name) => {
                self.expression(value);
                self.emit(Op::Store(name.as_str().into()));
            }
            Target::Index { object, index } => {
                self.expression(object);
                self.expression(index);
                self.expression(value);
                self.emit(Op::StoreIndex);
            }
            Target::Attr { object, name } => {
                self.expression(object);
                self.expression(value);
                self.emit(Op::StoreAttr(name.as_str().into()));
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinaryOp, value: &Expr) {
        match target {
            Target::Name(name) => {
                self.emit(Op::Load(name.as_str().into()));
                self.expression(value);
                self.emit(Op::Binary(op));
                self.emit(Op::Store(name.as_str().into()));
            }
            Target::Index { object, index } => {
                self.expression(object);
                self.expression(index);
                self.emit(Op::Dup2);
                self.emit(Op::LoadIndex);
                self.expression(value);
                self.emit(Op::Binary(op));
                self.emit(Op::StoreIndex);
            }
            Target::Attr { object, name } => {
                self.expression(object);
                self.emit(Op::Dup);
                self.emit(Op::LoadAttr(name.as_str().into()));
                self.expression(value);
                self.emit(Op::Binary(op));
                self.emit(Op::StoreAttr(name.as_str().into()));
            }
        }
    }

    fn function(&mut self, def: &FunctionDef) {
        let mut params = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let kind = match param {
                Param::Required(_) => ParamKind::Required,
                Param::Optional(_, default) => {
                    self.expression(default);
                    ParamKind::Optional
                }
                Param::Rest(_) => ParamKind::Rest,
                Param::Keywords(_) => ParamKind::Keywords,
            };
            params.push(ParamSpec {
                name: param.name().into(),
                kind,
            });
        }

        let mut inner = Compiler::new(&def.name, self.source.clone());
        inner.line = def.line;
        inner.block(&def.body);
        let proto = FunctionProto {
            name: def.name.as_str().into(),
            params,
            code: Rc::new(inner.finish()),
            is_generator: def.is_generator,
        };

        self.line = def.line;
        self.emit(Op::MakeFunction(Rc::new(proto)));
        self.emit(Op::Store(def.name.as_str().into()));
    }

    fn expression(&mut self, expr: &Expr) {
        self.line = expr.line;
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let constant = match literal {
                    Literal::None => Constant::None,
                    Literal::Bool(b) => Constant::Bool(*b),
                    Literal::Int(i) => Constant::Int(*i),
                    Literal::Float(f) => Constant::Float(*f),
                    Literal::Str(s) => Constant::Str(s.as_str().into()),
                };
                self.emit(Op::Const(constant));
            }
            ExprKind::Name(name) => {
                self.emit(Op::Load(name.as_str().into()));
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expression(item);
                }
                self.emit(Op::BuildList(items.len()));
            }
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    self.expression(key);
                    self.expression(value);
                }
                self.emit(Op::BuildDict(entries.len()));
            }
            ExprKind::Attr { object, name } => {
                self.expression(object);
                self.line = expr.line;
                self.emit(Op::LoadAttr(name.as_str().into()));
            }
            ExprKind::Index { object, index } => {
                self.expression(object);
                self.expression(index);
                self.line = expr.line;
                self.emit(Op::LoadIndex);
            }
            ExprKind::Slice { object, start, end } => {
                self.expression(object);
                for bound in [start, end] {
                    match bound {
                        Some(bound) => self.expression(bound),
                        None => {
                            self.emit(Op::Const(Constant::None));
                        }
                    }
                }
                self.line = expr.line;
                self.emit(Op::Slice);
            }
            ExprKind::Call { callee, args } => {
                self.expression(callee);
                let mut shape = CallShape {
                    positional: 0,
                    spread: false,
                    keywords: Vec::new(),
                    keyword_spread: false,
                };
                for arg in args {
                    match arg {
                        Arg::Positional(value) => {
                            self.expression(value);
                            shape.positional += 1;
                        }
                        Arg::Spread(value) => {
                            self.expression(value);
                            shape.spread = true;
                        }
                        Arg::Keyword(name, value) => {
                            self.expression(value);
                            shape.keywords.push(name.as_str().into());
                        }
                        Arg::KeywordSpread(value) => {
                            self.expression(value);
                            shape.keyword_spread = true;
                        }
                    }
                }
                self.line = expr.line;
                self.emit(Op::Call(Rc::new(shape)));
            }
            ExprKind::Unary { op, operand } => {
                self.expression(operand);
                self.emit(Op::Unary(*op));
            }
            ExprKind::Binary { op, left, right } => {
                self.expression(left);
                self.expression(right);
                self.line = expr.line;
                self.emit(Op::Binary(*op));
            }
            ExprKind::Compare { op, left, right } => {
                self.expression(left);
                self.expression(right);
                self.line = expr.line;
                self.emit(Op::Compare(*op));
            }
            ExprKind::And(left, right) => {
                self.expression(left);
                let end = self.emit(Op::JumpIfFalseOrPop(0));
                self.expression(right);
                self.patch(end);
            }
            ExprKind::Or(left, right) => {
                self.expression(left);
                let end = self.emit(Op::JumpIfTrueOrPop(0));
                self.expression(right);
                self.patch(end);
            }
            ExprKind::Conditional { test, then, orelse } => {
                self.expression(test);
                let skip = self.emit(Op::PopJumpIfFalse(0));
                self.expression(then);
                let end = self.emit(Op::Jump(0));
                self.patch(skip);
                self.expression(orelse);
                self.patch(end);
            }
        }
    }
}

/// Compile a parsed program into module code
pub fn compile_program(program: &Program, source: Rc<Source>) -> Code {
    let mut compiler = Compiler::new("<module>", source);
    compiler.block(&program.body);
    compiler.finish()
}

/// Parse and compile a template source file
pub fn compile(file: &str, text: &str) -> Result<Rc<Code>, ScriptError> {
    debug!(%file, "compile: called");
    let program = parse(file, text)?;
    let source = Rc::new(Source::new(file, text));
    Ok(Rc::new(compile_program(&program, source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_code_ends_with_return() {
        let code = compile("t.sf", "x = 1").unwrap();
        assert!(matches!(code.ops.last(), Some(Op::Return)));
        assert_eq!(&*code.name, "<module>");
    }

    #[test]
    fn test_lines_track_ops() {
        let code = compile("t.sf", "x = 1\n\ny = 2").unwrap();
        assert_eq!(code.ops.len(), code.lines.len());
        let store_y = code
            .ops
            .iter()
            .position(|op| matches!(op, Op::Store(name) if &**name == "y"))
            .unwrap();
        assert_eq!(code.line_at(store_y), 3);
    }

    #[test]
    fn test_def_makes_generator_proto() {
        let code = compile("t.sf", "def main() {\n  yield 'a'\n}").unwrap();
        let proto = code
            .ops
            .iter()
            .find_map(|op| match op {
                Op::MakeFunction(proto) => Some(proto.clone()),
                _ => None,
            })
            .unwrap();
        assert!(proto.is_generator);
        assert_eq!(&*proto.name, "main");
        assert!(proto.code.ops.iter().any(|op| matches!(op, Op::Yield)));
    }

    #[test]
    fn test_import_binds_last_segment() {
        let code = compile("t.sf", "import util.strings").unwrap();
        assert!(code.ops.iter().any(|op| matches!(op, Op::Store(name) if &**name == "strings")));
    }

    #[test]
    fn test_break_in_for_pops_iterator() {
        let code = compile("t.sf", "for x in y {\n  break\n}").unwrap();
        let pop_then_jump = code
            .ops
            .windows(2)
            .any(|w| matches!(w, [Op::Pop, Op::Jump(_)]));
        assert!(pop_then_jump);
    }

    #[test]
    fn test_jumps_are_patched() {
        let code = compile("t.sf", "if a { b = 1 } else { b = 2 }").unwrap();
        for op in &code.ops {
            if let Op::Jump(target) | Op::PopJumpIfFalse(target) = op {
                assert!(*target > 0 && *target <= code.ops.len());
            }
        }
    }
}
