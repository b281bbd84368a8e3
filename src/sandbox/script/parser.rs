//! Recursive-descent parser for the sandbox scripting language.
use std::rc::Rc;

use super::ast::*;
use super::lexer::{tokenize, Tok, Token};
use super::SyntaxError;

/// Deepest bracket/block nesting accepted before parsing is refused.
const MAX_NESTING: usize = 100;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const UNSUPPORTED: &[&str] = &["class", "with", "global", "nonlocal", "yield", "async", "await"];

pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parses a standalone expression (used for f-string fields).
pub fn parse_expression(source: &str, line: usize) -> Result<Expr, SyntaxError> {
    let mut tokens = tokenize(source.trim()).map_err(|e| SyntaxError { line, ..e })?;
    for t in &mut tokens {
        t.line = line;
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.expr_list()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(parser.error("unexpected token in f-string expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
        }
    }

    // ── Token helpers ─────────────────────────────────────

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_next(&self) -> &Tok {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SyntaxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn identifier(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{n}'"),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
            Tok::Op(o) => format!("'{o}'"),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        SyntaxError {
            message: format!("{} (found {found})", message.into()),
            line: self.line(),
        }
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("code is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    // ── Statements ────────────────────────────────────────

    /// One logical line; may yield several statements when `;` is used.
    fn statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let line = self.line();
        if let Tok::Name(kw) = self.peek().clone() {
            if UNSUPPORTED.contains(&kw.as_str()) {
                return Err(self.error(format!("'{kw}' statements are not supported")));
            }
            let compound = match kw.as_str() {
                "if" => Some(self.if_statement()?),
                "while" => Some(self.while_statement()?),
                "for" => Some(self.for_statement()?),
                "def" => Some(self.def_statement()?),
                "try" => Some(self.try_statement()?),
                _ => None,
            };
            if let Some(kind) = compound {
                return Ok(vec![Stmt { line, kind }]);
            }
        }
        self.simple_statements()
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut out = Vec::new();
        loop {
            let line = self.line();
            let kind = self.simple_statement()?;
            out.push(Stmt { line, kind });
            if self.eat_op(";") {
                if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) && !self.at(&Tok::Dedent) {
            return Err(self.error("expected end of statement"));
        }
        Ok(out)
    }

    fn simple_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        if let Tok::Name(kw) = self.peek().clone() {
            match kw.as_str() {
                "pass" => {
                    self.advance();
                    return Ok(StmtKind::Pass);
                }
                "break" => {
                    self.advance();
                    return Ok(StmtKind::Break);
                }
                "continue" => {
                    self.advance();
                    return Ok(StmtKind::Continue);
                }
                "return" => {
                    self.advance();
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.expr_list()?)
                    };
                    return Ok(StmtKind::Return(value));
                }
                "raise" => {
                    self.advance();
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    if self.eat_keyword("from") {
                        self.expr()?;
                    }
                    return Ok(StmtKind::Raise(value));
                }
                "assert" => {
                    self.advance();
                    let cond = self.expr()?;
                    let msg = if self.eat_op(",") { Some(self.expr()?) } else { None };
                    return Ok(StmtKind::Assert(cond, msg));
                }
                "del" => {
                    self.advance();
                    let mut targets = Vec::new();
                    loop {
                        let e = self.or_expr()?;
                        targets.push(self.to_target(e)?);
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    return Ok(StmtKind::Del(targets));
                }
                "import" => {
                    self.advance();
                    let mut aliases = Vec::new();
                    loop {
                        let name = self.dotted_name()?;
                        let asname = if self.eat_keyword("as") { Some(self.identifier()?) } else { None };
                        aliases.push(Alias { name, asname });
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    return Ok(StmtKind::Import(aliases));
                }
                "from" => {
                    self.advance();
                    let module = self.dotted_name()?;
                    self.expect_keyword("import")?;
                    if self.at_op("*") {
                        return Err(self.error("wildcard imports are not supported"));
                    }
                    let parens = self.eat_op("(");
                    let mut aliases = Vec::new();
                    loop {
                        let name = self.identifier()?;
                        let asname = if self.eat_keyword("as") { Some(self.identifier()?) } else { None };
                        aliases.push(Alias { name, asname });
                        if !self.eat_op(",") || (parens && self.at_op(")")) {
                            break;
                        }
                    }
                    if parens {
                        self.expect_op(")")?;
                    }
                    return Ok(StmtKind::FromImport(module, aliases));
                }
                _ => {}
            }
        }

        let first = self.expr_list()?;

        if let Tok::Op(op) = self.peek().clone() {
            let aug = match op {
                "+=" => Some(BinOp::Add),
                "-=" => Some(BinOp::Sub),
                "*=" => Some(BinOp::Mul),
                "/=" => Some(BinOp::Div),
                "//=" => Some(BinOp::FloorDiv),
                "%=" => Some(BinOp::Mod),
                "**=" => Some(BinOp::Pow),
                _ => None,
            };
            if let Some(bin) = aug {
                self.advance();
                let target = self.to_target(first)?;
                if matches!(target, Target::Tuple(_)) {
                    return Err(self.error("illegal target for augmented assignment"));
                }
                let value = self.expr_list()?;
                return Ok(StmtKind::AugAssign(target, bin, value));
            }
        }

        if self.at_op("=") {
            let mut targets = vec![self.to_target(first)?];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = self.expr_list()?;
                if self.at_op("=") {
                    targets.push(self.to_target(value)?);
                } else {
                    break;
                }
            }
            return Ok(StmtKind::Assign(targets, value));
        }

        Ok(StmtKind::Expr(first))
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) || self.at_op(";")
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.identifier()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.enter()?;
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        self.leave();
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut orelse = None;
        loop {
            if self.eat_keyword("elif") {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If(branches, orelse))
    }

    fn while_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_keyword("while")?;
        let cond = self.expr()?;
        let body = self.block()?;
        Ok(StmtKind::While(cond, body))
    }

    fn for_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        Ok(StmtKind::For(target, iter, body))
    }

    fn def_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_keyword("def")?;
        let name = self.identifier()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expr()?;
        }
        let body = self.block()?;
        Ok(StmtKind::Def(Rc::new(FuncDef { name, params, body })))
    }

    fn params(&mut self, close: &str) -> Result<Vec<Param>, SyntaxError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(close) {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error("variadic parameters are not supported"));
            }
            let name = self.identifier()?;
            if close == ")" && self.eat_op(":") {
                self.expr()?;
            }
            let default = if self.eat_op("=") { Some(self.expr()?) } else { None };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default parameter follows default parameter"));
            }
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!("duplicate parameter '{name}'")));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_keyword("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let mut kinds = Vec::new();
            let mut binding = None;
            if !self.at_op(":") {
                if self.eat_op("(") {
                    loop {
                        kinds.push(self.identifier()?);
                        if !self.eat_op(",") || self.at_op(")") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    kinds.push(self.identifier()?);
                }
                if self.eat_keyword("as") {
                    binding = Some(self.identifier()?);
                }
            }
            let body = self.block()?;
            handlers.push(Handler { kinds, binding, body });
        }
        let orelse = if !handlers.is_empty() && self.eat_keyword("else") {
            Some(self.block()?)
        } else {
            None
        };
        let finally = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handlers.is_empty() && finally.is_none() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finally,
        })
    }

    fn target_list(&mut self) -> Result<Target, SyntaxError> {
        let mut items = Vec::new();
        let trailing_comma = loop {
            let e = self.arith()?;
            items.push(self.to_target(e)?);
            if !self.eat_op(",") {
                break false;
            }
            if self.at_keyword("in") {
                break true;
            }
        };
        if items.len() == 1 && !trailing_comma {
            Ok(items.remove(0))
        } else {
            Ok(Target::Tuple(items))
        }
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SyntaxError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index(obj, idx) => Ok(Target::Index(*obj, *idx)),
            Expr::Attr(obj, name) => Ok(Target::Attr(*obj, name)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    // ── Expressions ───────────────────────────────────────

    /// Comma-separated expressions; more than one (or a trailing comma) makes a tuple.
    fn expr_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_statement_end() || self.at_op("=") || self.at_op(")") {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let result = if self.at_keyword("lambda") {
            self.lambda()
        } else {
            self.ternary()
        };
        self.leave();
        result
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.expect_keyword("lambda")?;
        let params = self.params(":")?;
        self.expect_op(":")?;
        let body = self.expr()?;
        Ok(Expr::Lambda(Rc::new(FuncDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
        })))
    }

    fn ternary(&mut self) -> Result<Expr, SyntaxError> {
        let then = self.or_expr()?;
        if self.at_keyword("if") {
            self.advance();
            let cond = self.or_expr()?;
            self.expect_keyword("else")?;
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.not_expr();
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_next(), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Name(n) if n == "not" && matches!(self.peek_next(), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.factor();
            self.leave();
            return Ok(Expr::Unary(op, Box::new(operand?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.factor();
            self.leave();
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent?)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error("expected attribute name")),
                };
                expr = Expr::Attr(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call(&mut self, func: Expr) -> Result<Expr, SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }
            if let (Tok::Name(name), Tok::Op("=")) = (self.peek().clone(), self.peek_next().clone()) {
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expr()?;
                if self.at_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    args.push(Expr::ListComp(Box::new(arg), clauses));
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, SyntaxError> {
        let lower = if self.at_op(":") { None } else { Some(self.expr_list()?) };
        if !self.eat_op(":") {
            self.expect_op("]")?;
            let index = lower.ok_or_else(|| self.error("empty subscript"))?;
            return Ok(Expr::Index(Box::new(target), Box::new(index)));
        }
        let upper = if self.at_op("]") || self.at_op(":") { None } else { Some(Box::new(self.expr()?)) };
        let step = if self.eat_op(":") && !self.at_op("]") { Some(Box::new(self.expr()?)) } else { None };
        self.expect_op("]")?;
        Ok(Expr::Slice {
            target: Box::new(target),
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SyntaxError> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_expr()?;
            let mut conds = Vec::new();
            while self.eat_keyword("if") {
                conds.push(self.or_expr()?);
            }
            clauses.push(Comprehension { target, iter, conds });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Tok::Str(s) => {
                let mut s = s;
                // Adjacent literals concatenate.
                while let Tok::Str(next) = self.peek().clone() {
                    self.advance();
                    s.push_str(&next);
                }
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Tok::FStr(raw) => Ok(Expr::FString(parse_fstring(&raw, line)?)),
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Literal(Literal::None)),
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                n if KEYWORDS.contains(&n) => {
                    self.pos -= 1;
                    Err(self.error("invalid syntax"))
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => {
                self.enter()?;
                let result = self.paren();
                self.leave();
                result
            }
            Tok::Op("[") => {
                self.enter()?;
                let result = self.list_display();
                self.leave();
                result
            }
            Tok::Op("{") => {
                self.enter()?;
                let result = self.dict_display();
                self.leave();
                result
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("invalid syntax"))
            }
        }
    }

    fn paren(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expr()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::ListComp(Box::new(first), clauses));
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expr()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp(Box::new(first), clauses));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.expr()?;
        if !self.eat_op(":") {
            return self.set_display(key);
        }
        let value = self.expr()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::DictComp(Box::new(key), Box::new(value), clauses));
        }
        let mut entries = vec![(key, value)];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            let k = self.expr()?;
            self.expect_op(":")?;
            let v = self.expr()?;
            entries.push((k, v));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }

    fn set_display(&mut self, first: Expr) -> Result<Expr, SyntaxError> {
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::SetComp(Box::new(first), clauses));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(items))
    }
}

/// Splits raw f-string text into literal runs and `{expr[!r][:spec]}` fields.
fn parse_fstring(raw: &str, line: usize) -> Result<Vec<FPart>, SyntaxError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    let err = |message: &str| SyntaxError {
        message: format!("f-string: {message}"),
        line,
    };

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            lit.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            lit.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(err("single '}' is not allowed"));
        }
        if c != '{' {
            lit.push(c);
            i += 1;
            continue;
        }

        // Field: find the end of the expression, respecting nesting and quotes.
        i += 1;
        let start = i;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut expr_end = None;
        let mut conversion = None;
        let mut spec = None;
        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                    expr_end.get_or_insert(i);
                    conversion = chars.get(i + 1).copied();
                    i += 2;
                    continue;
                }
                ':' if depth == 0 => {
                    expr_end.get_or_insert(i);
                    let spec_start = i + 1;
                    let mut j = spec_start;
                    while j < chars.len() && chars[j] != '}' {
                        j += 1;
                    }
                    spec = Some(chars[spec_start..j].iter().collect::<String>());
                    i = j;
                    continue;
                }
                '}' => break,
                _ => {}
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(err("expecting '}'"));
        }
        let end = expr_end.unwrap_or(i);
        let source: String = chars[start..end].iter().collect();
        if source.trim().is_empty() {
            return Err(err("empty expression not allowed"));
        }
        let mut expr = parse_expression(&source, line)?;
        match conversion {
            None | Some('s') => {}
            Some('r') => {
                expr = Expr::Call {
                    func: Box::new(Expr::Name("repr".to_string())),
                    args: vec![expr],
                    kwargs: Vec::new(),
                };
            }
            Some(other) => return Err(err(&format!("invalid conversion character '{other}'"))),
        }
        if !lit.is_empty() {
            parts.push(FPart::Lit(std::mem::take(&mut lit)));
        }
        parts.push(FPart::Expr(expr, spec));
        i += 1;
    }
    if !lit.is_empty() {
        parts.push(FPart::Lit(lit));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_program(source).unwrap().body
    }

    fn single_expr(source: &str) -> Expr {
        match &parse(source)[0].kind {
            StmtKind::Expr(e) => e.clone(),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let e = single_expr("-2 ** 2");
        match e {
            Expr::Unary(UnaryOp::Neg, inner) => {
                assert!(matches!(*inner, Expr::Binary(BinOp::Pow, _, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_semicolon_separated_statements() {
        let body = parse("import os; os.system(\"ls\")");
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[0].kind, StmtKind::Import(a) if a[0].name == "os"));
    }

    #[test]
    fn test_chained_assignment_and_tuple_unpacking() {
        let body = parse("a = b = 1\nx, y = y, x");
        assert!(matches!(&body[0].kind, StmtKind::Assign(t, _) if t.len() == 2));
        assert!(matches!(&body[1].kind, StmtKind::Assign(t, Expr::Tuple(_)) if matches!(t[0], Target::Tuple(_))));
    }

    #[test]
    fn test_if_elif_else() {
        let body = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &body[0].kind {
            StmtKind::If(branches, orelse) => {
                assert_eq!(branches.len(), 2);
                assert!(orelse.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_for_with_tuple_target() {
        let body = parse("for k, v in d.items():\n    pass\n");
        assert!(matches!(&body[0].kind, StmtKind::For(Target::Tuple(t), _, _) if t.len() == 2));
        let body = parse("for k, in pairs:\n    pass\nfor k in keys:\n    pass\n");
        assert!(matches!(&body[0].kind, StmtKind::For(Target::Tuple(t), _, _) if t.len() == 1));
        assert!(matches!(&body[1].kind, StmtKind::For(Target::Name(n), _, _) if n == "k"));
    }

    #[test]
    fn test_def_with_defaults() {
        let body = parse("def f(a, b=2):\n    return a + b\n");
        match &body[0].kind {
            StmtKind::Def(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[1].default.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_list_comprehension_with_condition() {
        let e = single_expr("[d for d in data if d > 1]");
        assert!(matches!(e, Expr::ListComp(_, ref c) if c[0].conds.len() == 1));
    }

    #[test]
    fn test_generator_argument_becomes_comprehension() {
        let e = single_expr("sum(x * 2 for x in xs)");
        match e {
            Expr::Call { args, .. } => assert!(matches!(args[0], Expr::ListComp(_, _))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_displays() {
        assert!(matches!(single_expr("{1, 2,}"), Expr::Set(ref items) if items.len() == 2));
        assert!(matches!(single_expr("{x for x in y}"), Expr::SetComp(..)));
        assert!(matches!(single_expr("{}"), Expr::Dict(ref entries) if entries.is_empty()));
    }

    #[test]
    fn test_ternary_and_lambda() {
        assert!(matches!(single_expr("a if c else b"), Expr::IfElse { .. }));
        assert!(matches!(single_expr("lambda x: x + 1"), Expr::Lambda(_)));
    }

    #[test]
    fn test_slices() {
        assert!(matches!(single_expr("x[1:]"), Expr::Slice { upper: None, .. }));
        assert!(matches!(single_expr("x[::2]"), Expr::Slice { lower: None, step: Some(_), .. }));
    }

    #[test]
    fn test_not_in_and_is_not() {
        match single_expr("a not in b") {
            Expr::Compare(_, ops) => assert_eq!(ops[0].0, CmpOp::NotIn),
            other => panic!("unexpected {other:?}"),
        }
        match single_expr("a is not None") {
            Expr::Compare(_, ops) => assert_eq!(ops[0].0, CmpOp::IsNot),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_try_except_finally() {
        let body = parse(
            "try:\n    x = 1\nexcept (ValueError, KeyError) as e:\n    x = 2\nfinally:\n    y = 3\n",
        );
        match &body[0].kind {
            StmtKind::Try { handlers, finally, .. } => {
                assert_eq!(handlers[0].kinds, vec!["ValueError", "KeyError"]);
                assert_eq!(handlers[0].binding.as_deref(), Some("e"));
                assert!(finally.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fstring_parts() {
        match single_expr("f'total: {n:.2f} for {name!r}'") {
            Expr::FString(parts) => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[1], FPart::Expr(_, Some(spec)) if spec == ".2f"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_statements_rejected() {
        let err = parse_program("class A:\n    pass\n").unwrap_err();
        assert!(err.message.contains("'class'"));
        assert!(parse_program("with open('x') as f:\n    pass\n").is_err());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let source = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_program(&source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse_program("1 = x").is_err());
        assert!(parse_program("f() = 3").is_err());
    }

    #[test]
    fn test_error_reports_line() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert!(err.line >= 2);
    }

    #[test]
    fn test_line_numbers_on_statements() {
        let body = parse("x = 1\n\n\ny = 2\n");
        assert_eq!(body[0].line, 1);
        assert_eq!(body[1].line, 4);
    }
}
