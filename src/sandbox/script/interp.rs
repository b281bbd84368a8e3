//! Tree-walking evaluator.
//!
//! One `Interpreter` evaluates one program against one capability surface
//! and is discarded afterwards. Name resolution walks the lexical frame
//! chain, then the surface; anything else is a capability violation.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::*;
use super::builtins::EXCEPTIONS;
use super::methods;
use super::value::*;
use super::Fault;
use crate::sandbox::surface::{CapabilitySurface, BLOCKED_NAMES};
use crate::workspace::Workspace;

/// Deepest call nesting before `RecursionError`.
pub const MAX_CALL_DEPTH: usize = 200;

/// One lexical scope.
pub struct Frame {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn root() -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    fn child(parent: &Rc<Frame>) -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// What a finished (or failed) run leaves behind.
#[derive(Debug)]
pub struct RunOutput {
    pub result: Option<Value>,
    pub output: String,
    pub output_truncated: bool,
}

struct OutputBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn push(&mut self, s: &str) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.text.len());
        if s.len() <= room {
            self.text.push_str(s);
            return;
        }
        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&s[..cut]);
        self.truncated = true;
    }
}

enum CompOut<'a> {
    List(&'a Expr, Vec<Value>),
    Dict(&'a Expr, &'a Expr, Dict),
}

pub struct Interpreter {
    globals: Rc<Frame>,
    surface: CapabilitySurface,
    workspace: Option<Workspace>,
    output: OutputBuffer,
    memory_limit: Option<u64>,
    depth: usize,
    /// Exceptions currently being handled, innermost last.
    handling: Vec<Rc<Exception>>,
}

impl Interpreter {
    pub fn new(surface: CapabilitySurface) -> Self {
        Self {
            globals: Frame::root(),
            surface,
            workspace: None,
            output: OutputBuffer {
                text: String::new(),
                limit: 64 * 1024,
                truncated: false,
            },
            memory_limit: None,
            depth: 0,
            handling: Vec::new(),
        }
    }

    pub fn with_workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output.limit = bytes;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Pre-binds a variable in the global scope.
    pub fn bind(&mut self, name: &str, value: Value) {
        self.globals.set(name, value);
    }

    pub fn run(&mut self, program: &Program) -> Result<(), Fault> {
        let globals = self.globals.clone();
        match self.exec_block(&globals, &program.body)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(Fault::raised("SyntaxError", "'return' outside function")),
            Flow::Break | Flow::Continue => {
                Err(Fault::raised("SyntaxError", "'break' or 'continue' outside loop"))
            }
        }
    }

    /// Consumes the interpreter, yielding the `result` binding and captured output.
    pub fn finish(self) -> RunOutput {
        RunOutput {
            result: self.globals.lookup("result"),
            output: self.output.text,
            output_truncated: self.output.truncated,
        }
    }

    pub fn print(&mut self, text: &str) {
        self.output.push(text);
    }

    pub fn workspace(&self) -> Result<&Workspace, Fault> {
        self.workspace
            .as_ref()
            .ok_or_else(|| Fault::Capability("workspace access is not available".to_string()))
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.surface.builtin(name)
    }

    /// Refuses allocations that could never fit under the memory ceiling.
    pub fn check_alloc(&self, bytes: u64) -> Result<(), Fault> {
        match self.memory_limit {
            Some(limit) if bytes > limit => Err(Fault::Memory(format!(
                "allocation of {bytes} bytes exceeds the memory limit"
            ))),
            _ => Ok(()),
        }
    }

    // ── Statements ────────────────────────────────────────

    fn exec_block(&mut self, frame: &Rc<Frame>, body: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in body {
            match self.exec(frame, stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, frame: &Rc<Frame>, stmt: &Stmt) -> Result<Flow, Fault> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(frame, e)?;
            }
            StmtKind::Assign(targets, value) => {
                let value = self.eval(frame, value)?;
                for target in targets {
                    self.assign(frame, target, value.clone())?;
                }
            }
            StmtKind::AugAssign(target, op, value) => self.aug_assign(frame, target, *op, value)?,
            StmtKind::If(branches, orelse) => {
                for (cond, body) in branches {
                    if self.eval(frame, cond)?.truthy() {
                        return self.exec_block(frame, body);
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(frame, body);
                }
            }
            StmtKind::While(cond, body) => {
                while self.eval(frame, cond)?.truthy() {
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For(target, iter, body) => {
                let iterable = self.eval(frame, iter)?;
                for item in iterate(&iterable)? {
                    self.assign(frame, target, item)?;
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(frame, e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(value) => return Err(self.raise(frame, value.as_ref())?),
            StmtKind::Assert(cond, message) => {
                if !self.eval(frame, cond)?.truthy() {
                    let message = match message {
                        Some(m) => self.eval(frame, m)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Fault::raised("AssertionError", message));
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(frame, target)?;
                }
            }
            StmtKind::Def(def) => {
                let func = self.make_function(frame, def)?;
                frame.set(&def.name, func);
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import(&alias.name)?;
                    frame.set(alias.bound_name(), Value::Module(module));
                }
            }
            StmtKind::FromImport(module_name, aliases) => {
                let module = self.import(module_name)?;
                for alias in aliases {
                    let value = module.attrs.get(alias.name.as_str()).cloned().ok_or_else(|| {
                        Fault::Capability(format!(
                            "'{}' is not available from module '{module_name}'",
                            alias.name
                        ))
                    })?;
                    frame.set(alias.bound_name(), value);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => return self.exec_try(frame, body, handlers, orelse.as_deref(), finally.as_deref()),
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        frame: &Rc<Frame>,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: Option<&[Stmt]>,
        finally: Option<&[Stmt]>,
    ) -> Result<Flow, Fault> {
        let outcome = match self.exec_block(frame, body) {
            Ok(Flow::Normal) => match orelse {
                Some(orelse) => self.exec_block(frame, orelse),
                None => Ok(Flow::Normal),
            },
            Ok(flow) => Ok(flow),
            Err(Fault::Raised { kind, message }) => {
                let handler = handlers.iter().find(|h| {
                    h.kinds.is_empty() || h.kinds.iter().any(|k| exception_matches(&kind, k))
                });
                match handler {
                    Some(handler) => {
                        let exc = Rc::new(Exception { kind, message });
                        if let Some(name) = &handler.binding {
                            frame.set(name, Value::Exception(exc.clone()));
                        }
                        self.handling.push(exc);
                        let result = self.exec_block(frame, &handler.body);
                        self.handling.pop();
                        result
                    }
                    None => Err(Fault::Raised { kind, message }),
                }
            }
            // Policy and memory faults unwind straight through.
            Err(other) => return Err(other),
        };

        if let Some(finally) = finally {
            match self.exec_block(frame, finally)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn raise(&mut self, frame: &Rc<Frame>, value: Option<&Expr>) -> Result<Fault, Fault> {
        let Some(expr) = value else {
            return Ok(match self.handling.last() {
                Some(exc) => Fault::raised(&exc.kind, exc.message.clone()),
                None => Fault::raised("RuntimeError", "No active exception to reraise"),
            });
        };
        Ok(match self.eval(frame, expr)? {
            Value::Exception(exc) => Fault::raised(&exc.kind, exc.message.clone()),
            Value::Builtin(b) if is_exception_kind(b.name) => Fault::raised(b.name, ""),
            other => Fault::type_error(format!(
                "exceptions must derive from BaseException, not {}",
                other.type_name()
            )),
        })
    }

    fn import(&self, name: &str) -> Result<Rc<Module>, Fault> {
        self.surface
            .module(name)
            .ok_or_else(|| Fault::Capability(format!("import of module '{name}' is not allowed")))
    }

    fn make_function(&mut self, frame: &Rc<Frame>, def: &Rc<FuncDef>) -> Result<Value, Fault> {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(frame, default)?);
            }
        }
        Ok(Value::Func(Rc::new(Function {
            def: def.clone(),
            defaults,
            closure: frame.clone(),
        })))
    }

    // ── Assignment ────────────────────────────────────────

    fn assign(&mut self, frame: &Rc<Frame>, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Name(name) => frame.set(name, value),
            Target::Index(obj, index) => {
                let obj = self.eval(frame, obj)?;
                let index = self.eval(frame, index)?;
                self.set_item(&obj, index, value)?;
            }
            Target::Attr(obj, name) => {
                if name.starts_with("__") {
                    return Err(dunder_violation(name));
                }
                let obj = self.eval(frame, obj)?;
                return Err(Fault::raised(
                    "AttributeError",
                    format!("'{}' object attribute '{name}' is read-only", obj.type_name()),
                ));
            }
            Target::Tuple(targets) => {
                let items = to_vec(&value)?;
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(Fault::value_error(message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(frame, target, item)?;
                }
            }
        }
        Ok(())
    }

    fn set_item(&mut self, obj: &Value, index: Value, value: Value) -> Result<(), Fault> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = normalize_index(&index, items.len(), "list assignment")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(dict) => dict.borrow_mut().insert(index, value),
            other => Err(Fault::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn aug_assign(
        &mut self,
        frame: &Rc<Frame>,
        target: &Target,
        op: BinOp,
        value: &Expr,
    ) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(frame, name)?;
                let rhs = self.eval(frame, value)?;
                let updated = self.inplace(op, current, rhs)?;
                frame.set(name, updated);
            }
            Target::Index(obj, index) => {
                let obj = self.eval(frame, obj)?;
                let index = self.eval(frame, index)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(frame, value)?;
                let updated = self.inplace(op, current, rhs)?;
                self.set_item(&obj, index, updated)?;
            }
            Target::Attr(_, name) if name.starts_with("__") => return Err(dunder_violation(name)),
            Target::Attr(..) | Target::Tuple(_) => {
                return Err(Fault::raised(
                    "SyntaxError",
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    /// `+=` on a list extends it in place, so aliases observe the change.
    fn inplace(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value, Fault> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = to_vec(&rhs)?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary(op, &current, &rhs)
    }

    fn delete(&mut self, frame: &Rc<Frame>, target: &Target) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                if frame.remove(name).is_none() {
                    return Err(Fault::raised(
                        "NameError",
                        format!("name '{name}' is not defined"),
                    ));
                }
            }
            Target::Index(obj, index) => {
                let obj = self.eval(frame, obj)?;
                let index = self.eval(frame, index)?;
                match &obj {
                    Value::List(items) => {
                        let mut items = items.borrow_mut();
                        let i = normalize_index(&index, items.len(), "list assignment")?;
                        items.remove(i);
                    }
                    Value::Dict(dict) => {
                        if dict.borrow_mut().remove(&index)?.is_none() {
                            return Err(Fault::raised("KeyError", index.repr()));
                        }
                    }
                    other => {
                        return Err(Fault::type_error(format!(
                            "'{}' object does not support item deletion",
                            other.type_name()
                        )))
                    }
                }
            }
            Target::Attr(_, name) if name.starts_with("__") => return Err(dunder_violation(name)),
            Target::Attr(..) => {
                return Err(Fault::raised("AttributeError", "cannot delete attribute"))
            }
            Target::Tuple(targets) => {
                for t in targets {
                    self.delete(frame, t)?;
                }
            }
        }
        Ok(())
    }

    // ── Expressions ───────────────────────────────────────

    fn lookup(&self, frame: &Rc<Frame>, name: &str) -> Result<Value, Fault> {
        if let Some(value) = frame.lookup(name) {
            return Ok(value);
        }
        if let Some(value) = self.surface.builtin(name) {
            return Ok(value);
        }
        if let Some(module) = self.surface.module(name) {
            return Ok(Value::Module(module));
        }
        if BLOCKED_NAMES.contains(&name) {
            Err(Fault::Capability(format!("'{name}' is blocked in the sandbox")))
        } else {
            Err(Fault::Capability(format!("name '{name}' is not available in the sandbox")))
        }
    }

    pub fn eval(&mut self, frame: &Rc<Frame>, expr: &Expr) -> Result<Value, Fault> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::from(s.as_str()),
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(s) => out.push_str(s),
                        FPart::Expr(e, spec) => {
                            let v = self.eval(frame, e)?;
                            out.push_str(&format_value(&v, spec.as_deref().unwrap_or(""))?);
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Name(name) => self.lookup(frame, name),
            Expr::List(items) => Ok(Value::list(self.eval_all(frame, items)?)),
            Expr::Set(items) => Value::set(self.eval_all(frame, items)?),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(frame, items)?)),
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    let k = self.eval(frame, k)?;
                    let v = self.eval(frame, v)?;
                    dict.insert(k, v)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::Attr(obj, name) => {
                if name.starts_with("__") {
                    return Err(dunder_violation(name));
                }
                let obj = self.eval(frame, obj)?;
                self.attribute(obj, name)
            }
            Expr::Index(obj, index) => {
                let obj = self.eval(frame, obj)?;
                let index = self.eval(frame, index)?;
                self.get_item(&obj, &index)
            }
            Expr::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                let target = self.eval(frame, target)?;
                let mut bound = |e: &Option<Box<Expr>>| -> Result<Option<i64>, Fault> {
                    match e {
                        None => Ok(None),
                        Some(e) => match self.eval(frame, e)? {
                            Value::None => Ok(None),
                            v => Ok(Some(expect_int(&v, "slice indices")?)),
                        },
                    }
                };
                let (lower, upper, step) = (bound(lower)?, bound(upper)?, bound(step)?);
                slice(&target, lower, upper, step)
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(frame, func)?;
                let positional = self.eval_all(frame, args)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    keywords.push((name.clone(), self.eval(frame, e)?));
                }
                self.call(
                    &callee,
                    Args {
                        positional,
                        keywords,
                    },
                )
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(frame, operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                    UnaryOp::Neg => match v {
                        Value::Int(_) | Value::Bool(_) => v
                            .as_int()
                            .and_then(i64::checked_neg)
                            .map(Value::Int)
                            .ok_or_else(Fault::overflow),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(bad_unary("-", &other)),
                    },
                    UnaryOp::Pos => match v {
                        Value::Bool(b) => Ok(Value::Int(b as i64)),
                        Value::Int(_) | Value::Float(_) => Ok(v),
                        other => Err(bad_unary("+", &other)),
                    },
                }
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                self.binary(*op, &l, &r)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(frame, first)?;
                for (op, right) in rest {
                    let right = self.eval(frame, right)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(l, r) => {
                let l = self.eval(frame, l)?;
                if !l.truthy() {
                    return Ok(l);
                }
                self.eval(frame, r)
            }
            Expr::Or(l, r) => {
                let l = self.eval(frame, l)?;
                if l.truthy() {
                    return Ok(l);
                }
                self.eval(frame, r)
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(frame, cond)?.truthy() {
                    self.eval(frame, then)
                } else {
                    self.eval(frame, otherwise)
                }
            }
            Expr::Lambda(def) => self.make_function(frame, def),
            Expr::ListComp(elt, clauses) => {
                let scope = Frame::child(frame);
                let mut out = CompOut::List(elt, Vec::new());
                self.comprehend(&scope, clauses, &mut out)?;
                match out {
                    CompOut::List(_, items) => Ok(Value::list(items)),
                    CompOut::Dict(..) => unreachable!(),
                }
            }
            Expr::SetComp(elt, clauses) => {
                let scope = Frame::child(frame);
                let mut out = CompOut::List(elt, Vec::new());
                self.comprehend(&scope, clauses, &mut out)?;
                match out {
                    CompOut::List(_, items) => Value::set(items),
                    CompOut::Dict(..) => unreachable!(),
                }
            }
            Expr::DictComp(key, value, clauses) => {
                let scope = Frame::child(frame);
                let mut out = CompOut::Dict(key, value, Dict::new());
                self.comprehend(&scope, clauses, &mut out)?;
                match out {
                    CompOut::Dict(_, _, dict) => Ok(Value::dict(dict)),
                    CompOut::List(..) => unreachable!(),
                }
            }
        }
    }

    fn eval_all(&mut self, frame: &Rc<Frame>, exprs: &[Expr]) -> Result<Vec<Value>, Fault> {
        exprs.iter().map(|e| self.eval(frame, e)).collect()
    }

    fn comprehend(
        &mut self,
        scope: &Rc<Frame>,
        clauses: &[Comprehension],
        out: &mut CompOut<'_>,
    ) -> Result<(), Fault> {
        let Some((clause, rest)) = clauses.split_first() else {
            match out {
                CompOut::List(elt, items) => {
                    let v = self.eval(scope, elt)?;
                    items.push(v);
                }
                CompOut::Dict(key, value, dict) => {
                    let k = self.eval(scope, key)?;
                    let v = self.eval(scope, value)?;
                    dict.insert(k, v)?;
                }
            }
            return Ok(());
        };
        let iterable = self.eval(scope, &clause.iter)?;
        'items: for item in iterate(&iterable)? {
            self.assign(scope, &clause.target, item)?;
            for cond in &clause.conds {
                if !self.eval(scope, cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(scope, rest, out)?;
        }
        Ok(())
    }

    fn attribute(&mut self, obj: Value, name: &str) -> Result<Value, Fault> {
        match &obj {
            Value::Module(module) => module.attrs.get(name).cloned().ok_or_else(|| {
                Fault::Capability(format!(
                    "'{name}' is not available from module '{}'",
                    module.name
                ))
            }),
            Value::Exception(exc) if name == "args" => {
                Ok(Value::tuple(vec![Value::from(exc.message.as_str())]))
            }
            _ => match methods::lookup(&obj, name) {
                Some(name) => Ok(Value::Method(Rc::new(BoundMethod {
                    receiver: obj,
                    name,
                }))),
                None => Err(Fault::raised(
                    "AttributeError",
                    format!("'{}' object has no attribute '{name}'", obj.type_name()),
                )),
            },
        }
    }

    pub fn get_item(&mut self, obj: &Value, index: &Value) -> Result<Value, Fault> {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let i = normalize_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = normalize_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(index, chars.len(), "string")?;
                Ok(Value::from(chars[i].to_string()))
            }
            Value::Range(start, _, step) => {
                let i = normalize_index(index, range_len(obj), "range object")?;
                Ok(Value::Int(start + step * i as i64))
            }
            Value::Dict(dict) => {
                if let Some(value) = dict.borrow().get(index)? {
                    return Ok(value);
                }
                let kind = dict.borrow().kind.clone();
                match kind {
                    DictKind::Plain => Err(Fault::raised("KeyError", index.repr())),
                    DictKind::Counter => Ok(Value::Int(0)),
                    DictKind::Default(factory) => {
                        let value = self.call(&factory, Args::default())?;
                        dict.borrow_mut().insert(index.clone(), value.clone())?;
                        Ok(value)
                    }
                }
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    // ── Calls ─────────────────────────────────────────────

    pub fn call(&mut self, callee: &Value, args: Args) -> Result<Value, Fault> {
        match callee {
            Value::Builtin(b) => (b.func)(self, args),
            Value::Func(func) => self.call_function(func.clone(), args),
            Value::Method(m) => methods::call_method(self, &m.receiver, m.name, args),
            other => Err(Fault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: Rc<Function>, args: Args) -> Result<Value, Fault> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Fault::raised("RecursionError", "maximum recursion depth exceeded"));
        }
        let def = &func.def;
        let scope = Frame::child(&func.closure);
        let params = &def.params;
        if args.positional.len() > params.len() {
            return Err(Fault::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                params.len(),
                args.positional.len()
            )));
        }
        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (name, value) in args.keywords {
            let Some(i) = params.iter().position(|p| p.name == name) else {
                return Err(Fault::type_error(format!(
                    "{}() got an unexpected keyword argument '{name}'",
                    def.name
                )));
            };
            if bound[i].is_some() {
                return Err(Fault::type_error(format!(
                    "{}() got multiple values for argument '{name}'",
                    def.name
                )));
            }
            bound[i] = Some(value);
        }
        let first_default = params.len() - func.defaults.len();
        for (i, (param, slot)) in params.iter().zip(bound).enumerate() {
            let value = match slot {
                Some(v) => v,
                None if i >= first_default => func.defaults[i - first_default].clone(),
                None => {
                    return Err(Fault::type_error(format!(
                        "{}() missing required argument: '{}'",
                        def.name, param.name
                    )))
                }
            };
            scope.set(&param.name, value);
        }

        self.depth += 1;
        let result = self.exec_block(&scope, &def.body);
        self.depth -= 1;
        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::None),
            Flow::Break | Flow::Continue => {
                Err(Fault::raised("SyntaxError", "'break' or 'continue' outside loop"))
            }
        }
    }

    // ── Operators ─────────────────────────────────────────

    pub fn binary(&self, op: BinOp, l: &Value, r: &Value) -> Result<Value, Fault> {
        use Value::*;
        match (op, l, r) {
            (BinOp::Add, Str(a), Str(b)) => {
                self.check_alloc((a.len() + b.len()) as u64)?;
                Ok(Value::from(format!("{a}{b}")))
            }
            (BinOp::Add, List(a), List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (BinOp::Add, Tuple(a), Tuple(b)) => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::tuple(items))
            }
            (BinOp::Mul, Str(s), n) | (BinOp::Mul, n, Str(s)) if n.as_int().is_some() => {
                let count = n.as_int().unwrap_or(0).max(0) as u64;
                let total = (s.len() as u64).saturating_mul(count);
                self.check_alloc(total)?;
                let mut out = String::new();
                out.try_reserve(total as usize).map_err(|_| alloc_failure(total))?;
                for _ in 0..count {
                    out.push_str(s);
                }
                Ok(Value::from(out))
            }
            (BinOp::Mul, List(_) | Tuple(_), n) | (BinOp::Mul, n, List(_) | Tuple(_))
                if n.as_int().is_some() =>
            {
                let (seq, n) = if n.as_int().is_some() && !matches!(l, List(_) | Tuple(_)) {
                    (r, l)
                } else {
                    (l, r)
                };
                let items = to_vec(seq)?;
                let count = n.as_int().unwrap_or(0).max(0) as u64;
                let total = (items.len() as u64).saturating_mul(count);
                let slot = std::mem::size_of::<Value>() as u64;
                self.check_alloc(total.saturating_mul(slot))?;
                let mut out = Vec::new();
                out.try_reserve(total as usize)
                    .map_err(|_| alloc_failure(total.saturating_mul(slot)))?;
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(if matches!(seq, List(_)) {
                    Value::list(out)
                } else {
                    Value::tuple(out)
                })
            }
            (BinOp::Mod, Str(fmt), args) => Ok(Value::from(methods::percent_format(fmt, args)?)),
            (BinOp::Sub, Set(a), Set(b)) => {
                let b = b.borrow();
                let mut kept = Vec::new();
                for k in a.borrow().keys() {
                    if !b.contains(&k)? {
                        kept.push(k);
                    }
                }
                Value::set(kept)
            }
            (op, a, b) if a.is_number() && b.is_number() => arith(op, a, b),
            (op, a, b) => Err(Fault::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))),
        }
    }
}

// ── Free helpers ──────────────────────────────────────────

pub fn is_exception_kind(name: &str) -> bool {
    EXCEPTIONS.iter().any(|e| e.name == name)
}

fn exception_parent(kind: &str) -> Option<&'static str> {
    Some(match kind {
        "KeyError" | "IndexError" => "LookupError",
        "ZeroDivisionError" | "OverflowError" => "ArithmeticError",
        "RecursionError" => "RuntimeError",
        "JSONDecodeError" | "StatisticsError" => "ValueError",
        "FileNotFoundError" => "OSError",
        _ => return None,
    })
}

/// Whether an `except <handler>` clause catches an exception of `kind`.
pub fn exception_matches(kind: &str, handler: &str) -> bool {
    if handler == "Exception" || handler == "BaseException" {
        return true;
    }
    let mut current = Some(kind);
    while let Some(k) = current {
        if k == handler {
            return true;
        }
        current = exception_parent(k);
    }
    false
}

fn dunder_violation(name: &str) -> Fault {
    Fault::Capability(format!("access to attribute '{name}' is not allowed"))
}

fn alloc_failure(bytes: u64) -> Fault {
    Fault::Memory(format!("cannot allocate {bytes} bytes"))
}

fn bad_unary(op: &str, v: &Value) -> Fault {
    Fault::type_error(format!("bad operand type for unary {op}: '{}'", v.type_name()))
}

fn zero_division(message: &str) -> Fault {
    Fault::raised("ZeroDivisionError", message)
}

fn arith(op: BinOp, a: &Value, b: &Value) -> Result<Value, Fault> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_arith(op, x, y);
    }
    let (x, y) = match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(Fault::type_error("unsupported operand types")),
    };
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    }))
}

fn int_arith(op: BinOp, x: i64, y: i64) -> Result<Value, Fault> {
    let v = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            x.checked_div_euclid(y).map(|q| {
                // Python floors toward negative infinity.
                if y < 0 && x.rem_euclid(y) != 0 {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            x.checked_rem(y).map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
    };
    v.map(Value::Int).ok_or_else(Fault::overflow)
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, Fault> {
    use std::cmp::Ordering::*;
    Ok(match op {
        CmpOp::Eq => try_eq(l, r)?,
        CmpOp::NotEq => !try_eq(l, r)?,
        CmpOp::Lt => py_cmp(l, r)? == Less,
        CmpOp::LtE => py_cmp(l, r)? != Greater,
        CmpOp::Gt => py_cmp(l, r)? == Greater,
        CmpOp::GtE => py_cmp(l, r)? != Less,
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
        CmpOp::Is => py_is(l, r),
        CmpOp::IsNot => !py_is(l, r),
    })
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, Fault> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            other => Err(Fault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(dict) | Value::Set(dict) => dict.borrow().contains(item),
        Value::Range(start, stop, step) => Ok(match item.as_int() {
            Some(i) if *step > 0 => i >= *start && i < *stop && (i - start) % step == 0,
            Some(i) => i <= *start && i > *stop && (start - i) % -step == 0,
            None => false,
        }),
        other => Err(Fault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn normalize_index(index: &Value, len: usize, what: &str) -> Result<usize, Fault> {
    let i = index.as_int().ok_or_else(|| {
        Fault::type_error(format!(
            "{what} indices must be integers, not {}",
            index.type_name()
        ))
    })?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(Fault::raised("IndexError", format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map(|v| clamp(resolve(v), 0, len)).unwrap_or(0);
        let stop = upper.map(|v| clamp(resolve(v), 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = lower.map(|v| clamp(resolve(v), -1, len - 1)).unwrap_or(len - 1);
        let stop = upper.map(|v| clamp(resolve(v), -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

pub fn slice(
    target: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Value, Fault> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Fault::value_error("slice step cannot be zero"));
    }
    match target {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_indices(chars.len(), lower, upper, step)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::from(picked))
        }
        Value::List(items) => {
            let items = items.borrow();
            Ok(Value::list(
                slice_indices(items.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect(),
            ))
        }
        Value::Tuple(items) => Ok(Value::tuple(
            slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Range(..) => {
            let items = to_vec(target)?;
            Ok(Value::list(
                slice_indices(items.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect(),
            ))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::script::parse_program;

    fn run(source: &str) -> Result<RunOutput, Fault> {
        let program = parse_program(source).map_err(Fault::from)?;
        let mut interp = Interpreter::new(CapabilitySurface::build());
        interp.run(&program)?;
        Ok(interp.finish())
    }

    fn result_of(source: &str) -> Value {
        run(source).unwrap().result.expect("result binding")
    }

    /// Runs on a large stack, like the worker's evaluation thread.
    fn raised_kind(source: &str) -> String {
        let source = source.to_string();
        let fault = std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(move || run(&source).err())
            .unwrap()
            .join()
            .unwrap();
        match fault {
            Some(Fault::Raised { kind, .. }) => kind,
            other => panic!("expected a raised exception, got {other:?}"),
        }
    }

    #[test]
    fn test_power_result() {
        assert_eq!(result_of("result = 2 ** 10").as_int(), Some(1024));
    }

    #[test]
    fn test_integer_overflow_raises() {
        assert_eq!(raised_kind("result = 2 ** 64"), "OverflowError");
        assert_eq!(raised_kind("x = 9223372036854775807\nresult = x + 1"), "OverflowError");
    }

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(result_of("result = -7 // 2").as_int(), Some(-4));
        assert_eq!(result_of("result = -7 % 3").as_int(), Some(2));
        assert_eq!(result_of("result = 7 % -3").as_int(), Some(-2));
        assert_eq!(result_of("result = 7 / 2").as_float(), Some(3.5));
        assert_eq!(raised_kind("result = 1 / 0"), "ZeroDivisionError");
    }

    #[test]
    fn test_functions_closures_and_defaults() {
        let src = "\
def make_adder(n):
    def add(x, y=0):
        return x + n + y
    return add

add5 = make_adder(5)
result = [add5(1), add5(1, y=2), (lambda v: v * 2)(4)]
";
        assert_eq!(result_of(src).repr(), "[6, 8, 8]");
    }

    #[test]
    fn test_recursion_limit() {
        let src = "def f(n):\n    return f(n + 1)\nresult = f(0)\n";
        assert_eq!(raised_kind(src), "RecursionError");
    }

    #[test]
    fn test_loops_and_control_flow() {
        let src = "\
total = 0
for i in range(10):
    if i == 7:
        break
    if i % 2:
        continue
    total += i
n = 0
while True:
    n += 1
    if n >= 3:
        break
result = (total, n)
";
        assert_eq!(result_of(src).repr(), "(12, 3)");
    }

    #[test]
    fn test_comprehensions() {
        let src = "\
data = [{'name': 'a', 'v': 3}, {'name': 'b', 'v': 1}]
names = [d['name'] for d in data if d['v'] > 2]
index = {d['name']: d['v'] for d in data}
pairs = [(x, y) for x in range(2) for y in range(2) if x != y]
result = [names, index, pairs]
";
        assert_eq!(
            result_of(src).repr(),
            "[['a'], {'a': 3, 'b': 1}, [(0, 1), (1, 0)]]"
        );
    }

    #[test]
    fn test_try_except_finally() {
        let src = "\
log = []
try:
    {}['missing']
except LookupError as e:
    log.append('caught ' + str(e))
finally:
    log.append('finally')
try:
    raise ValueError('bad')
except (TypeError, ValueError) as e:
    log.append(repr(e))
result = log
";
        assert_eq!(
            result_of(src).repr(),
            "[\"caught 'missing'\", 'finally', \"ValueError('bad')\"]"
        );
    }

    #[test]
    fn test_bare_raise_reraises() {
        let src = "try:\n    x = 1 / 0\nexcept ZeroDivisionError:\n    raise\n";
        assert_eq!(raised_kind(src), "ZeroDivisionError");
    }

    #[test]
    fn test_unknown_name_is_capability_violation() {
        assert!(matches!(run("result = open('x')"), Err(Fault::Capability(_))));
        assert!(matches!(run("result = undefined_thing"), Err(Fault::Capability(_))));
    }

    #[test]
    fn test_capability_violation_is_not_catchable() {
        let src = "try:\n    eval('1')\nexcept Exception:\n    result = 'caught'\n";
        assert!(matches!(run(src), Err(Fault::Capability(_))));
    }

    #[test]
    fn test_dunder_access_blocked() {
        assert!(matches!(run("x = ().__class__"), Err(Fault::Capability(_))));
    }

    #[test]
    fn test_disallowed_import_is_capability_violation() {
        assert!(matches!(run("import os"), Err(Fault::Capability(_))));
        assert!(run("import json\nresult = json.dumps([1])").is_ok());
    }

    #[test]
    fn test_list_aliasing_and_augmented_add() {
        let src = "a = [1]\nb = a\nb += [2]\nb.append(3)\nresult = a\n";
        assert_eq!(result_of(src).repr(), "[1, 2, 3]");
    }

    #[test]
    fn test_tuple_unpacking_errors() {
        assert_eq!(raised_kind("a, b = [1, 2, 3]"), "ValueError");
        assert_eq!(result_of("a, (b, c) = 1, [2, 3]\nresult = a + b + c").as_int(), Some(6));
    }

    #[test]
    fn test_slicing() {
        assert_eq!(result_of("result = 'hello'[::-1]").to_str(), "olleh");
        assert_eq!(result_of("result = [1, 2, 3, 4][1:3]").repr(), "[2, 3]");
        assert_eq!(result_of("result = list(range(10))[-3:]").repr(), "[7, 8, 9]");
    }

    #[test]
    fn test_chained_comparison_and_membership() {
        assert_eq!(result_of("result = 1 < 2 < 3").repr(), "True");
        assert_eq!(result_of("result = 1 < 3 < 2").repr(), "False");
        assert_eq!(result_of("result = 'ell' in 'hello' and 5 not in [1, 2]").repr(), "True");
    }

    #[test]
    fn test_fstring_formatting() {
        let src = "name = 'x'\nv = 3.14159\nresult = f'{name!r}: {v:.2f} ({len(name)})'";
        assert_eq!(result_of(src).to_str(), "'x': 3.14 (1)");
    }

    #[test]
    fn test_print_capture_and_truncation() {
        let program = parse_program("for i in range(100):\n    print('line', i)\n").unwrap();
        let mut interp = Interpreter::new(CapabilitySurface::build()).with_output_limit(21);
        interp.run(&program).unwrap();
        let out = interp.finish();
        assert!(out.output_truncated);
        assert_eq!(out.output, "line 0\nline 1\nline 2\n");
    }

    #[test]
    fn test_oversized_repetition_is_memory_fault() {
        let program = parse_program("s = 'x' * (10 ** 12)").unwrap();
        let mut interp = Interpreter::new(CapabilitySurface::build()).with_memory_limit(1 << 20);
        assert!(matches!(interp.run(&program), Err(Fault::Memory(_))));
    }

    #[test]
    fn test_bindings_are_visible() {
        let program = parse_program("result = sum(numbers) * factor").unwrap();
        let mut interp = Interpreter::new(CapabilitySurface::build());
        interp.bind("numbers", Value::list(vec![Value::Int(1), Value::Int(2)]));
        interp.bind("factor", Value::Int(10));
        interp.run(&program).unwrap();
        assert_eq!(interp.finish().result.and_then(|v| v.as_int()), Some(30));
    }

    #[test]
    fn test_exception_hierarchy() {
        assert!(exception_matches("KeyError", "LookupError"));
        assert!(exception_matches("RecursionError", "RuntimeError"));
        assert!(exception_matches("ValueError", "Exception"));
        assert!(!exception_matches("ValueError", "TypeError"));
    }

    #[test]
    fn test_slice_with_huge_step() {
        let value = result_of("result = list(range(3))[1:2:9223372036854775807]");
        assert_eq!(value.repr(), "[1]");
        let value = result_of("result = list(range(3))[1::-9223372036854775807]");
        assert_eq!(value.repr(), "[1]");
    }

    #[test]
    fn test_enumerate_start_overflow() {
        assert_eq!(raised_kind("enumerate([1, 2], 9223372036854775807)"), "OverflowError");
        let value = result_of("result = enumerate(['a'], 9223372036854775807)");
        assert_eq!(value.repr(), "[(9223372036854775807, 'a')]");
    }

    #[test]
    fn test_format_most_negative_int() {
        let value = result_of("result = format(-9223372036854775807 - 1, 'd')");
        assert_eq!(value.repr(), "'-9223372036854775808'");
    }

    #[test]
    fn test_len_of_huge_range_is_overflow() {
        assert_eq!(
            raised_kind("len(range(-9223372036854775807 - 1, 9223372036854775807))"),
            "OverflowError"
        );
    }

    #[test]
    fn test_cyclic_comparison_is_recursion_error() {
        let source = "a = []\nb = []\na.append(a)\nb.append(b)\nresult = a == b\n";
        assert_eq!(raised_kind(source), "RecursionError");
        assert_eq!(raised_kind("a = [1]\nb = [1]\na.append(a)\nb.append(b)\na < b\n"), "RecursionError");
        // Identity still short-circuits.
        assert!(matches!(result_of("a = []\na.append(a)\nresult = a == a"), Value::Bool(true)));
    }

    #[test]
    fn test_sets() {
        let src = "\
s = set([3, 1, 3, 2])
s.add(4)
s.discard(9)
t = {2, 3, 5}
result = [len(s), 3 in s, sorted(s - t), sorted(s.union(t)), sorted(s.intersection(t)), {1, 2} == {2, 1}, set()]
";
        assert_eq!(result_of(src).repr(), "[4, True, [1, 4], [1, 2, 3, 4, 5], [2, 3], True, set()]");
        assert_eq!(result_of("result = {x % 3 for x in range(10)}").repr(), "{0, 1, 2}");
        assert_eq!(raised_kind("s = {1}\ns.remove(2)"), "KeyError");
        assert_eq!(raised_kind("s = {[1]}"), "TypeError");
    }

    #[test]
    fn test_iter_and_next() {
        let src = "\
it = iter([1, 2, 3])
first = next(it)
rest = [x for x in it]
result = [first, rest, next(it, 'done')]
";
        assert_eq!(result_of(src).repr(), "[1, [2, 3], 'done']");
        assert_eq!(raised_kind("it = iter([])\nnext(it)"), "StopIteration");
        assert_eq!(raised_kind("next([1])"), "TypeError");
        let caught = "it = iter(range(1))\nnext(it)\ntry:\n    next(it)\n    result = 'no'\nexcept StopIteration:\n    result = 'stopped'\n";
        assert_eq!(result_of(caught).to_str(), "stopped");
    }

    #[test]
    fn test_radix_builtins() {
        let value = result_of("result = [hex(255), bin(5), oct(8), hex(-16), bin(0)]");
        assert_eq!(value.repr(), "['0xff', '0b101', '0o10', '-0x10', '0b0']");
        assert_eq!(raised_kind("hex(1.5)"), "TypeError");
    }

    #[test]
    fn test_attribute_error_is_catchable() {
        let src = "try:\n    [1].nope\nexcept AttributeError as e:\n    result = str(e)\n";
        assert_eq!(result_of(src).to_str(), "'list' object has no attribute 'nope'");
        assert_eq!(raised_kind("raise AttributeError('x')"), "AttributeError");
    }
}
