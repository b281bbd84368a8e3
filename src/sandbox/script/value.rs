//! Runtime values, equality/ordering, display and JSON conversion.
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::rc::Rc;

use serde_json::Value as Json;

use super::ast::FuncDef;
use super::interp::{Frame, Interpreter};
use super::Fault;

/// Signature shared by every native callable (builtins, module functions,
/// workspace helpers).
pub type NativeFn = fn(&mut Interpreter, Args) -> Result<Value, Fault>;

#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub func: NativeFn,
}

pub struct Function {
    pub def: Rc<FuncDef>,
    /// Evaluated defaults, aligned with the trailing parameters that declare one.
    pub defaults: Vec<Value>,
    pub closure: Rc<Frame>,
}

pub struct Module {
    pub name: &'static str,
    pub attrs: BTreeMap<&'static str, Value>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

#[derive(Debug)]
pub struct Exception {
    pub kind: String,
    pub message: String,
}

/// A successful `re` match. Offsets are in characters.
#[derive(Debug)]
pub struct RegexMatch {
    pub groups: Vec<Option<String>>,
    pub names: Vec<(String, usize)>,
    pub spans: Vec<Option<(usize, usize)>>,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    /// Keys only; the values are always `None`.
    Set(Rc<RefCell<Dict>>),
    Range(i64, i64, i64),
    Func(Rc<Function>),
    Builtin(Builtin),
    Module(Rc<Module>),
    Method(Rc<BoundMethod>),
    Exception(Rc<Exception>),
    Match(Rc<RegexMatch>),
    Iter(Rc<RefCell<ValueIter>>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(items: Vec<Value>) -> Result<Value, Fault> {
        let mut keys = Dict::new();
        for item in items {
            keys.insert(item, Value::None)?;
        }
        Ok(Value::Set(Rc::new(RefCell::new(keys))))
    }

    pub fn iterator(iter: ValueIter) -> Value {
        Value::Iter(Rc::new(RefCell::new(iter)))
    }

    pub fn exception(kind: &str, message: impl Into<String>) -> Value {
        Value::Exception(Rc::new(Exception {
            kind: kind.to_string(),
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(d) => match d.borrow().kind {
                DictKind::Plain => "dict",
                DictKind::Counter => "Counter",
                DictKind::Default(_) => "defaultdict",
            },
            Value::Set(_) => "set",
            Value::Range(..) => "range",
            Value::Func(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Method(_) => "method",
            Value::Exception(e) => &e.kind,
            Value::Match(_) => "re.Match",
            Value::Iter(_) => "iterator",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
            Value::Range(..) => range_len(self) > 0,
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view, accepting `bool` the way Python does.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_) | Value::Float(_))
    }

    /// `str(x)`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            _ => self.repr(),
        }
    }

    /// `repr(x)`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(self, &mut out, 0);
        out
    }
}

const MAX_REPR_DEPTH: usize = 64;

fn write_repr(value: &Value, out: &mut String, depth: usize) {
    if depth > MAX_REPR_DEPTH {
        out.push_str("...");
        return;
    }
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => out.push_str(&str_repr(s)),
        Value::List(items) => {
            out.push('[');
            write_items(&items.borrow(), out, depth);
            out.push(']');
        }
        Value::Tuple(items) => {
            out.push('(');
            write_items(items, out, depth);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            match &dict.kind {
                DictKind::Plain => {}
                DictKind::Counter => out.push_str("Counter("),
                DictKind::Default(factory) => {
                    out.push_str("defaultdict(");
                    write_repr(factory, out, depth + 1);
                    out.push_str(", ");
                }
            }
            out.push('{');
            for (i, (k, v)) in dict.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, depth + 1);
                out.push_str(": ");
                write_repr(v, out, depth + 1);
            }
            out.push('}');
            if !matches!(dict.kind, DictKind::Plain) {
                out.push(')');
            }
        }
        Value::Set(keys) if keys.borrow().is_empty() => out.push_str("set()"),
        Value::Set(keys) => {
            out.push('{');
            write_items(&keys.borrow().keys(), out, depth);
            out.push('}');
        }
        Value::Range(start, stop, step) => {
            if *step == 1 {
                let _ = write!(out, "range({start}, {stop})");
            } else {
                let _ = write!(out, "range({start}, {stop}, {step})");
            }
        }
        Value::Func(func) => {
            let _ = write!(out, "<function {}>", func.def.name);
        }
        Value::Builtin(b) => {
            let _ = write!(out, "<built-in function {}>", b.name);
        }
        Value::Module(m) => {
            let _ = write!(out, "<module '{}'>", m.name);
        }
        Value::Method(m) => {
            let _ = write!(out, "<method '{}' of '{}' object>", m.name, m.receiver.type_name());
        }
        Value::Exception(e) => {
            let _ = write!(out, "{}({})", e.kind, str_repr(&e.message));
        }
        Value::Match(m) => {
            let (start, end) = m.spans.first().copied().flatten().unwrap_or((0, 0));
            let text = m.groups.first().cloned().flatten().unwrap_or_default();
            let _ = write!(
                out,
                "<re.Match object; span=({start}, {end}), match={}>",
                str_repr(&text)
            );
        }
        Value::Iter(_) => out.push_str("<iterator object>"),
    }
}

fn write_items(items: &[Value], out: &mut String, depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out, depth + 1);
    }
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        return python_exponent(&format!("{f:e}"));
    }
    let s = format!("{f}");
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Rewrites Rust's `1.5e3` exponent form as Python's `1.5e+03`.
pub fn python_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s.to_string(),
    }
}

// ── Dict ──────────────────────────────────────────────────

/// Hashable projection of a value, used to index dict keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
}

impl HashKey {
    pub fn from_value(value: &Value) -> Result<HashKey, Fault> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(HashKey::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(Fault::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }
}

/// What `d[key]` does when the key is missing.
#[derive(Default, Clone)]
pub enum DictKind {
    /// `KeyError`.
    #[default]
    Plain,
    /// `collections.Counter`: reads as 0, nothing is stored.
    Counter,
    /// `collections.defaultdict`: the factory's result is stored and returned.
    Default(Value),
}

/// Insertion-ordered mapping.
#[derive(Default, Clone)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
    pub kind: DictKind,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(kind: DictKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, Fault> {
        let hk = HashKey::from_value(key)?;
        Ok(self.index.get(&hk).map(|&i| self.entries[i].1.clone()))
    }

    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.index
            .get(&HashKey::Str(Rc::from(key)))
            .map(|&i| self.entries[i].1.clone())
    }

    pub fn contains(&self, key: &Value) -> Result<bool, Fault> {
        Ok(self.index.contains_key(&HashKey::from_value(key)?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), Fault> {
        let hk = HashKey::from_value(&key)?;
        match self.index.get(&hk) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hk, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, Fault> {
        let hk = HashKey::from_value(key)?;
        let Some(pos) = self.index.remove(&hk) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}

// ── Equality and ordering ─────────────────────────────────

/// Nesting depth at which comparisons give up, reached by self-referential
/// containers.
const MAX_COMPARE_DEPTH: usize = 500;

fn comparison_depth_exceeded() -> Fault {
    Fault::raised("RecursionError", "maximum recursion depth exceeded in comparison")
}

/// `==` for containment checks and searches; a comparison that recurses too
/// deep counts as unequal.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    try_eq(a, b).unwrap_or(false)
}

/// `==` as the operator sees it: too deep a comparison is a `RecursionError`.
pub fn try_eq(a: &Value, b: &Value) -> Result<bool, Fault> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> Result<bool, Fault> {
    if depth > MAX_COMPARE_DEPTH {
        return Err(comparison_depth_exceeded());
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (x, y) if x.is_number() && y.is_number() => match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_float() == y.as_float(),
        },
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y, depth)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                match y.get(k) {
                    Ok(Some(other)) if eq_at(v, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for k in x.keys() {
                if !y.contains(&k)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Range(a1, b1, c1), Value::Range(a2, b2, c2)) => (a1, b1, c1) == (a2, b2, c2),
        (Value::Func(x), Value::Func(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x.name == y.name,
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Match(x), Value::Match(y)) => Rc::ptr_eq(x, y),
        _ => false,
    })
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> Result<bool, Fault> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !eq_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Identity, as far as `is` can observe it.
pub fn py_is(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) | (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Iter(x), Value::Iter(y)) => Rc::ptr_eq(x, y),
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        _ => py_eq(a, b),
    }
}

pub fn py_cmp(a: &Value, b: &Value) -> Result<Ordering, Fault> {
    cmp_at(a, b, 0)
}

fn cmp_at(a: &Value, b: &Value, depth: usize) -> Result<Ordering, Fault> {
    if depth > MAX_COMPARE_DEPTH {
        return Err(comparison_depth_exceeded());
    }
    match (a, b) {
        (x, y) if x.is_number() && y.is_number() => match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => Ok(i.cmp(&j)),
            _ => x
                .as_float()
                .zip(y.as_float())
                .and_then(|(f, g)| f.partial_cmp(&g))
                .ok_or_else(|| Fault::value_error("cannot order NaN")),
        },
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => seq_cmp(&x.borrow(), &y.borrow(), depth),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y, depth),
        _ => Err(Fault::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(a: &[Value], b: &[Value], depth: usize) -> Result<Ordering, Fault> {
    for (x, y) in a.iter().zip(b) {
        if !eq_at(x, y, depth + 1)? {
            return cmp_at(x, y, depth + 1);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

// ── Iteration ─────────────────────────────────────────────

pub fn range_len(value: &Value) -> usize {
    match value {
        Value::Range(start, stop, step) => {
            let (start, stop, step) = (*start as i128, *stop as i128, *step as i128);
            let n = if step > 0 {
                (stop - start + step - 1) / step
            } else {
                (start - stop - step - 1) / -step
            };
            n.max(0).min(usize::MAX as i128) as usize
        }
        _ => 0,
    }
}

/// Iterator over anything a `for` loop accepts. Ranges stay lazy; other
/// containers are snapshotted when iteration starts.
pub enum ValueIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
    /// Pulls from an `iter()` object, so every consumer advances it.
    Shared(Rc<RefCell<ValueIter>>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { next, stop, step } => {
                let done = if *step > 0 { *next >= *stop } else { *next <= *stop };
                if done {
                    return None;
                }
                let current = *next;
                match next.checked_add(*step) {
                    Some(n) => *next = n,
                    None => *next = *stop,
                }
                Some(Value::Int(current))
            }
            ValueIter::Items(items) => items.next(),
            ValueIter::Shared(inner) => inner.borrow_mut().next(),
        }
    }
}

pub fn iterate(value: &Value) -> Result<ValueIter, Fault> {
    Ok(match value {
        Value::Range(start, stop, step) => ValueIter::Range {
            next: *start,
            stop: *stop,
            step: *step,
        },
        Value::Iter(inner) => ValueIter::Shared(inner.clone()),
        _ => ValueIter::Items(to_vec(value)?.into_iter()),
    })
}

/// Materialises an iterable.
pub fn to_vec(value: &Value) -> Result<Vec<Value>, Fault> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().keys()),
        Value::Range(..) => Ok(iterate(value)?.collect()),
        Value::Iter(inner) => Ok(inner.borrow_mut().by_ref().collect()),
        other => Err(Fault::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

// ── JSON conversion ───────────────────────────────────────

pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::list(items.iter().map(from_json).collect()),
        Json::Object(map) => {
            let mut dict = Dict::new();
            for (k, v) in map {
                // String keys are always hashable.
                let _ = dict.insert(Value::from(k.as_str()), from_json(v));
            }
            Value::dict(dict)
        }
    }
}

pub fn to_json(value: &Value) -> Result<Json, Fault> {
    to_json_depth(value, 0)
}

fn to_json_depth(value: &Value, depth: usize) -> Result<Json, Fault> {
    if depth > MAX_REPR_DEPTH {
        return Err(Fault::value_error("Circular reference detected"));
    }
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| Fault::value_error("Out of range float values are not JSON compliant"))?,
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|v| to_json_depth(v, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Tuple(items) => Json::Array(
            items
                .iter()
                .map(|v| to_json_depth(v, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Set(keys) => Json::Array(
            keys.borrow()
                .keys()
                .iter()
                .map(|v| to_json_depth(v, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Range(..) => Json::Array(
            iterate(value)?.map(|v| to_json_depth(&v, depth + 1)).collect::<Result<_, _>>()?,
        ),
        Value::Dict(dict) => {
            let mut map = serde_json::Map::new();
            for (k, v) in dict.borrow().iter() {
                let key = match k {
                    Value::Str(s) => s.to_string(),
                    Value::None => "null".to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(_) | Value::Float(_) => k.repr(),
                    other => {
                        return Err(Fault::type_error(format!(
                            "keys must be str, int, float, bool or None, not {}",
                            other.type_name()
                        )))
                    }
                };
                map.insert(key, to_json_depth(v, depth + 1)?);
            }
            Json::Object(map)
        }
        other => {
            return Err(Fault::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    })
}

// ── Format specs (`format()`, f-strings, `str.format`) ────

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<FormatSpec, Fault> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            out.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(Fault::value_error("Format specifier missing precision"));
        }
        out.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(Fault::value_error(format!("Invalid format specifier '{spec}'")));
    }
    Ok(out)
}

fn group_digits(digits: &str, sep: char) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(sep);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

fn general_format(f: f64, precision: usize) -> String {
    let p = precision.max(1);
    if f == 0.0 {
        return "0".to_string();
    }
    let exp = f.abs().log10().floor() as i32;
    let trim = |s: String| -> String {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };
    if exp < -4 || exp >= p as i32 {
        let s = format!("{:.*e}", p - 1, f);
        match s.split_once('e') {
            Some((m, e)) => python_exponent(&format!("{}e{}", trim(m.to_string()), e)),
            None => s,
        }
    } else {
        trim(format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, f))
    }
}

pub fn format_value(value: &Value, spec: &str) -> Result<String, Fault> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;
    let numeric = value.is_number();

    let body = match (spec.kind, value) {
        (None | Some('s'), Value::Str(s)) => match spec.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.to_string(),
        },
        (Some('s'), _) => return Err(Fault::value_error("Unknown format code 's' for non-string")),
        (Some('d' | 'n'), v) => match v.as_int() {
            Some(i) => i.unsigned_abs().to_string(),
            None => {
                return Err(Fault::value_error(format!(
                    "Unknown format code 'd' for object of type '{}'",
                    v.type_name()
                )))
            }
        },
        (Some('x'), v) => format!("{:x}", v.as_int().unwrap_or(0).unsigned_abs()),
        (Some('X'), v) => format!("{:X}", v.as_int().unwrap_or(0).unsigned_abs()),
        (Some('o'), v) => format!("{:o}", v.as_int().unwrap_or(0).unsigned_abs()),
        (Some('b'), v) => format!("{:b}", v.as_int().unwrap_or(0).unsigned_abs()),
        (Some(k @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')), v) if numeric => {
            let f = v.as_float().unwrap_or(0.0).abs();
            let p = spec.precision.unwrap_or(6);
            match k {
                'f' | 'F' => format!("{f:.p$}"),
                'e' => python_exponent(&format!("{f:.p$e}")),
                'E' => python_exponent(&format!("{f:.p$e}")).to_uppercase(),
                'g' => general_format(f, p),
                'G' => general_format(f, p).to_uppercase(),
                _ => format!("{:.p$}%", f * 100.0),
            }
        }
        (None, Value::Float(f)) => match spec.precision {
            Some(p) => general_format(f.abs(), p),
            None => float_repr(f.abs()),
        },
        (None, v) if numeric => v.as_int().unwrap_or(0).unsigned_abs().to_string(),
        (Some(k), v) => {
            return Err(Fault::value_error(format!(
                "Unknown format code '{k}' for object of type '{}'",
                v.type_name()
            )))
        }
        (None, v) => v.to_str(),
    };

    let body = match spec.grouping {
        Some(sep) if numeric => group_digits(&body, sep),
        _ => body,
    };
    let negative = numeric && value.as_float().map(|f| f < 0.0).unwrap_or(false);
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) if numeric => "+",
        (false, Some(' ')) if numeric => " ",
        _ => "",
    };

    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return Ok(format!("{sign}{body}"));
    }
    let pad = spec.width - len;
    let (fill, align) = if spec.zero && spec.align.is_none() && numeric {
        ('0', '=')
    } else {
        (
            spec.fill.unwrap_or(' '),
            spec.align.unwrap_or(if numeric { '>' } else { '<' }),
        )
    };
    let padding = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{sign}{body}{}", padding(pad)),
        '^' => format!("{}{sign}{body}{}", padding(pad / 2), padding(pad - pad / 2)),
        '=' => format!("{sign}{}{body}", padding(pad)),
        _ => format!("{}{sign}{body}", padding(pad)),
    })
}

// ── Call arguments ────────────────────────────────────────

/// Positional and keyword arguments for a native call.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// Argument by position, or by keyword when not supplied positionally.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| {
            self.keywords
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
        })
    }

    pub fn required(&self, index: usize, name: &str, func: &str) -> Result<&Value, Fault> {
        self.get(index, name).ok_or_else(|| {
            Fault::type_error(format!("{func}() missing required argument: '{name}'"))
        })
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Rejects surplus positional arguments and unknown keywords.
    pub fn check(&self, func: &str, max_positional: usize, keywords: &[&str]) -> Result<(), Fault> {
        if self.positional.len() > max_positional {
            return Err(Fault::type_error(format!(
                "{func}() takes at most {max_positional} arguments ({} given)",
                self.positional.len()
            )));
        }
        if let Some((k, _)) = self.keywords.iter().find(|(k, _)| !keywords.contains(&k.as_str())) {
            return Err(Fault::type_error(format!(
                "{func}() got an unexpected keyword argument '{k}'"
            )));
        }
        Ok(())
    }
}

pub fn expect_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, Fault> {
    value.as_str().ok_or_else(|| {
        Fault::type_error(format!("{what} must be str, not {}", value.type_name()))
    })
}

pub fn expect_int(value: &Value, what: &str) -> Result<i64, Fault> {
    value.as_int().ok_or_else(|| {
        Fault::type_error(format!(
            "{what} must be an integer, not {}",
            value.type_name()
        ))
    })
}

pub fn expect_float(value: &Value, what: &str) -> Result<f64, Fault> {
    value.as_float().ok_or_else(|| {
        Fault::type_error(format!("{what} must be a number, not {}", value.type_name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_repr_of_containers() {
        let list = Value::list(vec![Value::Int(1), Value::from("a"), Value::None]);
        assert_eq!(list.repr(), "[1, 'a', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let mut d = Dict::new();
        d.insert(Value::from("k"), Value::Bool(true)).unwrap();
        assert_eq!(Value::dict(d).repr(), "{'k': True}");
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
    }

    #[test]
    fn test_self_referential_list_repr_terminates() {
        let list = Value::list(Vec::new());
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        assert!(list.repr().contains("..."));
    }

    #[test]
    fn test_cyclic_equality_is_bounded() {
        let cyclic = || {
            let list = Value::list(vec![Value::Int(1)]);
            if let Value::List(inner) = &list {
                inner.borrow_mut().push(list.clone());
            }
            list
        };
        let (a, b) = (cyclic(), cyclic());
        let err = try_eq(&a, &b).unwrap_err();
        assert!(matches!(err, Fault::Raised { ref kind, .. } if kind == "RecursionError"));
        assert!(py_eq(&a, &a));
        assert!(!py_eq(&a, &b));
    }

    #[test]
    fn test_numeric_keys_unify() {
        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::from("int")).unwrap();
        d.insert(Value::Float(1.0), Value::from("float")).unwrap();
        d.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&Value::Int(1)).unwrap().unwrap().to_str(), "bool");
    }

    #[test]
    fn test_unhashable_key() {
        let mut d = Dict::new();
        let err = d.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert!(matches!(err, Fault::Raised { ref kind, .. } if kind == "TypeError"));
    }

    #[test]
    fn test_dict_remove_keeps_order() {
        let mut d = Dict::new();
        for k in ["a", "b", "c"] {
            d.insert(Value::from(k), Value::None).unwrap();
        }
        d.remove(&Value::from("a")).unwrap();
        let keys: Vec<String> = d.keys().iter().map(|k| k.to_str()).collect();
        assert_eq!(keys, ["b", "c"]);
        assert!(d.get(&Value::from("c")).unwrap().is_some());
    }

    #[test]
    fn test_cross_type_equality_and_ordering() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::from("1"), &Value::Int(1)));
        assert_eq!(py_cmp(&Value::Int(1), &Value::Float(1.5)).unwrap(), Ordering::Less);
        assert!(py_cmp(&Value::Int(1), &Value::from("a")).is_err());
    }

    #[test]
    fn test_range_iteration() {
        let r = Value::Range(0, 10, 3);
        let items: Vec<i64> = iterate(&r).unwrap().filter_map(|v| v.as_int()).collect();
        assert_eq!(items, [0, 3, 6, 9]);
        assert_eq!(range_len(&r), 4);
        assert_eq!(range_len(&Value::Range(5, 0, -1)), 5);
        assert_eq!(range_len(&Value::Range(5, 0, 1)), 0);
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": [1, 2.5, "x", null, true]});
        let value = from_json(&json);
        assert_eq!(to_json(&value).unwrap(), json);

        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::Float(f64::NAN)).unwrap();
        assert!(to_json(&Value::dict(d)).is_err());
    }

    #[test]
    fn test_format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(1234.5), ",.1f").unwrap(), "1,234.5");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_value(&Value::from("ab"), ">5").unwrap(), "   ab");
        assert_eq!(format_value(&Value::from("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::Float(1500.0), ".2e").unwrap(), "1.50e+03");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
        assert!(format_value(&Value::from("x"), "d").is_err());
    }
}
