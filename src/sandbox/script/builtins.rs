//! Built-in functions, exception constructors, data helpers and the
//! workspace helpers injected into every capability surface.
use std::rc::Rc;

use super::interp::{exception_matches, is_exception_kind, Interpreter};
use super::methods::sorted_values;
use super::modules::dumps;
use super::value::*;
use super::Fault;
use crate::error::SandboxError;

macro_rules! builtin_table {
    ($($name:literal => $func:path),* $(,)?) => {
        &[$(Builtin { name: $name, func: $func }),*]
    };
}

/// Primitive built-ins.
pub const BUILTINS: &[Builtin] = builtin_table! {
    "abs" => abs,
    "all" => all,
    "any" => any,
    "bin" => bin,
    "bool" => bool_,
    "chr" => chr,
    "dict" => dict,
    "divmod" => divmod,
    "enumerate" => enumerate,
    "filter" => filter,
    "float" => float,
    "format" => format,
    "hex" => hex,
    "int" => int,
    "isinstance" => isinstance,
    "iter" => iter,
    "len" => len,
    "list" => list,
    "map" => map,
    "max" => max,
    "min" => min,
    "next" => next,
    "oct" => oct,
    "ord" => ord,
    "pow" => pow,
    "print" => print,
    "range" => range,
    "repr" => repr,
    "reversed" => reversed,
    "round" => round,
    "set" => set,
    "sorted" => sorted,
    "str" => str_,
    "sum" => sum,
    "tuple" => tuple,
    "type" => type_,
    "zip" => zip,
};

macro_rules! exception_constructors {
    ($($kind:ident),* $(,)?) => {
        #[allow(non_snake_case)]
        mod ctor {
            use super::*;
            $(
                pub fn $kind(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
                    Ok(new_exception(stringify!($kind), &args))
                }
            )*
        }

        /// Exception classes usable with `raise` and `except`.
        pub const EXCEPTIONS: &[Builtin] = &[$(Builtin { name: stringify!($kind), func: ctor::$kind }),*];
    };
}

exception_constructors!(
    Exception,
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    AttributeError,
    RuntimeError,
    StopIteration,
    ZeroDivisionError,
);

/// Helpers for common data-shaping chores.
pub const DATA_HELPERS: &[Builtin] = builtin_table! {
    "filter_by_field" => filter_by_field,
    "summarize_list" => summarize_list,
    "aggregate_stats" => aggregate_stats,
    "format_output" => format_output,
};

/// The only route from a script to the filesystem.
pub const WORKSPACE_HELPERS: &[Builtin] = builtin_table! {
    "read_file" => read_file,
    "write_file" => write_file,
    "list_files" => list_files,
    "delete_file" => delete_file,
};

fn new_exception(kind: &str, args: &Args) -> Value {
    let message = match args.positional.as_slice() {
        [] => String::new(),
        [single] => single.to_str(),
        many => Value::tuple(many.to_vec()).repr(),
    };
    Value::exception(kind, message)
}

fn one<'a>(args: &'a Args, func: &str) -> Result<&'a Value, Fault> {
    if args.len() != 1 {
        return Err(Fault::type_error(format!(
            "{func}() takes exactly one argument ({} given)",
            args.len()
        )));
    }
    Ok(&args.positional[0])
}

/// Either a single iterable argument or several positional values.
fn values_of(args: &Args, func: &str) -> Result<Vec<Value>, Fault> {
    match args.positional.as_slice() {
        [] => Err(Fault::type_error(format!("{func} expected at least 1 argument, got 0"))),
        [single] => to_vec(single),
        many => Ok(many.to_vec()),
    }
}

// ── Primitives ────────────────────────────────────────────

fn abs(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    match one(&args, "abs")? {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => match v.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(Fault::overflow),
            None => Err(Fault::type_error(format!(
                "bad operand type for abs(): '{}'",
                v.type_name()
            ))),
        },
    }
}

fn all(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::Bool(iterate(one(&args, "all")?)?.all(|v| v.truthy())))
}

fn any(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::Bool(iterate(one(&args, "any")?)?.any(|v| v.truthy())))
}

fn bool_(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::Bool(args.positional.first().map(Value::truthy).unwrap_or(false)))
}

fn chr(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let code = expect_int(one(&args, "chr")?, "chr() argument")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| Fault::value_error("chr() arg not in range(0x110000)"))
}

fn dict(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let mut out = Dict::new();
    match args.positional.as_slice() {
        [] => {}
        [Value::Dict(src)] => {
            out = src.borrow().clone();
            out.kind = DictKind::Plain;
        }
        [pairs] => {
            for pair in iterate(pairs)? {
                let kv = to_vec(&pair)?;
                if kv.len() != 2 {
                    return Err(Fault::value_error(format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        kv.len()
                    )));
                }
                out.insert(kv[0].clone(), kv[1].clone())?;
            }
        }
        _ => return Err(Fault::type_error("dict expected at most 1 argument")),
    }
    for (k, v) in args.keywords {
        out.insert(Value::from(k), v)?;
    }
    Ok(Value::dict(out))
}

fn divmod(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("divmod", 2, &[])?;
    let a = args.required(0, "a", "divmod")?;
    let b = args.required(1, "b", "divmod")?;
    let q = interp.binary(super::ast::BinOp::FloorDiv, a, b)?;
    let r = interp.binary(super::ast::BinOp::Mod, a, b)?;
    Ok(Value::tuple(vec![q, r]))
}

fn enumerate(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("enumerate", 2, &["start"])?;
    let start = match args.get(1, "start") {
        Some(v) => expect_int(v, "start")?,
        None => 0,
    };
    let items = iterate(args.required(0, "iterable", "enumerate")?)?;
    let mut out = Vec::new();
    for (i, v) in items.enumerate() {
        let index = i64::try_from(i)
            .ok()
            .and_then(|i| start.checked_add(i))
            .ok_or_else(Fault::overflow)?;
        out.push(Value::tuple(vec![Value::Int(index), v]));
    }
    Ok(Value::list(out))
}

fn filter(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("filter", 2, &[])?;
    let func = args.required(0, "function", "filter")?.clone();
    let mut out = Vec::new();
    for item in iterate(args.required(1, "iterable", "filter")?)? {
        let keep = match &func {
            Value::None => item.truthy(),
            f => interp.call(f, Args::new(vec![item.clone()]))?.truthy(),
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

pub fn parse_float(s: &str) -> Option<f64> {
    let t = s.trim().replace('_', "");
    match t.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        _ => t.parse().ok(),
    }
}

fn float(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let Some(v) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    match v {
        Value::Str(s) => parse_float(s).map(Value::Float).ok_or_else(|| {
            Fault::value_error(format!("could not convert string to float: {}", v.repr()))
        }),
        v => v.as_float().map(Value::Float).ok_or_else(|| {
            Fault::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn format(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("format", 2, &[])?;
    let value = args.required(0, "value", "format")?;
    let spec = match args.get(1, "format_spec") {
        Some(s) => expect_str(s, "format_spec")?,
        None => "",
    };
    Ok(Value::from(format_value(value, spec)?))
}

fn int(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("int", 2, &["base"])?;
    let Some(v) = args.positional.first() else {
        return Ok(Value::Int(0));
    };
    let base = match args.get(1, "base") {
        Some(b) => expect_int(b, "base")?,
        None => 10,
    };
    match v {
        Value::Str(s) => {
            let cleaned = s.trim().replace('_', "");
            let (negative, digits) = match cleaned.strip_prefix('-') {
                Some(rest) => (true, rest.to_string()),
                None => (false, cleaned.trim_start_matches('+').to_string()),
            };
            let digits = match base {
                16 => digits.trim_start_matches("0x").trim_start_matches("0X").to_string(),
                8 => digits.trim_start_matches("0o").trim_start_matches("0O").to_string(),
                2 => digits.trim_start_matches("0b").trim_start_matches("0B").to_string(),
                _ => digits,
            };
            let invalid = || {
                Fault::value_error(format!(
                    "invalid literal for int() with base {base}: {}",
                    v.repr()
                ))
            };
            if !(2..=36).contains(&base) {
                return Err(Fault::value_error("int() base must be >= 2 and <= 36"));
            }
            let magnitude = i64::from_str_radix(&digits, base as u32).map_err(|_| invalid())?;
            Ok(Value::Int(if negative { -magnitude } else { magnitude }))
        }
        Value::Float(f) => {
            if f.is_nan() {
                return Err(Fault::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() || f.abs() >= 9.223_372_036_854_776e18 {
                return Err(Fault::raised(
                    "OverflowError",
                    "cannot convert float to integer",
                ));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        v => v.as_int().map(Value::Int).ok_or_else(|| {
            Fault::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn instance_of(value: &Value, class: &Value) -> Result<bool, Fault> {
    match class {
        Value::Tuple(classes) => {
            for c in classes.iter() {
                if instance_of(value, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(b) if is_exception_kind(b.name) => Ok(match value {
            Value::Exception(e) => exception_matches(&e.kind, b.name),
            _ => false,
        }),
        Value::Builtin(b) => Ok(match b.name {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "dict" => matches!(value, Value::Dict(_)),
            name => value.type_name() == name,
        }),
        other => Err(Fault::type_error(format!(
            "isinstance() arg 2 must be a type or tuple of types, not {}",
            other.type_name()
        ))),
    }
}

fn isinstance(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("isinstance", 2, &[])?;
    let value = args.required(0, "obj", "isinstance")?;
    let class = args.required(1, "class_or_tuple", "isinstance")?;
    Ok(Value::Bool(instance_of(value, class)?))
}

fn len(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let n = match one(&args, "len")? {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(d) | Value::Set(d) => d.borrow().len(),
        r @ Value::Range(..) => range_len(r),
        other => {
            return Err(Fault::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    i64::try_from(n)
        .map(Value::Int)
        .map_err(|_| Fault::raised("OverflowError", "length does not fit in an integer"))
}

fn iter(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    match one(&args, "iter")? {
        it @ Value::Iter(_) => Ok(it.clone()),
        other => Ok(Value::iterator(iterate(other)?)),
    }
}

fn next(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("next", 2, &[])?;
    let item = match args.required(0, "iterator", "next")? {
        Value::Iter(it) => it.borrow_mut().next(),
        other => {
            return Err(Fault::type_error(format!(
                "'{}' object is not an iterator",
                other.type_name()
            )))
        }
    };
    match (item, args.positional.get(1)) {
        (Some(v), _) => Ok(v),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(Fault::raised("StopIteration", "")),
    }
}

fn list(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    match args.positional.first() {
        Some(v) => Ok(Value::list(to_vec(v)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn map(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let Some((func, iterables)) = args.positional.split_first() else {
        return Err(Fault::type_error("map() must have at least two arguments."));
    };
    if iterables.is_empty() {
        return Err(Fault::type_error("map() must have at least two arguments."));
    }
    let columns = iterables.iter().map(to_vec).collect::<Result<Vec<_>, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let call_args = columns.iter().map(|c| c[i].clone()).collect();
        out.push(interp.call(func, Args::new(call_args))?);
    }
    Ok(Value::list(out))
}

fn extremum(interp: &mut Interpreter, args: Args, func: &str, want: std::cmp::Ordering) -> Result<Value, Fault> {
    args.check(func, usize::MAX, &["key", "default"])?;
    let items = values_of(&args, func)?;
    let key = args.keyword("key").filter(|k| !matches!(k, Value::None)).cloned();
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => py_cmp(&k, best_key)? == want,
        };
        if replace {
            best = Some((k, item));
        }
    }
    match best {
        Some((_, v)) => Ok(v),
        None => args
            .keyword("default")
            .cloned()
            .ok_or_else(|| Fault::value_error(format!("{func}() arg is an empty sequence"))),
    }
}

fn max(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    extremum(interp, args, "max", std::cmp::Ordering::Greater)
}

fn min(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    extremum(interp, args, "min", std::cmp::Ordering::Less)
}

/// `bin`, `oct` and `hex`: prefixed digits, sign in front of the prefix.
fn radix(args: &Args, func: &str, prefix: &str) -> Result<Value, Fault> {
    let value = one(args, func)?;
    let n = value.as_int().ok_or_else(|| {
        Fault::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })?;
    let sign = if n < 0 { "-" } else { "" };
    let digits = match prefix {
        "0b" => format!("{:b}", n.unsigned_abs()),
        "0o" => format!("{:o}", n.unsigned_abs()),
        _ => format!("{:x}", n.unsigned_abs()),
    };
    Ok(Value::from(format!("{sign}{prefix}{digits}")))
}

fn bin(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    radix(&args, "bin", "0b")
}

fn oct(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    radix(&args, "oct", "0o")
}

fn hex(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    radix(&args, "hex", "0x")
}

fn ord(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let s = expect_str(one(&args, "ord")?, "ord() argument")?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(Fault::type_error(format!(
            "ord() expected a character, but string of length {} found",
            s.chars().count()
        ))),
    }
}

fn pow(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("pow", 3, &[])?;
    let base = args.required(0, "base", "pow")?;
    let exp = args.required(1, "exp", "pow")?;
    let Some(modulus) = args.get(2, "mod") else {
        return interp.binary(super::ast::BinOp::Pow, base, exp);
    };
    let (b, e, m) = (
        expect_int(base, "pow() base")?,
        expect_int(exp, "pow() exponent")?,
        expect_int(modulus, "pow() modulus")?,
    );
    if m == 0 {
        return Err(Fault::value_error("pow() 3rd argument cannot be 0"));
    }
    if e < 0 {
        return Err(Fault::value_error("pow() 2nd argument cannot be negative when 3rd argument specified"));
    }
    let m128 = m as i128;
    let mut result: i128 = 1;
    let mut b = (b as i128).rem_euclid(m128);
    let mut e = e;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m128);
        }
        b = (b * b).rem_euclid(m128);
        e >>= 1;
    }
    if m < 0 && result > 0 {
        result += m128;
    }
    Ok(Value::Int(result as i64))
}

fn print(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("print", usize::MAX, &["sep", "end"])?;
    let sep = match args.keyword("sep") {
        Some(Value::None) | None => " ".to_string(),
        Some(v) => expect_str(v, "sep")?.to_string(),
    };
    let end = match args.keyword("end") {
        Some(Value::None) | None => "\n".to_string(),
        Some(v) => expect_str(v, "end")?.to_string(),
    };
    let mut line = args
        .positional
        .iter()
        .map(Value::to_str)
        .collect::<Vec<_>>()
        .join(&sep);
    line.push_str(&end);
    interp.print(&line);
    Ok(Value::None)
}

fn range(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("range", 3, &[])?;
    let ints = args
        .positional
        .iter()
        .map(|v| expect_int(v, "range() argument"))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(Fault::type_error("range expected at least 1 argument, got 0")),
    };
    if step == 0 {
        return Err(Fault::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(start, stop, step))
}

fn repr(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::from(one(&args, "repr")?.repr()))
}

fn reversed(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let mut items = to_vec(one(&args, "reversed")?)?;
    items.reverse();
    Ok(Value::list(items))
}

fn round(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("round", 2, &["ndigits"])?;
    let number = args.required(0, "number", "round")?;
    let ndigits = match args.get(1, "ndigits") {
        None | Some(Value::None) => None,
        Some(v) => Some(expect_int(v, "ndigits")?),
    };
    match (number, ndigits) {
        (Value::Float(f), None) => {
            let r = f.round_ties_even();
            if !r.is_finite() || r.abs() >= 9.223_372_036_854_776e18 {
                return Err(Fault::raised("OverflowError", "cannot convert float to integer"));
            }
            Ok(Value::Int(r as i64))
        }
        (Value::Float(f), Some(n)) => {
            let factor = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float((f * factor).round_ties_even() / factor))
        }
        (v, digits) => match v.as_int() {
            Some(i) => match digits {
                Some(n) if n < 0 => {
                    let factor = 10i64.checked_pow((-n) as u32).unwrap_or(i64::MAX);
                    let rounded = ((i as f64) / factor as f64).round_ties_even() as i64;
                    Ok(Value::Int(rounded.saturating_mul(factor)))
                }
                _ => Ok(Value::Int(i)),
            },
            None => Err(Fault::type_error(format!(
                "type {} doesn't define __round__ method",
                v.type_name()
            ))),
        },
    }
}

fn set(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("set", 1, &[])?;
    match args.positional.first() {
        Some(v) => Value::set(to_vec(v)?),
        None => Value::set(Vec::new()),
    }
}

fn sorted(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("sorted", 1, &["key", "reverse"])?;
    let items = to_vec(args.required(0, "iterable", "sorted")?)?;
    let reverse = args.keyword("reverse").map(Value::truthy).unwrap_or(false);
    Ok(Value::list(sorted_values(interp, items, args.keyword("key"), reverse)?))
}

fn str_(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::from(
        args.positional.first().map(Value::to_str).unwrap_or_default(),
    ))
}

fn sum(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("sum", 2, &["start"])?;
    let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(Fault::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in iterate(args.required(0, "iterable", "sum")?)? {
        total = interp.binary(super::ast::BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn tuple(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    match args.positional.first() {
        Some(v) => Ok(Value::tuple(to_vec(v)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn type_(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let value = one(&args, "type")?;
    let name = value.type_name().to_string();
    Ok(interp
        .builtin(&name)
        .unwrap_or_else(|| Value::from(format!("<class '{name}'>"))))
}

fn zip(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let columns = args.positional.iter().map(to_vec).collect::<Result<Vec<_>, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

// ── Data helpers ──────────────────────────────────────────

fn filter_by_field(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("filter_by_field", 3, &["data", "field", "value"])?;
    let data = args.required(0, "data", "filter_by_field")?;
    let field = args.required(1, "field", "filter_by_field")?;
    let wanted = args.required(2, "value", "filter_by_field")?;
    let mut out = Vec::new();
    for item in iterate(data)? {
        let Value::Dict(d) = &item else {
            return Err(Fault::raised(
                "AttributeError",
                format!("'{}' object has no attribute 'get'", item.type_name()),
            ));
        };
        let hit = d.borrow().get(field)?.map(|v| py_eq(&v, wanted)).unwrap_or(false);
        if hit {
            out.push(item.clone());
        }
    }
    Ok(Value::list(out))
}

fn summarize_list(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("summarize_list", 2, &["data", "limit"])?;
    let items = to_vec(args.required(0, "data", "summarize_list")?)?;
    let limit = match args.get(1, "limit") {
        Some(v) => expect_int(v, "limit")?.max(0) as usize,
        None => 10,
    };
    let mut out = Dict::new();
    out.insert(Value::from("count"), Value::Int(items.len() as i64))?;
    out.insert(
        Value::from("sample"),
        Value::list(items.into_iter().take(limit).collect()),
    )?;
    Ok(Value::dict(out))
}

fn aggregate_stats(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("aggregate_stats", 2, &["data", "numeric_fields", "fields"])?;
    let data = to_vec(args.required(0, "data", "aggregate_stats")?)?;
    let mut out = Dict::new();
    out.insert(Value::from("count"), Value::Int(data.len() as i64))?;
    let Some(first) = data.first() else {
        return Ok(Value::dict(out));
    };

    let fields = match args.get(1, "numeric_fields").or_else(|| args.keyword("fields")) {
        Some(Value::None) | None => match first {
            Value::Dict(d) => d
                .borrow()
                .iter()
                .filter(|(_, v)| matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_)))
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        },
        Some(list) => to_vec(list)?,
    };

    for field in fields {
        let mut values = Vec::new();
        for item in &data {
            if let Value::Dict(d) = item {
                values.push(d.borrow().get(&field)?.unwrap_or(Value::Int(0)));
            }
        }
        if values.is_empty() {
            continue;
        }
        let mut total = Value::Int(0);
        for v in &values {
            total = interp.binary(super::ast::BinOp::Add, &total, v)?;
        }
        let avg = interp.binary(super::ast::BinOp::Div, &total, &Value::Int(values.len() as i64))?;
        let list = Value::list(values);
        let lo = min(interp, Args::new(vec![list.clone()]))?;
        let hi = max(interp, Args::new(vec![list]))?;
        let name = field.to_str();
        out.insert(Value::from(format!("{name}_sum")), total)?;
        out.insert(Value::from(format!("{name}_avg")), avg)?;
        out.insert(Value::from(format!("{name}_min")), lo)?;
        out.insert(Value::from(format!("{name}_max")), hi)?;
    }
    Ok(Value::dict(out))
}

fn format_output(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("format_output", 2, &["data", "max_chars"])?;
    let data = args.required(0, "data", "format_output")?;
    let max_chars = match args.get(1, "max_chars") {
        Some(v) => expect_int(v, "max_chars")?.max(0) as usize,
        None => 5000,
    };
    let text = dumps(&to_json(data)?, Some(2));
    Ok(Value::from(text.chars().take(max_chars).collect::<String>()))
}

// ── Workspace helpers ─────────────────────────────────────

fn workspace_fault(err: SandboxError) -> Fault {
    match err {
        SandboxError::CapabilityViolation(m) => Fault::Capability(m),
        SandboxError::NotFound(m) => Fault::raised("FileNotFoundError", m),
        SandboxError::Validation(m) => Fault::value_error(m),
        other => Fault::raised("OSError", other.to_string()),
    }
}

fn path_arg<'a>(args: &'a Args, func: &str) -> Result<&'a str, Fault> {
    expect_str(args.required(0, "path", func)?, "path")
}

fn read_file(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("read_file", 1, &["path"])?;
    let path = path_arg(&args, "read_file")?;
    let text = interp.workspace()?.read(path).map_err(workspace_fault)?;
    Ok(Value::from(text))
}

fn write_file(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("write_file", 2, &["path", "content"])?;
    let path = path_arg(&args, "write_file")?;
    let content = args.required(1, "content", "write_file")?.to_str();
    let written = interp
        .workspace()?
        .write(path, &content)
        .map_err(workspace_fault)?;
    Ok(Value::from(format!("Written {written} bytes to {path}")))
}

fn list_files(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("list_files", 1, &["dir"])?;
    let dir = match args.get(0, "dir") {
        Some(v) => expect_str(v, "dir")?,
        None => ".",
    };
    let files = interp.workspace()?.list(dir).map_err(workspace_fault)?;
    Ok(Value::list(
        files.into_iter().map(|f| Value::Str(Rc::from(f))).collect(),
    ))
}

fn delete_file(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("delete_file", 1, &["path"])?;
    let path = path_arg(&args, "delete_file")?;
    interp.workspace()?.delete(path).map_err(workspace_fault)?;
    Ok(Value::from(format!("Deleted {path}")))
}
