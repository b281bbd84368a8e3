//! Side-effect-free standard modules: `json`, `re`, `math`, `statistics`,
//! `datetime`, `base64` and `collections`.
use std::collections::BTreeMap;
use std::rc::Rc;

use base64::Engine as _;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::Value as Json;

use super::interp::Interpreter;
use super::methods::{add_counts, counted};
use super::value::*;
use super::Fault;

/// Every module a script may import, by name.
pub fn standard_modules() -> BTreeMap<&'static str, Rc<Module>> {
    [json(), re(), math(), statistics(), datetime(), b64(), collections()]
        .into_iter()
        .map(|m| (m.name, Rc::new(m)))
        .collect()
}

fn module(name: &'static str, funcs: &[Builtin], constants: Vec<(&'static str, Value)>) -> Module {
    let mut attrs: BTreeMap<&'static str, Value> = funcs
        .iter()
        .map(|f| (f.name, Value::Builtin(f.clone())))
        .collect();
    attrs.extend(constants);
    Module { name, attrs }
}

macro_rules! funcs {
    ($($name:literal => $func:path),* $(,)?) => {
        &[$(Builtin { name: $name, func: $func }),*]
    };
}

// ── json ──────────────────────────────────────────────────

fn json() -> Module {
    module("json", funcs! { "loads" => json_loads, "dumps" => json_dumps }, Vec::new())
}

fn json_loads(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("loads", 1, &["s"])?;
    let text = expect_str(args.required(0, "s", "loads")?, "the JSON object")?;
    let parsed: Json = serde_json::from_str(text)
        .map_err(|e| Fault::raised("JSONDecodeError", e.to_string()))?;
    Ok(from_json(&parsed))
}

fn json_dumps(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("dumps", 1, &["obj", "indent", "sort_keys", "ensure_ascii"])?;
    let obj = args.required(0, "obj", "dumps")?;
    let indent = match args.keyword("indent") {
        None | Some(Value::None) => None,
        Some(v) => Some(expect_int(v, "indent")?.max(0) as usize),
    };
    let mut json = to_json(obj)?;
    if args.keyword("sort_keys").map(Value::truthy).unwrap_or(false) {
        sort_keys(&mut json);
    }
    let ascii = args.keyword("ensure_ascii").map(Value::truthy).unwrap_or(true);
    let text = write_json(&json, indent, ascii);
    interp.check_alloc(text.len() as u64)?;
    Ok(Value::from(text))
}

fn sort_keys(json: &mut Json) {
    match json {
        Json::Object(map) => {
            let mut entries: Vec<(String, Json)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (k, mut v) in entries {
                sort_keys(&mut v);
                map.insert(k, v);
            }
        }
        Json::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

/// JSON text with the separators and escaping `json.dumps` produces.
pub fn dumps(json: &Json, indent: Option<usize>) -> String {
    write_json(json, indent, true)
}

fn write_json(json: &Json, indent: Option<usize>, ascii: bool) -> String {
    let mut out = String::new();
    write_json_value(json, indent, ascii, 0, &mut out);
    out
}

fn write_json_value(json: &Json, indent: Option<usize>, ascii: bool, level: usize, out: &mut String) {
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if indent.is_some() { "," } else { ", " };
    match json {
        Json::Null => out.push_str("null"),
        Json::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Json::Number(n) => match n.as_i64() {
            Some(i) => out.push_str(&i.to_string()),
            None if n.is_u64() => out.push_str(&n.to_string()),
            None => out.push_str(&float_repr(n.as_f64().unwrap_or(f64::NAN))),
        },
        Json::String(s) => write_json_string(s, ascii, out),
        Json::Array(items) if items.is_empty() => out.push_str("[]"),
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                write_json_value(item, indent, ascii, level + 1, out);
            }
            newline(out, level);
            out.push(']');
        }
        Json::Object(map) if map.is_empty() => out.push_str("{}"),
        Json::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                write_json_string(k, ascii, out);
                out.push_str(": ");
                write_json_value(v, indent, ascii, level + 1, out);
            }
            newline(out, level);
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, ascii: bool, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (ascii && !c.is_ascii()) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// ── re ────────────────────────────────────────────────────

const IGNORECASE: i64 = 2;
const MULTILINE: i64 = 8;
const DOTALL: i64 = 16;

fn re() -> Module {
    module(
        "re",
        funcs! {
            "search" => re_search,
            "match" => re_match,
            "fullmatch" => re_fullmatch,
            "findall" => re_findall,
            "sub" => re_sub,
            "split" => re_split,
        },
        vec![
            ("IGNORECASE", Value::Int(IGNORECASE)),
            ("I", Value::Int(IGNORECASE)),
            ("MULTILINE", Value::Int(MULTILINE)),
            ("M", Value::Int(MULTILINE)),
            ("DOTALL", Value::Int(DOTALL)),
            ("S", Value::Int(DOTALL)),
        ],
    )
}

fn compile(pattern: &str, flags: i64) -> Result<Regex, Fault> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags & IGNORECASE != 0)
        .multi_line(flags & MULTILINE != 0)
        .dot_matches_new_line(flags & DOTALL != 0)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| Fault::raised("re.error", e.to_string()))
}

/// `(regex, haystack)` from `(pattern, string, ..., flags=)` arguments.
fn pattern_args<'a>(args: &'a Args, func: &str, flags_at: usize) -> Result<(Regex, &'a str), Fault> {
    let pattern = expect_str(args.required(0, "pattern", func)?, "pattern")?;
    let text = expect_str(args.required(1, "string", func)?, "string")?;
    Ok((compile(pattern, flags_of(args, flags_at)?)?, text))
}

fn to_match(re: &Regex, caps: &regex::Captures<'_>, text: &str) -> Value {
    let char_at = |byte: usize| text[..byte].chars().count();
    let names = re
        .capture_names()
        .enumerate()
        .filter_map(|(i, n)| n.map(|n| (n.to_string(), i)))
        .collect();
    Value::Match(Rc::new(RegexMatch {
        groups: caps.iter().map(|g| g.map(|m| m.as_str().to_string())).collect(),
        names,
        spans: caps
            .iter()
            .map(|g| g.map(|m| (char_at(m.start()), char_at(m.end()))))
            .collect(),
    }))
}

fn re_search(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("search", 3, &["pattern", "string", "flags"])?;
    let (re, text) = pattern_args(&args, "search", 2)?;
    Ok(re
        .captures(text)
        .map(|caps| to_match(&re, &caps, text))
        .unwrap_or(Value::None))
}

fn re_match(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("match", 3, &["pattern", "string", "flags"])?;
    let pattern = expect_str(args.required(0, "pattern", "match")?, "pattern")?;
    let text = expect_str(args.required(1, "string", "match")?, "string")?;
    let re = compile(&format!(r"\A(?:{pattern})"), flags_of(&args, 2)?)?;
    Ok(re
        .captures(text)
        .map(|caps| to_match(&re, &caps, text))
        .unwrap_or(Value::None))
}

fn flags_of(args: &Args, index: usize) -> Result<i64, Fault> {
    match args.get(index, "flags") {
        Some(v) => expect_int(v, "flags"),
        None => Ok(0),
    }
}

fn re_fullmatch(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("fullmatch", 3, &["pattern", "string", "flags"])?;
    let pattern = expect_str(args.required(0, "pattern", "fullmatch")?, "pattern")?;
    let text = expect_str(args.required(1, "string", "fullmatch")?, "string")?;
    let re = compile(&format!(r"\A(?:{pattern})\z"), flags_of(&args, 2)?)?;
    Ok(re
        .captures(text)
        .map(|caps| to_match(&re, &caps, text))
        .unwrap_or(Value::None))
}

fn re_findall(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("findall", 3, &["pattern", "string", "flags"])?;
    let (re, text) = pattern_args(&args, "findall", 2)?;
    let group_text = |g: Option<regex::Match<'_>>| Value::from(g.map(|m| m.as_str()).unwrap_or(""));
    let mut out = Vec::new();
    for caps in re.captures_iter(text) {
        out.push(match re.captures_len() {
            1 => group_text(caps.get(0)),
            2 => group_text(caps.get(1)),
            n => Value::tuple((1..n).map(|i| group_text(caps.get(i))).collect()),
        });
    }
    interp.check_alloc((out.len() * std::mem::size_of::<Value>()) as u64)?;
    Ok(Value::list(out))
}

/// Rewrites Python replacement syntax (`\1`, `\g<name>`) for the regex crate.
fn translate_replacement(repl: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|c| *c != '>').collect();
                        out.push_str(&format!("${{{name}}}"));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn re_sub(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("sub", 5, &["pattern", "repl", "string", "count", "flags"])?;
    let pattern = expect_str(args.required(0, "pattern", "sub")?, "pattern")?;
    let repl = args.required(1, "repl", "sub")?.clone();
    let text = expect_str(args.required(2, "string", "sub")?, "string")?;
    let limit = match args.get(3, "count") {
        Some(v) => expect_int(v, "count")?.max(0) as usize,
        None => 0,
    };
    let re = compile(pattern, flags_of(&args, 4)?)?;

    let replaced = match &repl {
        Value::Str(r) => re
            .replacen(text, limit, translate_replacement(r).as_str())
            .into_owned(),
        callable => {
            let mut out = String::new();
            let mut last = 0;
            for (n, caps) in re.captures_iter(text).enumerate() {
                if limit > 0 && n >= limit {
                    break;
                }
                let Some(whole) = caps.get(0) else { continue };
                out.push_str(&text[last..whole.start()]);
                let piece = interp.call(callable, Args::new(vec![to_match(&re, &caps, text)]))?;
                out.push_str(expect_str(&piece, "replacement")?);
                last = whole.end();
            }
            out.push_str(&text[last..]);
            out
        }
    };
    interp.check_alloc(replaced.len() as u64)?;
    Ok(Value::from(replaced))
}

fn re_split(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("split", 4, &["pattern", "string", "maxsplit", "flags"])?;
    let (re, text) = pattern_args(&args, "split", 3)?;
    let maxsplit = match args.get(2, "maxsplit") {
        Some(v) => expect_int(v, "maxsplit")?.max(0) as usize,
        None => 0,
    };
    let mut out = Vec::new();
    let mut last = 0;
    for (n, caps) in re.captures_iter(text).enumerate() {
        if maxsplit > 0 && n >= maxsplit {
            break;
        }
        let Some(whole) = caps.get(0) else { continue };
        out.push(Value::from(&text[last..whole.start()]));
        for group in caps.iter().skip(1) {
            out.push(group.map(|m| Value::from(m.as_str())).unwrap_or(Value::None));
        }
        last = whole.end();
    }
    out.push(Value::from(&text[last..]));
    Ok(Value::list(out))
}

// ── math ──────────────────────────────────────────────────

fn math() -> Module {
    module(
        "math",
        funcs! {
            "sqrt" => math_sqrt,
            "floor" => math_floor,
            "ceil" => math_ceil,
            "log" => math_log,
            "log10" => math_log10,
            "exp" => math_exp,
            "sin" => math_sin,
            "cos" => math_cos,
            "tan" => math_tan,
            "fabs" => math_fabs,
            "pow" => math_pow,
            "isfinite" => math_isfinite,
        },
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            ("e", Value::Float(std::f64::consts::E)),
            ("inf", Value::Float(f64::INFINITY)),
        ],
    )
}

fn domain_error() -> Fault {
    Fault::value_error("math domain error")
}

fn float_arg(args: &Args, func: &str) -> Result<f64, Fault> {
    args.check(func, 1, &[])?;
    expect_float(args.required(0, "x", func)?, "must be real number")
}

/// Result of a float function, mapping a non-finite result from finite input
/// to Python's range error.
fn finite(x: f64, y: f64) -> Result<Value, Fault> {
    if y.is_infinite() && x.is_finite() {
        return Err(Fault::raised("OverflowError", "math range error"));
    }
    Ok(Value::Float(y))
}

fn to_int(f: f64) -> Result<Value, Fault> {
    if f.is_nan() {
        return Err(Fault::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() || f.abs() >= 9.223_372_036_854_776e18 {
        return Err(Fault::raised("OverflowError", "cannot convert float infinity to integer"));
    }
    Ok(Value::Int(f as i64))
}

fn math_sqrt(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let x = float_arg(&args, "sqrt")?;
    if x < 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(x.sqrt()))
}

fn math_floor(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    match args.positional.first() {
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        _ => to_int(float_arg(&args, "floor")?.floor()),
    }
}

fn math_ceil(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    match args.positional.first() {
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        _ => to_int(float_arg(&args, "ceil")?.ceil()),
    }
}

fn math_log(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("log", 2, &[])?;
    let x = expect_float(args.required(0, "x", "log")?, "must be real number")?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    match args.positional.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = expect_float(base, "must be real number")?;
            if base <= 0.0 {
                return Err(domain_error());
            }
            if base == 1.0 {
                return Err(Fault::raised("ZeroDivisionError", "float division by zero"));
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn math_log10(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let x = float_arg(&args, "log10")?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(x.log10()))
}

fn math_exp(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let x = float_arg(&args, "exp")?;
    finite(x, x.exp())
}

fn math_sin(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let x = float_arg(&args, "sin")?;
    if x.is_infinite() {
        return Err(domain_error());
    }
    Ok(Value::Float(x.sin()))
}

fn math_cos(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let x = float_arg(&args, "cos")?;
    if x.is_infinite() {
        return Err(domain_error());
    }
    Ok(Value::Float(x.cos()))
}

fn math_tan(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let x = float_arg(&args, "tan")?;
    if x.is_infinite() {
        return Err(domain_error());
    }
    Ok(Value::Float(x.tan()))
}

fn math_fabs(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::Float(float_arg(&args, "fabs")?.abs()))
}

fn math_pow(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("pow", 2, &[])?;
    let x = expect_float(args.required(0, "x", "pow")?, "must be real number")?;
    let y = expect_float(args.required(1, "y", "pow")?, "must be real number")?;
    if x < 0.0 && y.fract() != 0.0 {
        return Err(domain_error());
    }
    if x == 0.0 && y < 0.0 {
        return Err(domain_error());
    }
    finite(x, x.powf(y))
}

fn math_isfinite(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    Ok(Value::Bool(float_arg(&args, "isfinite")?.is_finite()))
}

// ── statistics ────────────────────────────────────────────

fn statistics() -> Module {
    module(
        "statistics",
        funcs! {
            "mean" => stats_mean,
            "median" => stats_median,
            "stdev" => stats_stdev,
            "pstdev" => stats_pstdev,
        },
        Vec::new(),
    )
}

fn numbers(args: &Args, func: &str, at_least: usize) -> Result<Vec<Value>, Fault> {
    args.check(func, 1, &["data"])?;
    let data = to_vec(args.required(0, "data", func)?)?;
    if let Some(bad) = data.iter().find(|v| !v.is_number()) {
        return Err(Fault::type_error(format!(
            "can't convert type '{}' to numerator/denominator",
            bad.type_name()
        )));
    }
    if data.len() < at_least {
        let message = match at_least {
            1 => format!("{func} requires at least one data point"),
            n => format!("{func} requires at least {n} data points"),
        };
        return Err(Fault::raised("StatisticsError", message));
    }
    Ok(data)
}

fn floats(data: &[Value]) -> Vec<f64> {
    data.iter().filter_map(Value::as_float).collect()
}

fn mean_of(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stats_mean(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let data = numbers(&args, "mean", 1)?;
    let ints: Option<Vec<i64>> = data
        .iter()
        .map(|v| match v {
            Value::Float(_) => None,
            v => v.as_int(),
        })
        .collect();
    if let Some(ints) = ints {
        let n = ints.len() as i128;
        let total: i128 = ints.iter().map(|i| *i as i128).sum();
        if total % n == 0 {
            return Ok(Value::Int((total / n) as i64));
        }
    }
    Ok(Value::Float(mean_of(&floats(&data))))
}

fn stats_median(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let data = numbers(&args, "median", 1)?;
    let sorted = super::methods::sorted_values(interp, data, None, false)?;
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        return Ok(sorted[mid].clone());
    }
    let pair = floats(&sorted[mid - 1..=mid]);
    Ok(Value::Float((pair[0] + pair[1]) / 2.0))
}

fn variance(xs: &[f64], ddof: usize) -> f64 {
    let m = mean_of(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - ddof) as f64
}

fn stats_stdev(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let data = numbers(&args, "stdev", 2)?;
    Ok(Value::Float(variance(&floats(&data), 1).sqrt()))
}

fn stats_pstdev(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    let data = numbers(&args, "pstdev", 1)?;
    Ok(Value::Float(variance(&floats(&data), 0).sqrt()))
}

// ── datetime ──────────────────────────────────────────────

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

fn datetime() -> Module {
    // `from datetime import datetime` binds the same constructors.
    let class = module(
        "datetime",
        funcs! {
            "now" => dt_now,
            "utcnow" => dt_utcnow,
            "fromisoformat" => dt_fromisoformat,
            "fromtimestamp" => dt_fromtimestamp,
        },
        Vec::new(),
    );
    module(
        "datetime",
        funcs! {
            "now" => dt_now,
            "utcnow" => dt_utcnow,
            "timestamp" => dt_timestamp,
            "parse" => dt_parse,
        },
        vec![("datetime", Value::Module(Rc::new(class)))],
    )
}

fn dt_now(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("now", 0, &[])?;
    Ok(Value::from(Local::now().format(ISO_FORMAT).to_string()))
}

fn dt_utcnow(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("utcnow", 0, &[])?;
    Ok(Value::from(Utc::now().format(ISO_FORMAT).to_string()))
}

fn dt_timestamp(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("timestamp", 0, &[])?;
    Ok(Value::Float(Utc::now().timestamp_micros() as f64 / 1e6))
}

/// Seconds since the epoch for an ISO-8601 / RFC 3339 timestamp. Naive
/// values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_micros() as f64 / 1e6);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_micros() as f64 / 1e6);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp() as f64)
}

fn utc_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos)
}

fn invalid_isoformat(text: &str) -> Fault {
    Fault::value_error(format!("Invalid isoformat string: {}", str_repr(text)))
}

fn dt_fromisoformat(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("fromisoformat", 1, &["date_string"])?;
    let text = expect_str(args.required(0, "date_string", "fromisoformat")?, "date_string")?;
    let micros = parse_timestamp(text)
        .map(|ts| (ts * 1e6).round() as i64)
        .ok_or_else(|| invalid_isoformat(text))?;
    utc_from_micros(micros)
        .map(|dt| Value::from(dt.naive_utc().format(ISO_FORMAT).to_string()))
        .ok_or_else(|| invalid_isoformat(text))
}

fn dt_fromtimestamp(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("fromtimestamp", 1, &["timestamp"])?;
    let ts = expect_float(args.required(0, "timestamp", "fromtimestamp")?, "timestamp")?;
    let micros = (ts * 1e6).round();
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return Err(Fault::raised("OverflowError", "timestamp out of range for platform time_t"));
    }
    utc_from_micros(micros as i64)
        .map(|dt| Value::from(dt.with_timezone(&Local).format(ISO_FORMAT).to_string()))
        .ok_or_else(|| Fault::value_error("year is out of range"))
}

fn dt_parse(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("parse", 1, &["text"])?;
    let text = expect_str(args.required(0, "text", "parse")?, "text")?;
    parse_timestamp(text)
        .map(Value::Float)
        .ok_or_else(|| Fault::value_error(format!("Invalid isoformat string: {}", str_repr(text))))
}

// ── base64 ────────────────────────────────────────────────

fn b64() -> Module {
    module(
        "base64",
        funcs! { "b64encode" => b64_encode, "b64decode" => b64_decode },
        Vec::new(),
    )
}

fn b64_encode(interp: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("b64encode", 1, &["s"])?;
    let text = expect_str(args.required(0, "s", "b64encode")?, "s")?;
    interp.check_alloc((text.len() as u64 / 3 + 1) * 4)?;
    Ok(Value::from(
        ::base64::engine::general_purpose::STANDARD.encode(text.as_bytes()),
    ))
}

fn b64_decode(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("b64decode", 1, &["s"])?;
    let text = expect_str(args.required(0, "s", "b64decode")?, "s")?;
    let bytes = ::base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| Fault::raised("binascii.Error", e.to_string()))?;
    String::from_utf8(bytes)
        .map(Value::from)
        .map_err(|_| Fault::value_error("decoded data is not valid UTF-8"))
}

// ── collections ───────────────────────────────────────────

fn collections() -> Module {
    module(
        "collections",
        funcs! { "Counter" => counter, "defaultdict" => defaultdict },
        Vec::new(),
    )
}

fn counter(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("Counter", 1, &[])?;
    let mut counts = Dict::with_kind(DictKind::Counter);
    if let Some(source) = args.positional.first() {
        add_counts(&mut counts, counted(source)?, 1)?;
    }
    for (k, v) in &args.keywords {
        add_counts(&mut counts, vec![(Value::from(k.as_str()), expect_int(v, "count")?)], 1)?;
    }
    Ok(Value::dict(counts))
}

fn defaultdict(_: &mut Interpreter, args: Args) -> Result<Value, Fault> {
    args.check("defaultdict", 2, &[])?;
    let kind = match args.positional.first() {
        None | Some(Value::None) => DictKind::Plain,
        Some(factory @ (Value::Builtin(_) | Value::Func(_) | Value::Method(_))) => {
            DictKind::Default(factory.clone())
        }
        Some(other) => {
            return Err(Fault::type_error(format!(
                "first argument must be callable or None, not {}",
                other.type_name()
            )))
        }
    };
    let mut dict = Dict::with_kind(kind);
    match args.positional.get(1) {
        None => {}
        Some(Value::Dict(source)) => {
            for (k, v) in source.borrow().iter() {
                dict.insert(k.clone(), v.clone())?;
            }
        }
        Some(other) => {
            return Err(Fault::type_error(format!(
                "defaultdict() initial values must be a dict, not {}",
                other.type_name()
            )))
        }
    }
    Ok(Value::dict(dict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::script::parse_program;
    use crate::sandbox::surface::CapabilitySurface;
    use serde_json::json;

    fn run(source: &str) -> Result<String, Fault> {
        let mut interp = Interpreter::new(CapabilitySurface::build());
        interp.run(&parse_program(source).unwrap())?;
        Ok(interp.finish().result.unwrap().to_str())
    }

    #[test]
    fn test_dumps_python_separators() {
        let json: Json = serde_json::from_str(r#"{"b": [1, 2.5, null], "a": "é"}"#).unwrap();
        assert_eq!(dumps(&json, None), r#"{"b": [1, 2.5, null], "a": "\u00e9"}"#);
        assert_eq!(dumps(&json!([]), Some(2)), "[]");
        assert_eq!(dumps(&json!({"k": [1]}), Some(2)), "{\n  \"k\": [\n    1\n  ]\n}");
    }

    #[test]
    fn test_json_module_round_trip() {
        let out = run("import json\nresult = json.dumps(json.loads('{\"x\": [1, 2.0, true]}'), sort_keys=True)").unwrap();
        assert_eq!(out, r#"{"x": [1, 2.0, true]}"#);
    }

    #[test]
    fn test_json_decode_error_is_value_error() {
        let out = run("import json\ntry:\n    json.loads('{bad')\n    result = 'no'\nexcept ValueError:\n    result = 'caught'").unwrap();
        assert_eq!(out, "caught");
    }

    #[test]
    fn test_re_functions() {
        assert_eq!(run("import re\nresult = re.findall(r'\\d+', 'a1b22c333')").unwrap(), "['1', '22', '333']");
        assert_eq!(run("import re\nresult = re.findall(r'(\\w)=(\\d)', 'a=1 b=2')").unwrap(), "[('a', '1'), ('b', '2')]");
        assert_eq!(run("import re\nresult = re.sub(r'(\\w+)@(\\w+)', r'\\2 at \\1', 'me@host')").unwrap(), "host at me");
        assert_eq!(run("import re\nresult = re.split(r'[,;]\\s*', 'a, b;c')").unwrap(), "['a', 'b', 'c']");
        assert_eq!(run("import re\nresult = re.match('b', 'abc')").unwrap(), "None");
        assert_eq!(run("import re\nresult = re.fullmatch('a.c', 'abc').group()").unwrap(), "abc");
    }

    #[test]
    fn test_re_match_object() {
        let out = run("import re\nm = re.search(r'(?P<user>\\w+)@(?P<host>\\w+)', 'mail: ann@example')\nresult = [m.group('user'), m.group(2), m.span(), m.groupdict()]").unwrap();
        assert_eq!(out, "['ann', 'example', (6, 17), {'user': 'ann', 'host': 'example'}]");
    }

    #[test]
    fn test_re_sub_with_function() {
        let out = run("import re\nresult = re.sub(r'\\d', lambda m: str(int(m.group()) * 2), 'a1b2')").unwrap();
        assert_eq!(out, "a2b4");
    }

    #[test]
    fn test_math_and_statistics() {
        assert_eq!(run("import math\nresult = [math.sqrt(16), math.floor(2.7), math.ceil(2.1), math.log10(1000)]").unwrap(), "[4.0, 2, 3, 3.0]");
        assert_eq!(run("import statistics\nresult = [statistics.mean([1, 2, 3]), statistics.mean([1, 2]), statistics.median([3, 1, 2, 4])]").unwrap(), "[2, 1.5, 2.5]");
        assert_eq!(run("import statistics\nresult = statistics.pstdev([2, 4, 4, 4, 5, 5, 7, 9])").unwrap(), "2.0");
    }

    #[test]
    fn test_math_domain_error() {
        let err = run("import math\nresult = math.sqrt(-1)").unwrap_err();
        assert!(matches!(err, Fault::Raised { kind, .. } if kind == "ValueError"));
    }

    #[test]
    fn test_datetime_parse() {
        assert_eq!(parse_timestamp("1970-01-02"), Some(86_400.0));
        assert_eq!(parse_timestamp("1970-01-01T00:01:00Z"), Some(60.0));
        assert_eq!(parse_timestamp("1970-01-01 00:00:30"), Some(30.0));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_base64() {
        assert_eq!(run("import base64\nresult = base64.b64encode('hi there')").unwrap(), "aGkgdGhlcmU=");
        assert_eq!(run("import base64\nresult = base64.b64decode('aGkgdGhlcmU=')").unwrap(), "hi there");
    }

    #[test]
    fn test_counter() {
        let out = run("from collections import Counter\nc = Counter('abracadabra')\nc['z'] += 2\nresult = [c.most_common(2), c['q'], c.total(), isinstance(c, dict)]").unwrap();
        assert_eq!(out, "[[('a', 5), ('b', 2)], 0, 13, True]");
        let out = run("import collections\nc = collections.Counter(['x', 'y', 'x'])\nc.update(['y'])\nc.subtract({'x': 1})\nresult = c").unwrap();
        assert_eq!(out, "Counter({'x': 1, 'y': 2})");
    }

    #[test]
    fn test_defaultdict() {
        let out = run("from collections import defaultdict\ngroups = defaultdict(list)\nfor w in ['ant', 'bee', 'ape']:\n    groups[w[0]].append(w)\nresult = dict(groups)").unwrap();
        assert_eq!(out, "{'a': ['ant', 'ape'], 'b': ['bee']}");
        let out = run("from collections import defaultdict\nd = defaultdict(int)\nd['n'] += 1\nresult = [d['n'], 'm' in d, len(d)]").unwrap();
        assert_eq!(out, "[1, False, 1]");
        let err = run("from collections import defaultdict\nd = defaultdict(3)").unwrap_err();
        assert!(matches!(err, Fault::Raised { kind, .. } if kind == "TypeError"));
    }

    #[test]
    fn test_datetime_class_binding() {
        let out = run("from datetime import datetime\nresult = datetime.fromisoformat('2024-03-01T12:30:00Z')").unwrap();
        assert_eq!(out, "2024-03-01T12:30:00.000000");
        let out = run("from datetime import datetime\nresult = len(datetime.now()) > 0").unwrap();
        assert_eq!(out, "True");
        let err = run("import datetime\nresult = datetime.datetime.fromisoformat('soon')").unwrap_err();
        assert!(matches!(err, Fault::Raised { kind, .. } if kind == "ValueError"));
    }
}
