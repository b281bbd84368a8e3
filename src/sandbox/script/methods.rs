//! Methods on `str`, `list`, `dict` and `set`, plus `%` and `str.format`
//! formatting.
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use super::interp::{contains, normalize_index, Interpreter};
use super::value::*;
use super::Fault;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "rsplit", "join", "replace",
    "startswith", "endswith", "find", "rfind", "index", "count", "format", "isdigit", "isalpha",
    "isalnum", "isspace", "isupper", "islower", "title", "capitalize", "splitlines", "ljust",
    "rjust", "center", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "update", "setdefault", "copy", "clear",
];

const COUNTER_METHODS: &[&str] = &["most_common", "total", "subtract"];

const SET_METHODS: &[&str] = &[
    "add", "discard", "remove", "pop", "update", "union", "intersection", "difference",
    "issubset", "issuperset", "copy", "clear",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

const MATCH_METHODS: &[&str] = &["group", "groups", "groupdict", "start", "end", "span"];

/// Resolves `receiver.name` to a method the receiver's type supports.
pub fn lookup(receiver: &Value, name: &str) -> Option<&'static str> {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(d) if matches!(d.borrow().kind, DictKind::Counter) => {
            if let Some(m) = COUNTER_METHODS.iter().copied().find(|m| *m == name) {
                return Some(m);
            }
            DICT_METHODS
        }
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Match(_) => MATCH_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|m| *m == name)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &'static str,
    args: Args,
) -> Result<Value, Fault> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Dict(_) => dict_method(receiver, name, args),
        Value::Set(keys) => set_method(keys, name, args),
        Value::Tuple(items) => seq_method(items, name, &args),
        Value::Match(m) => match_method(m, name, &args),
        other => Err(Fault::raised(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        )),
    }
}

/// Character offset of a byte offset.
fn char_offset(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn opt_str<'a>(args: &'a Args, index: usize, name: &str, what: &str) -> Result<Option<&'a str>, Fault> {
    match args.get(index, name) {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(expect_str(v, what)?)),
    }
}

fn pad(interp: &Interpreter, s: &str, args: &Args, name: &str) -> Result<(usize, char), Fault> {
    let width = expect_int(args.required(0, "width", name)?, "width")?.max(0) as u64;
    interp.check_alloc(width.saturating_mul(4))?;
    let fill = match opt_str(args, 1, "fillchar", "fillchar")? {
        Some(f) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
        Some(_) => {
            return Err(Fault::type_error(
                "The fill character must be exactly one character long",
            ))
        }
        None => ' ',
    };
    let len = s.chars().count() as u64;
    Ok((width.saturating_sub(len) as usize, fill))
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: Args) -> Result<Value, Fault> {
    let fill = |n: usize, c: char| c.to_string().repeat(n);
    let v = match name {
        "upper" => Value::from(s.to_uppercase()),
        "lower" => Value::from(s.to_lowercase()),
        "strip" | "lstrip" | "rstrip" => {
            let chars = opt_str(&args, 0, "chars", "strip arg")?;
            let matcher = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::from(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            })
        }
        "split" | "rsplit" => {
            let sep = opt_str(&args, 0, "sep", "separator")?;
            let maxsplit = match args.get(1, "maxsplit") {
                Some(v) => expect_int(v, "maxsplit")?,
                None => -1,
            };
            Value::list(split(s, sep, maxsplit, name == "rsplit")?)
        }
        "join" => {
            let items = to_vec(args.required(0, "iterable", "join")?)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(Fault::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Value::from(parts.join(s))
        }
        "replace" => {
            let old = expect_str(args.required(0, "old", "replace")?, "replace() argument 1")?;
            let new = expect_str(args.required(1, "new", "replace")?, "replace() argument 2")?;
            let count = match args.get(2, "count") {
                Some(v) => expect_int(v, "count")?,
                None => -1,
            };
            let growth = new.len().saturating_sub(old.len()).max(1) as u64;
            interp.check_alloc((s.len() as u64 + 1).saturating_mul(growth))?;
            Value::from(if count < 0 {
                s.replace(old, new)
            } else {
                s.replacen(old, new, count as usize)
            })
        }
        "startswith" | "endswith" => {
            let arg = args.required(0, "prefix", name)?;
            let candidates = match arg {
                Value::Tuple(items) => items.as_ref().clone(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for c in &candidates {
                let c = expect_str(c, name)?;
                hit |= if name == "startswith" { s.starts_with(c) } else { s.ends_with(c) };
            }
            Value::Bool(hit)
        }
        "find" | "rfind" | "index" => {
            let sub = expect_str(args.required(0, "sub", name)?, "substring")?;
            let found = if name == "rfind" { s.rfind(sub) } else { s.find(sub) };
            match found {
                Some(byte) => Value::Int(char_offset(s, byte)),
                None if name == "index" => return Err(Fault::value_error("substring not found")),
                None => Value::Int(-1),
            }
        }
        "count" => {
            let sub = expect_str(args.required(0, "sub", "count")?, "substring")?;
            if sub.is_empty() {
                Value::Int(s.chars().count() as i64 + 1)
            } else {
                Value::Int(s.matches(sub).count() as i64)
            }
        }
        "format" => Value::from(str_format(s, &args)?),
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "isupper" => Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase),
        ),
        "islower" => Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase),
        ),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_alpha = false;
            for c in s.chars() {
                if prev_alpha {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                prev_alpha = c.is_alphabetic();
            }
            Value::from(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            Value::from(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "splitlines" => Value::list(s.lines().map(Value::from).collect()),
        "ljust" => {
            let (n, c) = pad(interp, s, &args, name)?;
            Value::from(format!("{s}{}", fill(n, c)))
        }
        "rjust" => {
            let (n, c) = pad(interp, s, &args, name)?;
            Value::from(format!("{}{s}", fill(n, c)))
        }
        "center" => {
            let (n, c) = pad(interp, s, &args, name)?;
            let width = n + s.chars().count();
            let left = n / 2 + (n & width & 1);
            Value::from(format!("{}{s}{}", fill(left, c), fill(n - left, c)))
        }
        "zfill" => {
            let width = expect_int(args.required(0, "width", name)?, "width")?.max(0) as usize;
            interp.check_alloc(width as u64)?;
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            let n = width.saturating_sub(s.chars().count());
            Value::from(format!("{sign}{}{digits}", "0".repeat(n)))
        }
        _ => return Err(no_attribute("str", name)),
    };
    Ok(v)
}

fn split(s: &str, sep: Option<&str>, maxsplit: i64, from_right: bool) -> Result<Vec<Value>, Fault> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };
    let parts: Vec<&str> = match sep {
        Some("") => return Err(Fault::value_error("empty separator")),
        Some(sep) if from_right => {
            let mut parts: Vec<&str> = s.rsplitn(limit, sep).collect();
            parts.reverse();
            parts
        }
        Some(sep) => s.splitn(limit, sep).collect(),
        None => {
            let words: Vec<&str> = s.split_whitespace().collect();
            if words.len() <= limit {
                words
            } else if from_right {
                // Re-join the leading words that exceed the split budget.
                let keep = limit - 1;
                let head_end = s.trim_end().len();
                let mut tail: Vec<&str> = words[words.len() - keep..].to_vec();
                let mut cursor = head_end;
                for w in tail.iter().rev() {
                    cursor = s[..cursor].rfind(w).unwrap_or(0);
                }
                let head = s[..cursor].trim_end();
                let mut out = vec![head.trim_start()];
                out.append(&mut tail);
                out
            } else {
                let keep = limit - 1;
                let mut out: Vec<&str> = words[..keep].to_vec();
                let mut cursor = 0;
                for w in &out {
                    cursor = s[cursor..].find(w).map(|p| p + cursor + w.len()).unwrap_or(cursor);
                }
                out.push(s[cursor..].trim_start());
                out
            }
        }
    };
    Ok(parts.into_iter().map(Value::from).collect())
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value, Fault> {
    let Value::List(list) = receiver else {
        return Err(no_attribute(receiver.type_name(), name));
    };
    let v = match name {
        "append" => {
            let item = args.required(0, "object", "append")?.clone();
            list.borrow_mut().push(item);
            Value::None
        }
        "extend" => {
            let extra = to_vec(args.required(0, "iterable", "extend")?)?;
            list.borrow_mut().extend(extra);
            Value::None
        }
        "pop" => {
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(Fault::raised("IndexError", "pop from empty list"));
            }
            let i = match args.get(0, "index") {
                Some(idx) => normalize_index(idx, items.len(), "pop")?,
                None => items.len() - 1,
            };
            items.remove(i)
        }
        "insert" => {
            let index = expect_int(args.required(0, "index", "insert")?, "index")?;
            let item = args.required(1, "object", "insert")?.clone();
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, item);
            Value::None
        }
        "remove" => {
            let target = args.required(0, "value", "remove")?;
            let mut items = list.borrow_mut();
            match items.iter().position(|v| py_eq(v, target)) {
                Some(i) => {
                    items.remove(i);
                }
                None => return Err(Fault::value_error("list.remove(x): x not in list")),
            }
            Value::None
        }
        "index" | "count" => {
            let snapshot = list.borrow().clone();
            return seq_method(&snapshot, name, &args);
        }
        "sort" => {
            args.check("sort", 0, &["key", "reverse"])?;
            let reverse = args.keyword("reverse").map(Value::truthy).unwrap_or(false);
            let snapshot = list.borrow().clone();
            let sorted = sorted_values(interp, snapshot, args.keyword("key"), reverse)?;
            *list.borrow_mut() = sorted;
            Value::None
        }
        "reverse" => {
            list.borrow_mut().reverse();
            Value::None
        }
        "copy" => Value::list(list.borrow().clone()),
        "clear" => {
            list.borrow_mut().clear();
            Value::None
        }
        _ => return Err(no_attribute("list", name)),
    };
    Ok(v)
}

fn seq_method(items: &[Value], name: &str, args: &Args) -> Result<Value, Fault> {
    let target = args.required(0, "value", name)?;
    match name {
        "index" => items
            .iter()
            .position(|v| py_eq(v, target))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| Fault::value_error(format!("{} is not in list", target.repr()))),
        "count" => Ok(Value::Int(items.iter().filter(|v| py_eq(v, target)).count() as i64)),
        _ => Err(no_attribute("tuple", name)),
    }
}

fn dict_method(receiver: &Value, name: &str, args: Args) -> Result<Value, Fault> {
    let Value::Dict(dict) = receiver else {
        return Err(no_attribute(receiver.type_name(), name));
    };
    let counter = matches!(dict.borrow().kind, DictKind::Counter);
    let v = match name {
        "update" | "subtract" if counter => {
            let sign = if name == "update" { 1 } else { -1 };
            let counts = match args.positional.first() {
                Some(source) => counted(source)?,
                None => Vec::new(),
            };
            add_counts(&mut dict.borrow_mut(), counts, sign)?;
            Value::None
        }
        "most_common" => {
            let mut entries: Vec<(Value, f64)> = Vec::new();
            for (k, v) in dict.borrow().iter() {
                entries.push((k.clone(), expect_float(v, "count")?));
            }
            // Stable: equal counts keep insertion order.
            entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            let limit = match args.get(0, "n") {
                None | Some(Value::None) => entries.len(),
                Some(n) => expect_int(n, "n")?.max(0) as usize,
            };
            let d = dict.borrow();
            let mut out = Vec::new();
            for (k, _) in entries.into_iter().take(limit) {
                let count = d.get(&k)?.unwrap_or(Value::Int(0));
                out.push(Value::tuple(vec![k, count]));
            }
            Value::list(out)
        }
        "total" => {
            let mut total: i64 = 0;
            for v in dict.borrow().values() {
                total = total
                    .checked_add(expect_int(&v, "count")?)
                    .ok_or_else(Fault::overflow)?;
            }
            Value::Int(total)
        }
        "get" => {
            let key = args.required(0, "key", "get")?;
            let found = dict.borrow().get(key)?;
            found.unwrap_or_else(|| args.get(1, "default").cloned().unwrap_or(Value::None))
        }
        "keys" => Value::list(dict.borrow().keys()),
        "values" => Value::list(dict.borrow().values()),
        "items" => Value::list(dict.borrow().items()),
        "pop" => {
            let key = args.required(0, "key", "pop")?;
            let removed = dict.borrow_mut().remove(key)?;
            match (removed, args.get(1, "default")) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(Fault::raised("KeyError", key.repr())),
            }
        }
        "update" => {
            let mut updates: Vec<(Value, Value)> = Vec::new();
            match args.positional.first() {
                Some(Value::Dict(other)) => updates.extend(other.borrow().iter().cloned()),
                Some(other) => {
                    for pair in to_vec(other)? {
                        let kv = to_vec(&pair)?;
                        if kv.len() != 2 {
                            return Err(Fault::value_error(
                                "dictionary update sequence element has wrong length",
                            ));
                        }
                        updates.push((kv[0].clone(), kv[1].clone()));
                    }
                }
                None => {}
            }
            for (k, v) in &args.keywords {
                updates.push((Value::from(k.as_str()), v.clone()));
            }
            let mut target = dict.borrow_mut();
            for (k, v) in updates {
                target.insert(k, v)?;
            }
            Value::None
        }
        "setdefault" => {
            let key = args.required(0, "key", "setdefault")?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            let existing = dict.borrow().get(key)?;
            match existing {
                Some(v) => v,
                None => {
                    dict.borrow_mut().insert(key.clone(), default.clone())?;
                    default
                }
            }
        }
        "copy" => Value::dict(dict.borrow().clone()),
        "clear" => {
            dict.borrow_mut().clear();
            Value::None
        }
        _ => return Err(no_attribute("dict", name)),
    };
    Ok(v)
}

/// `(item, count)` pairs from a mapping of counts or an iterable of items.
pub fn counted(source: &Value) -> Result<Vec<(Value, i64)>, Fault> {
    match source {
        Value::Dict(d) => d
            .borrow()
            .iter()
            .map(|(k, v)| Ok((k.clone(), expect_int(v, "count")?)))
            .collect(),
        other => Ok(to_vec(other)?.into_iter().map(|item| (item, 1)).collect()),
    }
}

pub fn add_counts(target: &mut Dict, counts: Vec<(Value, i64)>, sign: i64) -> Result<(), Fault> {
    for (key, n) in counts {
        let current = match target.get(&key)? {
            Some(v) => expect_int(&v, "count")?,
            None => 0,
        };
        let updated = n
            .checked_mul(sign)
            .and_then(|n| current.checked_add(n))
            .ok_or_else(Fault::overflow)?;
        target.insert(key, Value::Int(updated))?;
    }
    Ok(())
}

fn set_method(keys: &Rc<RefCell<Dict>>, name: &str, args: Args) -> Result<Value, Fault> {
    let other = |i: usize| -> Result<Vec<Value>, Fault> {
        match args.positional.get(i) {
            Some(v) => to_vec(v),
            None => Ok(Vec::new()),
        }
    };
    let v = match name {
        "add" => {
            let item = args.required(0, "elem", "add")?.clone();
            keys.borrow_mut().insert(item, Value::None)?;
            Value::None
        }
        "discard" | "remove" => {
            let item = args.required(0, "elem", name)?;
            if keys.borrow_mut().remove(item)?.is_none() && name == "remove" {
                return Err(Fault::raised("KeyError", item.repr()));
            }
            Value::None
        }
        "pop" => {
            let first = keys.borrow().keys().into_iter().next();
            let Some(item) = first else {
                return Err(Fault::raised("KeyError", "'pop from an empty set'"));
            };
            keys.borrow_mut().remove(&item)?;
            item
        }
        "update" => {
            let mut extra = Vec::new();
            for i in 0..args.len() {
                extra.extend(other(i)?);
            }
            let mut keys = keys.borrow_mut();
            for item in extra {
                keys.insert(item, Value::None)?;
            }
            Value::None
        }
        "union" => {
            let mut items = keys.borrow().keys();
            for i in 0..args.len() {
                items.extend(other(i)?);
            }
            Value::set(items)?
        }
        "intersection" | "difference" => {
            let mut items = keys.borrow().keys();
            for i in 0..args.len() {
                let filter = Value::set(other(i)?)?;
                let mut kept = Vec::new();
                for item in items {
                    if contains(&filter, &item)? == (name == "intersection") {
                        kept.push(item);
                    }
                }
                items = kept;
            }
            Value::set(items)?
        }
        "issubset" | "issuperset" => {
            let theirs = Value::set(other(0)?)?;
            let ours = Value::Set(keys.clone());
            let (inner, outer) = if name == "issubset" { (&ours, &theirs) } else { (&theirs, &ours) };
            let mut all = true;
            for item in to_vec(inner)? {
                if !contains(outer, &item)? {
                    all = false;
                    break;
                }
            }
            Value::Bool(all)
        }
        "copy" => Value::Set(Rc::new(RefCell::new(keys.borrow().clone()))),
        "clear" => {
            keys.borrow_mut().clear();
            Value::None
        }
        _ => return Err(no_attribute("set", name)),
    };
    Ok(v)
}

fn no_attribute(type_name: &str, name: &str) -> Fault {
    Fault::raised(
        "AttributeError",
        format!("'{type_name}' object has no attribute '{name}'"),
    )
}

fn match_group_index(m: &RegexMatch, group: &Value) -> Result<usize, Fault> {
    let index = match group {
        Value::Str(name) => m
            .names
            .iter()
            .find(|(n, _)| n.as_str() == &**name)
            .map(|(_, i)| *i),
        v => v.as_int().and_then(|i| usize::try_from(i).ok()),
    };
    index
        .filter(|i| *i < m.groups.len())
        .ok_or_else(|| Fault::raised("IndexError", "no such group"))
}

fn group_value(m: &RegexMatch, index: usize) -> Value {
    m.groups[index].as_deref().map(Value::from).unwrap_or(Value::None)
}

fn match_method(m: &RegexMatch, name: &str, args: &Args) -> Result<Value, Fault> {
    match name {
        "group" => match args.positional.as_slice() {
            [] => Ok(group_value(m, 0)),
            [single] => Ok(group_value(m, match_group_index(m, single)?)),
            many => Ok(Value::tuple(
                many.iter()
                    .map(|g| match_group_index(m, g).map(|i| group_value(m, i)))
                    .collect::<Result<_, _>>()?,
            )),
        },
        "groups" => Ok(Value::tuple(
            (1..m.groups.len()).map(|i| group_value(m, i)).collect(),
        )),
        "groupdict" => {
            let mut out = Dict::new();
            for (group, index) in &m.names {
                out.insert(Value::from(group.as_str()), group_value(m, *index))?;
            }
            Ok(Value::dict(out))
        }
        "start" | "end" | "span" => {
            let index = match args.positional.first() {
                Some(g) => match_group_index(m, g)?,
                None => 0,
            };
            let (start, end) = m.spans[index]
                .map(|(s, e)| (s as i64, e as i64))
                .unwrap_or((-1, -1));
            Ok(match name {
                "start" => Value::Int(start),
                "end" => Value::Int(end),
                _ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
            })
        }
        _ => Err(Fault::raised(
            "AttributeError",
            format!("'re.Match' object has no attribute '{name}'"),
        )),
    }
}

/// Stable sort with an optional key function; comparison errors propagate.
pub fn sorted_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Result<Vec<Value>, Fault> {
    let keys = match key {
        Some(Value::None) | None => items.clone(),
        Some(func) => items
            .iter()
            .map(|v| interp.call(func, Args::new(vec![v.clone()])))
            .collect::<Result<Vec<_>, _>>()?,
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match py_cmp(&keys[a], &keys[b]) {
        Ok(o) if reverse => o.reverse(),
        Ok(o) => o,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

/// `"..." % args`.
pub fn percent_format(fmt: &str, args: &Value) -> Result<String, Fault> {
    let positional = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(d) => Some(d.clone()),
        _ => None,
    };
    let mut next = positional.into_iter();
    let chars: Vec<char> = fmt.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    let incomplete = || Fault::value_error("incomplete format");

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }
        let mut value = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..].iter().position(|&c| c == ')').ok_or_else(incomplete)? + i;
            let key: String = chars[i + 1..close].iter().collect();
            let dict = mapping
                .as_ref()
                .ok_or_else(|| Fault::type_error("format requires a mapping"))?;
            value = Some(
                dict.borrow()
                    .get_str(&key)
                    .ok_or_else(|| Fault::raised("KeyError", Value::from(key.as_str()).repr()))?,
            );
            i = close + 1;
        }
        let mut spec = String::new();
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => spec.insert(0, '<'),
                '+' | ' ' | '0' if !spec.chars().any(|c| c.is_ascii_digit()) => spec.push(c),
                '0'..='9' | '.' => spec.push(c),
                _ => break,
            }
            i += 1;
        }
        let conv = *chars.get(i).ok_or_else(incomplete)?;
        i += 1;
        let value = match value {
            Some(v) => v,
            None => next
                .next()
                .ok_or_else(|| Fault::type_error("not enough arguments for format string"))?,
        };
        let piece = match conv {
            's' => format_value(&Value::from(value.to_str()), &spec)?,
            'r' => format_value(&Value::from(value.repr()), &spec)?,
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    v if v.as_int().is_some() => v.clone(),
                    other => {
                        return Err(Fault::type_error(format!(
                            "%d format: a real number is required, not {}",
                            other.type_name()
                        )))
                    }
                };
                format_value(&n, &format!("{spec}d"))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                format_value(&value, &format!("{spec}{conv}"))?
            }
            'c' => match &value {
                Value::Str(s) => s.to_string(),
                v => v
                    .as_int()
                    .and_then(|n| u32::try_from(n).ok())
                    .and_then(char::from_u32)
                    .map(String::from)
                    .ok_or_else(|| Fault::type_error("%c requires int or char"))?,
            },
            other => {
                return Err(Fault::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        };
        out.push_str(&piece);
    }
    if mapping.is_none() && next.next().is_some() {
        return Err(Fault::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// `"...".format(*args, **kwargs)`.
pub fn str_format(fmt: &str, args: &Args) -> Result<String, Fault> {
    let chars: Vec<char> = fmt.chars().collect();
    let mut out = String::new();
    let mut auto = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            out.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(Fault::value_error("Single '}' encountered in format string"));
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        let close = chars[i..]
            .iter()
            .position(|&c| c == '}')
            .ok_or_else(|| Fault::value_error("Single '{' encountered in format string"))?
            + i;
        let field: String = chars[i + 1..close].iter().collect();
        let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
        let (name, conversion) = match head.split_once('!') {
            Some((n, c)) => (n, Some(c)),
            None => (head, None),
        };
        let value = if name.is_empty() {
            let v = args.positional.get(auto).cloned();
            auto += 1;
            v.ok_or_else(|| {
                Fault::raised("IndexError", "Replacement index out of range for positional args tuple")
            })?
        } else if let Ok(index) = name.parse::<usize>() {
            args.positional.get(index).cloned().ok_or_else(|| {
                Fault::raised("IndexError", format!("Replacement index {index} out of range"))
            })?
        } else {
            if name.contains(['.', '[']) {
                return Err(Fault::value_error("attribute and index lookups are not supported in format fields"));
            }
            args.keyword(name)
                .cloned()
                .ok_or_else(|| Fault::raised("KeyError", Value::from(name).repr()))?
        };
        let value = match conversion {
            Some("r") => Value::from(value.repr()),
            Some("s") => Value::from(value.to_str()),
            None => value,
            Some(other) => {
                return Err(Fault::value_error(format!(
                    "Unknown conversion specifier {other}"
                )))
            }
        };
        out.push_str(&format_value(&value, spec)?);
        i = close + 1;
    }
    Ok(out)
}
