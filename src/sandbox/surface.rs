//! The capability surface: the complete set of names sandboxed code can
//! reach, plus the static screen applied before a worker is ever started.
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::script::ast::{Comprehension, Expr, FPart, Program, Stmt, StmtKind, Target};
use super::script::builtins::{BUILTINS, DATA_HELPERS, EXCEPTIONS, WORKSPACE_HELPERS};
use super::script::modules::standard_modules;
use super::script::value::{Module, Value};
use crate::error::SandboxError;

/// Modules `import` can resolve.
pub const ALLOWED_MODULES: &[&str] = &[
    "base64",
    "collections",
    "datetime",
    "json",
    "math",
    "re",
    "statistics",
];

/// Dangerous built-ins, named here so screening can report them precisely.
pub const BLOCKED_NAMES: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "input",
    "breakpoint",
    "help",
    "memoryview",
];

/// Modules that are never importable.
pub const BLOCKED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "pathlib",
    "urllib",
    "requests",
    "http",
    "ftplib",
    "smtplib",
    "telnetlib",
    "ssl",
    "ctypes",
    "pickle",
    "importlib",
    "builtins",
    "multiprocessing",
    "threading",
    "signal",
];

/// Value of the `workspace` binding. The host path is never exposed.
pub const WORKSPACE_LABEL: &str = "<workspace>";

/// Built fresh for every execution; nothing leaks between runs.
pub struct CapabilitySurface {
    builtins: HashMap<&'static str, Value>,
    modules: BTreeMap<&'static str, Rc<Module>>,
}

impl CapabilitySurface {
    pub fn build() -> Self {
        let mut builtins: HashMap<&'static str, Value> = BUILTINS
            .iter()
            .chain(EXCEPTIONS)
            .chain(DATA_HELPERS)
            .chain(WORKSPACE_HELPERS)
            .map(|b| (b.name, Value::Builtin(b.clone())))
            .collect();
        builtins.insert("workspace", Value::from(WORKSPACE_LABEL));

        let modules = standard_modules()
            .into_iter()
            .filter(|(name, _)| ALLOWED_MODULES.contains(name))
            .collect();

        Self { builtins, modules }
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(name).cloned()
    }

    pub fn module(&self, name: &str) -> Option<Rc<Module>> {
        self.modules.get(name).cloned()
    }
}

/// Rejects, before execution, imports outside the allow-list, dunder
/// attribute access and references to blocked built-ins.
pub fn screen(program: &Program) -> Result<(), SandboxError> {
    Screen.block(&program.body)
}

struct Screen;

impl Screen {
    fn block(&self, body: &[Stmt]) -> Result<(), SandboxError> {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn import(&self, module: &str, line: usize) -> Result<(), SandboxError> {
        let root = module.split('.').next().unwrap_or(module);
        if ALLOWED_MODULES.contains(&module) {
            return Ok(());
        }
        let reason = if BLOCKED_MODULES.contains(&root) {
            "is blocked"
        } else {
            "is not allowed"
        };
        Err(SandboxError::capability(format!(
            "import of module '{module}' {reason} (line {line})"
        )))
    }

    fn stmt(&self, stmt: &Stmt) -> Result<(), SandboxError> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e, line),
            StmtKind::While(cond, body) => {
                self.expr(cond, line)?;
                self.block(body)
            }
            StmtKind::Assign(targets, value) => {
                targets.iter().try_for_each(|t| self.target(t, line))?;
                self.expr(value, line)
            }
            StmtKind::AugAssign(target, _, value) => {
                self.target(target, line)?;
                self.expr(value, line)
            }
            StmtKind::If(branches, orelse) => {
                for (cond, body) in branches {
                    self.expr(cond, line)?;
                    self.block(body)?;
                }
                orelse.as_deref().map_or(Ok(()), |b| self.block(b))
            }
            StmtKind::For(target, iter, body) => {
                self.target(target, line)?;
                self.expr(iter, line)?;
                self.block(body)
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => Ok(()),
            StmtKind::Return(value) | StmtKind::Raise(value) => {
                value.as_ref().map_or(Ok(()), |e| self.expr(e, line))
            }
            StmtKind::Assert(cond, message) => {
                self.expr(cond, line)?;
                message.as_ref().map_or(Ok(()), |e| self.expr(e, line))
            }
            StmtKind::Del(targets) => targets.iter().try_for_each(|t| self.target(t, line)),
            StmtKind::Def(def) => {
                self.name(&def.name, line)?;
                for param in &def.params {
                    if let Some(default) = &param.default {
                        self.expr(default, line)?;
                    }
                }
                self.block(&def.body)
            }
            StmtKind::Import(aliases) => aliases.iter().try_for_each(|a| self.import(&a.name, line)),
            StmtKind::FromImport(module, aliases) => {
                self.import(module, line)?;
                aliases.iter().try_for_each(|a| self.attr(&a.name, line))
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                self.block(body)?;
                for handler in handlers {
                    self.block(&handler.body)?;
                }
                orelse.as_deref().map_or(Ok(()), |b| self.block(b))?;
                finally.as_deref().map_or(Ok(()), |b| self.block(b))
            }
        }
    }

    fn target(&self, target: &Target, line: usize) -> Result<(), SandboxError> {
        match target {
            Target::Name(_) => Ok(()),
            Target::Index(obj, index) => {
                self.expr(obj, line)?;
                self.expr(index, line)
            }
            Target::Attr(obj, name) => {
                self.attr(name, line)?;
                self.expr(obj, line)
            }
            Target::Tuple(targets) => targets.iter().try_for_each(|t| self.target(t, line)),
        }
    }

    fn name(&self, name: &str, line: usize) -> Result<(), SandboxError> {
        if BLOCKED_NAMES.contains(&name) || name.starts_with("__") {
            return Err(SandboxError::capability(format!(
                "use of '{name}' is blocked (line {line})"
            )));
        }
        Ok(())
    }

    fn attr(&self, name: &str, line: usize) -> Result<(), SandboxError> {
        if name.starts_with("__") {
            return Err(SandboxError::capability(format!(
                "access to attribute '{name}' is blocked (line {line})"
            )));
        }
        Ok(())
    }

    fn comprehension(&self, clauses: &[Comprehension], line: usize) -> Result<(), SandboxError> {
        for clause in clauses {
            self.target(&clause.target, line)?;
            self.expr(&clause.iter, line)?;
            clause.conds.iter().try_for_each(|c| self.expr(c, line))?;
        }
        Ok(())
    }

    fn expr(&self, expr: &Expr, line: usize) -> Result<(), SandboxError> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::FString(parts) => parts.iter().try_for_each(|p| match p {
                FPart::Lit(_) => Ok(()),
                FPart::Expr(e, _) => self.expr(e, line),
            }),
            Expr::Name(name) => self.name(name, line),
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                items.iter().try_for_each(|e| self.expr(e, line))
            }
            Expr::Dict(entries) => entries.iter().try_for_each(|(k, v)| {
                self.expr(k, line)?;
                self.expr(v, line)
            }),
            Expr::Attr(obj, name) => {
                self.attr(name, line)?;
                self.expr(obj, line)
            }
            Expr::Index(obj, index) => {
                self.expr(obj, line)?;
                self.expr(index, line)
            }
            Expr::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                self.expr(target, line)?;
                [lower, upper, step]
                    .into_iter()
                    .flatten()
                    .try_for_each(|e| self.expr(e, line))
            }
            Expr::Call { func, args, kwargs } => {
                self.expr(func, line)?;
                args.iter().try_for_each(|e| self.expr(e, line))?;
                kwargs.iter().try_for_each(|(_, e)| self.expr(e, line))
            }
            Expr::Unary(_, e) => self.expr(e, line),
            Expr::Binary(_, l, r) | Expr::And(l, r) | Expr::Or(l, r) => {
                self.expr(l, line)?;
                self.expr(r, line)
            }
            Expr::Compare(first, rest) => {
                self.expr(first, line)?;
                rest.iter().try_for_each(|(_, e)| self.expr(e, line))
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond, line)?;
                self.expr(then, line)?;
                self.expr(otherwise, line)
            }
            Expr::Lambda(def) => {
                for param in &def.params {
                    if let Some(default) = &param.default {
                        self.expr(default, line)?;
                    }
                }
                self.block(&def.body)
            }
            Expr::ListComp(elt, clauses) | Expr::SetComp(elt, clauses) => {
                self.comprehension(clauses, line)?;
                self.expr(elt, line)
            }
            Expr::DictComp(key, value, clauses) => {
                self.comprehension(clauses, line)?;
                self.expr(key, line)?;
                self.expr(value, line)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::script::parse_program;

    fn screened(source: &str) -> Result<(), SandboxError> {
        screen(&parse_program(source).unwrap())
    }

    #[test]
    fn test_surface_exposes_allow_list_only() {
        let surface = CapabilitySurface::build();
        assert!(surface.builtin("len").is_some());
        assert!(surface.builtin("filter_by_field").is_some());
        assert!(surface.builtin("read_file").is_some());
        assert!(surface.module("json").is_some());
        for name in BLOCKED_NAMES {
            assert!(surface.builtin(name).is_none(), "{name} must not be exposed");
        }
        for module in BLOCKED_MODULES {
            assert!(surface.module(module).is_none(), "{module} must not be exposed");
        }
    }

    #[test]
    fn test_workspace_binding_hides_host_path() {
        let surface = CapabilitySurface::build();
        assert_eq!(surface.builtin("workspace").unwrap().to_str(), "<workspace>");
    }

    #[test]
    fn test_surfaces_are_independent() {
        let a = CapabilitySurface::build();
        let b = CapabilitySurface::build();
        let (ma, mb) = (a.module("math").unwrap(), b.module("math").unwrap());
        assert!(!Rc::ptr_eq(&ma, &mb));
    }

    #[test]
    fn test_screen_blocks_modules() {
        let err = screened("import os\nos.system('ls')").unwrap_err();
        assert_eq!(err.kind(), "capability_violation");
        assert!(err.to_string().contains("'os' is blocked"));
        assert!(screened("from subprocess import run").is_err());
        assert!(screened("import yaml").unwrap_err().to_string().contains("not allowed"));
    }

    #[test]
    fn test_screen_blocks_names_and_dunders() {
        assert!(screened("f = open('x')").is_err());
        assert!(screened("x = ().__class__").is_err());
        assert!(screened("def f():\n    return eval('1')\n").is_err());
        assert!(screened("y = [getattr(v, 'x') for v in [1]]").is_err());
    }

    #[test]
    fn test_screen_allows_collections_and_datetime_class() {
        assert!(screened("from collections import Counter, defaultdict").is_ok());
        assert!(screened("from datetime import datetime\nx = datetime.now()").is_ok());
        let surface = CapabilitySurface::build();
        assert!(surface.module("collections").is_some());
        for name in ["set", "iter", "next", "hex", "bin", "oct", "StopIteration", "AttributeError"] {
            assert!(surface.builtin(name).is_some(), "{name} must be exposed");
        }
    }

    #[test]
    fn test_screen_allows_ordinary_code() {
        let source = "import json\nfrom math import sqrt\n\ndef total(xs):\n    return sum(xs)\n\nresult = json.dumps({'t': total([1, 2]), 'r': sqrt(4)})\n";
        assert!(screened(source).is_ok());
    }
}
