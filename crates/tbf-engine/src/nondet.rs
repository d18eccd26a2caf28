//! Discovery of the non-deterministic input points of a C program.
//!
//! The registry is computed once per run and stored in the run
//! [`Context`](crate::context::Context); nothing here keeps global state.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ParseError;

pub const NONDET_PREFIX: &str = "__VERIFIER_nondet_";
pub const DEFAULT_ERROR_METHOD: &str = "__VERIFIER_error";
pub const ASSUME_METHOD: &str = "__VERIFIER_assume";
/// Prefix of the symbolic object names KLEE records for a nondet method.
pub const SYM_VAR_PREFIX: &str = "__sym_";

/// Functions that are declared but intentionally left to the C library.
const IMPLICIT_FUNCTIONS: &[&str] = &[
    "__VERIFIER_error",
    "__VERIFIER_assume",
    "__assert_fail",
    "__builtin_expect",
    "abort",
    "assert",
    "atexit",
    "calloc",
    "exit",
    "fprintf",
    "free",
    "malloc",
    "memcmp",
    "memcpy",
    "memmove",
    "memset",
    "printf",
    "realloc",
    "strcmp",
    "strcpy",
    "strlen",
    "strncmp",
    "strncpy",
];

const STATEMENT_KEYWORDS: &[&str] = &["return", "else", "typedef", "goto", "case", "do", "sizeof"];

/// One undefined function whose return value is an input of the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NondetMethod {
    pub name: String,
    pub return_type: String,
    pub param_types: Vec<String>,
}

impl NondetMethod {
    pub fn new(name: impl Into<String>, return_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: return_type.into(),
            param_types: Vec::new(),
        }
    }

    pub fn returns_void(&self) -> bool {
        self.return_type.trim() == "void"
    }
}

/// Name of the symbolic variable KLEE records for `method`.
pub fn sym_var_name(method: &str) -> String {
    format!("{SYM_VAR_PREFIX}{method}")
}

/// Inverse of [`sym_var_name`]; plain names are returned unchanged.
pub fn method_name_of(sym_var: &str) -> &str {
    sym_var.strip_prefix(SYM_VAR_PREFIX).unwrap_or(sym_var)
}

fn nondet_call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(__VERIFIER_nondet_[A-Za-z0-9_]+?)\s*\(\s*(?:void)?\s*\)")
            .expect("nondet call pattern is valid")
    })
}

fn prototype_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:extern[ \t]+)?(?:[A-Za-z_][A-Za-z0-9_ \t\*]*?)[ \t\*]*\b(?P<name>[A-Za-z_][A-Za-z0-9_]*)[ \t]*\((?P<params>[^()]*)\)[ \t]*(?:__attribute__[ \t]*\(\(.*\)\))?[ \t]*;",
        )
        .expect("prototype pattern is valid")
    })
}

/// Derive the C return type from the suffix of an SV-COMP nondet method.
pub fn svcomp_return_type(method: &str) -> String {
    let suffix = method
        .strip_prefix(NONDET_PREFIX)
        .unwrap_or(method)
        .to_ascii_lowercase();
    match suffix.as_str() {
        "bool" => "_Bool".into(),
        "u32" => "unsigned int".into(),
        "u16" => "unsigned short".into(),
        "u8" => "unsigned char".into(),
        "unsigned" => "unsigned int".into(),
        "pointer" => "void *".into(),
        "pchar" => "char *".into(),
        "s8" => "char".into(),
        other => match other.strip_prefix('u') {
            Some(rest) if !rest.is_empty() => format!("unsigned {rest}"),
            _ => other.to_string(),
        },
    }
}

/// Every `__VERIFIER_nondet_*()` call site, deduplicated and sorted by name.
pub fn find_svcomp_nondet_methods(content: &str) -> Vec<NondetMethod> {
    let names: BTreeSet<&str> = nondet_call_pattern()
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    names
        .into_iter()
        .map(|name| NondetMethod::new(name, svcomp_return_type(name)))
        .collect()
}

fn is_defined(content: &str, name: &str) -> bool {
    let pattern = format!(r"\b{}\s*\([^;{{}}]*\)\s*\{{", regex::escape(name));
    Regex::new(&pattern)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

fn normalize_type(raw: &str) -> String {
    raw.split_whitespace()
        .filter(|w| *w != "extern" && *w != "static" && *w != "inline")
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" *", "*")
        .replace('*', " *")
        .trim()
        .to_string()
}

fn split_params(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "void" {
        return Vec::new();
    }
    raw.split(',').map(|p| p.trim().to_string()).collect()
}

/// Declared-but-undefined functions plus every nondet call site.
pub fn find_undefined_methods(content: &str) -> Vec<NondetMethod> {
    let mut seen = BTreeSet::new();
    let mut methods = Vec::new();
    for caps in prototype_pattern().captures_iter(content) {
        let (Some(whole), Some(name_match), Some(params)) =
            (caps.get(0), caps.name("name"), caps.name("params"))
        else {
            continue;
        };
        let name = name_match.as_str();
        let ret_text = &content[whole.start()..name_match.start()];
        if ret_text
            .split_whitespace()
            .any(|w| STATEMENT_KEYWORDS.contains(&w))
            || IMPLICIT_FUNCTIONS.contains(&name)
            || is_defined(content, name)
            || !seen.insert(name.to_string())
        {
            continue;
        }
        methods.push(NondetMethod {
            name: name.to_string(),
            return_type: normalize_type(ret_text),
            param_types: split_params(params.as_str()),
        });
    }
    for method in find_svcomp_nondet_methods(content) {
        if seen.insert(method.name.clone()) {
            methods.push(method);
        }
    }
    methods
}

/// Compute the nondet registry of `program`.
pub fn find_nondet_methods(
    program: &Path,
    svcomp_only: bool,
) -> Result<Vec<NondetMethod>, ParseError> {
    debug!("Finding undefined methods");
    let content = std::fs::read_to_string(program).map_err(|source| ParseError::Io {
        path: program.to_path_buf(),
        source,
    })?;
    let methods = if svcomp_only {
        find_svcomp_nondet_methods(&content)
    } else {
        find_undefined_methods(&content)
    };
    if methods.is_empty() {
        warn!("No non-deterministic methods found in {}", program.display());
    }
    debug!("Undefined methods: {:?}", methods);
    Ok(methods)
}

/// Whether `line` calls `error_method` (as opposed to declaring or defining
/// it). A `void` on the line must be followed by other code before the call.
fn is_error_call(line: &str, error_method: &str) -> bool {
    let call = format!("{error_method}()");
    let Some(idx) = line.find(&call) else {
        return false;
    };
    let rest = &line[idx + call.len()..];
    if !rest.trim_start().starts_with(';') {
        return false;
    }
    let prefix = &line[..idx];
    match prefix.find("void") {
        Some(v) => !prefix[v + 4..].trim().is_empty(),
        None => true,
    }
}

/// 1-based line numbers of all calls of `error_method` in `program`.
pub fn find_error_lines(program: &Path, error_method: &str) -> Result<Vec<usize>, ParseError> {
    let content = std::fs::read_to_string(program).map_err(|source| ParseError::Io {
        path: program.to_path_buf(),
        source,
    })?;
    let lines: Vec<usize> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| is_error_call(line, error_method))
        .map(|(idx, _)| idx + 1)
        .collect();
    if lines.is_empty() {
        return Err(ParseError::NoErrorCall {
            method: error_method.to_string(),
            path: program.to_path_buf(),
        });
    }
    Ok(lines)
}

/// Value category of a C return type, deciding how its raw bytes are
/// interpreted and how the harness reads it from stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Signed,
    Unsigned,
    Float,
    Pointer,
    /// Aggregates and unrecognized types.
    Other,
}

impl ValueKind {
    pub fn of(c_type: &str) -> ValueKind {
        let c_type = c_type.trim();
        if c_type.contains('*') {
            ValueKind::Pointer
        } else if c_type.contains("float") || c_type.contains("double") {
            ValueKind::Float
        } else if c_type.contains("unsigned")
            || c_type.contains("_Bool")
            || c_type == "bool"
            || c_type.contains("size_t")
        {
            ValueKind::Unsigned
        } else if c_type.starts_with("struct") || c_type.starts_with("union") {
            ValueKind::Other
        } else if ["int", "long", "short", "char"].iter().any(|t| c_type.contains(t)) {
            ValueKind::Signed
        } else {
            ValueKind::Other
        }
    }

    /// `scanf` conversion reading into the widest C type of this category.
    pub fn scanf_specifier(&self) -> &'static str {
        match self {
            ValueKind::Signed => "%lld",
            ValueKind::Unsigned | ValueKind::Other => "%llu",
            ValueKind::Float => "%lf",
            ValueKind::Pointer => "%p",
        }
    }

    /// C type of the temporary the harness reads into.
    pub fn scratch_type(&self) -> &'static str {
        match self {
            ValueKind::Signed => "long long",
            ValueKind::Unsigned | ValueKind::Other => "unsigned long long",
            ValueKind::Float => "double",
            ValueKind::Pointer => "void *",
        }
    }
}
