//! C harness synthesis.
//!
//! A harness supplies a definition for every non-deterministic method of the
//! program. It is compiled together with the program (`gcc -include
//! <program> <harness>`), so the program's `main` drives it. Each call
//! consumes the next input line, parses it according to the method's return
//! type and returns it. Calling the error method prints the violation marker
//! to stderr and exits with [`ERROR_RETURN`].

use std::fmt::Write as _;

use crate::nondet::{sym_var_name, NondetMethod, ValueKind, ASSUME_METHOD};
use crate::test_vector::TestVector;

/// Written to stderr when the error method is reached.
pub const VIOLATION_MARKER: &str = "Error found.";
/// Exit code of a harness that reached the error method.
pub const ERROR_RETURN: i32 = 107;

const TYPE_WORDS: &[&str] = &[
    "int", "char", "short", "long", "unsigned", "signed", "float", "double", "void", "_Bool",
    "const", "volatile", "struct", "union", "enum", "restrict",
];

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether a parameter declaration already names its parameter.
fn has_param_name(param: &str) -> bool {
    if param.contains('[') {
        return true;
    }
    let tokens: Vec<&str> = param
        .split(|c: char| c.is_whitespace() || c == '*')
        .filter(|t| !t.is_empty())
        .collect();
    match tokens.as_slice() {
        [.., prev, last] => {
            is_identifier(last)
                && !TYPE_WORDS.contains(last)
                && !matches!(*prev, "struct" | "union" | "enum")
        }
        _ => false,
    }
}

/// `<type> <name>(<params>)` with every parameter named.
pub fn method_head(method: &NondetMethod) -> String {
    let mut params = Vec::new();
    for (idx, param) in method.param_types.iter().enumerate() {
        let param = param.trim();
        if param.contains("...") {
            params.push("...".to_string());
        } else if param == "void" || param.is_empty() {
            continue;
        } else if has_param_name(param) {
            params.push(param.to_string());
        } else {
            params.push(format!("{param} param{idx}"));
        }
    }
    format!(
        "{} {}({})",
        method.return_type,
        method.name,
        params.join(", ")
    )
}

fn is_string_type(c_type: &str) -> bool {
    let compact: String = c_type.split_whitespace().collect::<Vec<_>>().join(" ");
    matches!(compact.as_str(), "char *" | "const char *")
}

/// Escape raw bytes as the body of a C string literal.
fn c_string_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out.push('"');
    out
}

fn preamble(error_method: &str) -> String {
    format!(
        "#include <stdio.h>\n\
         #include <stdlib.h>\n\
         #include <string.h>\n\
         \n\
         void {error_method}() {{\n\
         \x20   fprintf(stderr, \"{VIOLATION_MARKER}\\n\");\n\
         \x20   exit({ERROR_RETURN});\n\
         }}\n\
         \n\
         void {ASSUME_METHOD}(int cond) {{\n\
         \x20   if (!cond) {{\n\
         \x20       abort();\n\
         \x20   }}\n\
         }}\n\n"
    )
}

fn stdin_source() -> &'static str {
    "static char *tbf_next_input(void) {\n\
    \x20   static char *line = NULL;\n\
    \x20   static size_t capacity = 0;\n\
    \x20   ssize_t len = getline(&line, &capacity, stdin);\n\
    \x20   if (len < 0) {\n\
    \x20       exit(0);\n\
    \x20   }\n\
    \x20   if (len > 0 && line[len - 1] == '\\n') {\n\
    \x20       line[len - 1] = '\\0';\n\
    \x20   }\n\
    \x20   return line;\n\
    }\n\n"
}

fn embedded_source(vector: &TestVector) -> String {
    let mut out = String::from("static const char *tbf_inputs[] = {\n");
    if vector.is_empty() {
        out.push_str("    NULL\n");
    }
    for entry in vector.entries() {
        let _ = writeln!(out, "    {},", c_string_literal(&entry.value.text()));
    }
    let _ = write!(
        out,
        "}};\n\
         static const size_t tbf_input_count = {};\n\
         static size_t tbf_input_idx = 0;\n\
         \n\
         static char *tbf_next_input(void) {{\n\
         \x20   if (tbf_input_idx >= tbf_input_count) {{\n\
         \x20       exit(0);\n\
         \x20   }}\n\
         \x20   return (char *) tbf_inputs[tbf_input_idx++];\n\
         }}\n\n",
        vector.len()
    );
    out
}

fn method_definition(method: &NondetMethod) -> String {
    let head = method_head(method);
    if method.returns_void() {
        return format!("{head} {{\n}}\n\n");
    }
    let ret = &method.return_type;
    if is_string_type(ret) {
        return format!("{head} {{\n    return strdup(tbf_next_input());\n}}\n\n");
    }
    let kind = ValueKind::of(ret);
    let scratch = kind.scratch_type();
    let spec = kind.scanf_specifier();
    let read = format!(
        "    {scratch} tbf_val = 0;\n    sscanf(tbf_next_input(), \"{spec}\", &tbf_val);\n"
    );
    match kind {
        ValueKind::Other => format!(
            "{head} {{\n\
             \x20   {ret} tbf_ret;\n\
             {read}\
             \x20   memset(&tbf_ret, 0, sizeof(tbf_ret));\n\
             \x20   memcpy(&tbf_ret, &tbf_val, sizeof(tbf_val) < sizeof(tbf_ret) ? sizeof(tbf_val) : sizeof(tbf_ret));\n\
             \x20   return tbf_ret;\n\
             }}\n\n"
        ),
        _ => format!("{head} {{\n{read}    return ({ret}) tbf_val;\n}}\n\n"),
    }
}

/// Harness for `methods`. Without a vector it reads its inputs from stdin,
/// one value per line; with one, the vector's values are compiled in.
pub fn create_harness(
    methods: &[NondetMethod],
    error_method: &str,
    vector: Option<&TestVector>,
) -> String {
    let mut out = preamble(error_method);
    match vector {
        Some(vector) => out.push_str(&embedded_source(vector)),
        None => out.push_str(stdin_source()),
    }
    for method in methods {
        out.push_str(&method_definition(method));
    }
    out
}

/// Replay shim for `klee-replay`: every nondet method returns a symbolic
/// object named after it, which `libkleeRuntest` fills from `KTEST_FILE`.
pub fn create_replay_shim(methods: &[NondetMethod], error_method: &str) -> String {
    let mut out = preamble(error_method);
    out.push_str(
        "extern void klee_make_symbolic(void *addr, size_t nbytes, const char *name);\n\n",
    );
    for method in methods {
        let head = method_head(method);
        if method.returns_void() {
            let _ = write!(out, "{head} {{\n}}\n\n");
            continue;
        }
        let _ = write!(
            out,
            "{head} {{\n\
             \x20   {ret} tbf_val;\n\
             \x20   klee_make_symbolic(&tbf_val, sizeof(tbf_val), \"{sym}\");\n\
             \x20   return tbf_val;\n\
             }}\n\n",
            ret = method.return_type,
            sym = sym_var_name(&method.name),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vector::TestValue;

    fn int_method() -> NondetMethod {
        NondetMethod::new("__VERIFIER_nondet_int", "int")
    }

    #[test]
    fn method_head_names_unnamed_params() {
        let mut method = NondetMethod::new("read_sensor", "unsigned long");
        method.param_types = vec!["int".into(), "char *buf".into(), "struct cfg".into()];
        assert_eq!(
            method_head(&method),
            "unsigned long read_sensor(int param0, char *buf, struct cfg param2)"
        );
        method.param_types = vec!["const char *".into(), "...".into()];
        assert_eq!(
            method_head(&method),
            "unsigned long read_sensor(const char * param0, ...)"
        );
        method.param_types = vec!["void".into()];
        assert_eq!(method_head(&method), "unsigned long read_sensor()");
    }

    #[test]
    fn stdin_harness_reads_lines() {
        let harness = create_harness(&[int_method()], "__VERIFIER_error", None);
        assert!(harness.contains("getline(&line, &capacity, stdin)"));
        assert!(harness.contains("int __VERIFIER_nondet_int() {"));
        assert!(harness.contains("sscanf(tbf_next_input(), \"%lld\", &tbf_val);"));
        assert!(harness.contains("return (int) tbf_val;"));
        assert!(harness.contains("fprintf(stderr, \"Error found.\\n\");"));
        assert!(harness.contains("exit(107);"));
    }

    #[test]
    fn embedded_harness_escapes_values() {
        let mut vector = TestVector::new("t", "/tmp/t");
        vector.push(TestValue::Signed { value: -3, width: 4 }, None);
        vector.push(TestValue::Text(b"a\"b\\\x01".to_vec()), None);
        let harness = create_harness(&[int_method()], "__VERIFIER_error", Some(&vector));
        assert!(harness.contains("    \"-3\",\n"));
        assert!(harness.contains("    \"a\\\"b\\\\\\001\",\n"));
        assert!(harness.contains("tbf_input_count = 2;"));
        assert!(!harness.contains("getline"));
    }

    #[test]
    fn empty_vector_still_compiles_to_an_array() {
        let vector = TestVector::new("t", "/tmp/t");
        let harness = create_harness(&[], "__VERIFIER_error", Some(&vector));
        assert!(harness.contains("    NULL\n"));
        assert!(harness.contains("tbf_input_count = 0;"));
    }

    #[test]
    fn aggregates_are_copied_into_a_zeroed_value() {
        let method = NondetMethod::new("get_config", "struct config");
        let harness = create_harness(&[method], "__VERIFIER_error", None);
        assert!(harness.contains("struct config tbf_ret;"));
        assert!(harness.contains("memset(&tbf_ret, 0, sizeof(tbf_ret));"));
    }

    #[test]
    fn char_pointers_return_the_line() {
        let method = NondetMethod::new("__VERIFIER_nondet_pchar", "char *");
        let harness = create_harness(&[method], "__VERIFIER_error", None);
        assert!(harness.contains("return strdup(tbf_next_input());"));
    }

    #[test]
    fn void_methods_read_nothing() {
        let method = NondetMethod::new("log_event", "void");
        let harness = create_harness(&[method], "reach_error", None);
        assert!(harness.contains("void log_event() {\n}\n"));
        assert!(harness.contains("void reach_error() {"));
    }

    #[test]
    fn replay_shim_uses_sym_names() {
        let shim = create_replay_shim(&[int_method()], "__VERIFIER_error");
        assert!(shim.contains(
            "klee_make_symbolic(&tbf_val, sizeof(tbf_val), \"__sym___VERIFIER_nondet_int\");"
        ));
    }
}
