//! GraphML violation witnesses.
//!
//! A witness is a path automaton: one state per test value, connected by
//! transitions whose assumption pins the return value of the
//! non-deterministic call to the recorded value. The final state leads to
//! the violation node through one transition per error line.

use std::fmt::Write as _;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::error::{ParseError, ValidationError};
use crate::nondet::NondetMethod;
use crate::test_vector::TestVector;

pub const WITNESS_SUFFIX: &str = ".witness.graphml";

/// Graph-level data of a witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessMetadata {
    pub producer: String,
    pub program_file: String,
    pub program_hash: String,
    pub architecture: &'static str,
    pub specification: String,
    pub creation_time: String,
}

impl WitnessMetadata {
    /// Metadata for the program of `ctx`, stamped with the current time.
    pub fn for_context(ctx: &Context) -> Result<Self, ParseError> {
        let program = ctx.program();
        let content = std::fs::read(program).map_err(|source| ParseError::Io {
            path: program.to_path_buf(),
            source,
        })?;
        Ok(Self {
            producer: ctx.producer().to_string(),
            program_file: program.display().to_string(),
            program_hash: sha256_hex_bytes(&content),
            architecture: ctx.machine_model().witness_key(),
            specification: ctx.property(),
            creation_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

const KEYS: &[(&str, &str, &str, &str, Option<&str>)] = &[
    // (id, attr.name, attr.type, for, default)
    ("violation", "isViolationNode", "boolean", "node", Some("false")),
    ("entry", "isEntryNode", "boolean", "node", Some("false")),
    ("witness-type", "witness-type", "string", "graph", None),
    ("sourcecodelang", "sourcecodelang", "string", "graph", None),
    ("producer", "producer", "string", "graph", None),
    ("specification", "specification", "string", "graph", None),
    ("programfile", "programFile", "string", "graph", None),
    ("programhash", "programHash", "string", "graph", None),
    ("architecture", "architecture", "string", "graph", None),
    ("creationtime", "creationtime", "string", "graph", None),
    ("startline", "startline", "int", "edge", None),
    ("assumption", "assumption", "string", "edge", None),
    ("assumption.scope", "assumption.scope", "string", "edge", None),
    (
        "assumption.resultfunction",
        "assumption.resultfunction",
        "string",
        "edge",
        None,
    ),
];

fn write_edge(out: &mut String, source: &str, target: &str, data: &[(&str, String)]) {
    let _ = writeln!(out, "    <edge source=\"{source}\" target=\"{target}\">");
    for (key, value) in data {
        let _ = writeln!(out, "      <data key=\"{key}\">{}</data>", xml_escape(value));
    }
    out.push_str("    </edge>\n");
}

/// Violation witness for `vector`.
///
/// Values that carry their method name produce one transition. Untyped
/// values produce one transition per non-void nondet method, since the
/// value could have been returned by any of them.
pub fn create_witness(
    meta: &WitnessMetadata,
    vector: &TestVector,
    methods: &[NondetMethod],
    error_lines: &[usize],
) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
         <graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
    );
    for (id, name, ty, domain, default) in KEYS {
        match default {
            Some(default) => {
                let _ = writeln!(
                    out,
                    "  <key attr.name=\"{name}\" attr.type=\"{ty}\" for=\"{domain}\" id=\"{id}\">\n    <default>{default}</default>\n  </key>"
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "  <key attr.name=\"{name}\" attr.type=\"{ty}\" for=\"{domain}\" id=\"{id}\"/>"
                );
            }
        }
    }
    out.push_str("  <graph edgedefault=\"directed\">\n");
    for (key, value) in [
        ("witness-type", "violation_witness"),
        ("sourcecodelang", "C"),
        ("producer", meta.producer.as_str()),
        ("specification", meta.specification.as_str()),
        ("programfile", meta.program_file.as_str()),
        ("programhash", meta.program_hash.as_str()),
        ("architecture", meta.architecture),
        ("creationtime", meta.creation_time.as_str()),
    ] {
        let _ = writeln!(out, "    <data key=\"{key}\">{}</data>", xml_escape(value));
    }

    out.push_str("    <node id=\"A0\">\n      <data key=\"entry\">true</data>\n    </node>\n");
    let value_methods: Vec<&NondetMethod> = methods.iter().filter(|m| !m.returns_void()).collect();
    for (idx, entry) in vector.entries().iter().enumerate() {
        let source = format!("A{idx}");
        let target = format!("A{}", idx + 1);
        let _ = writeln!(out, "    <node id=\"{target}\"/>");
        let assumption = format!(
            "\\result == {};",
            String::from_utf8_lossy(&entry.value.text())
        );
        let candidates: Vec<&str> = match &entry.method {
            Some(method) => vec![method.as_str()],
            None => value_methods.iter().map(|m| m.name.as_str()).collect(),
        };
        for method in candidates {
            write_edge(
                &mut out,
                &source,
                &target,
                &[
                    ("assumption", assumption.clone()),
                    ("assumption.resultfunction", method.to_string()),
                ],
            );
        }
    }

    let last = format!("A{}", vector.len());
    out.push_str(
        "    <node id=\"violation\">\n      <data key=\"violation\">true</data>\n    </node>\n",
    );
    for line in error_lines {
        write_edge(
            &mut out,
            &last,
            "violation",
            &[("startline", line.to_string())],
        );
    }
    out.push_str("  </graph>\n</graphml>\n");
    out
}

/// Build the witness for `vector` against the program of `ctx`.
pub fn witness_for(ctx: &Context, vector: &TestVector) -> Result<String, ValidationError> {
    let meta = WitnessMetadata::for_context(ctx)?;
    let error_lines = ctx.error_lines()?;
    Ok(create_witness(
        &meta,
        vector,
        ctx.nondet_methods(),
        error_lines,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vector::TestValue;

    fn meta() -> WitnessMetadata {
        WitnessMetadata {
            producer: "tbf-test".into(),
            program_file: "/tmp/p.c".into(),
            program_hash: sha256_hex_bytes(b"int main() {}"),
            architecture: "32bit",
            specification: "CHECK( init(main()), LTL(G ! call(__VERIFIER_error())) )".into(),
            creation_time: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn typed_values_get_one_edge_each() {
        let mut vector = TestVector::new("t", "/tmp/t");
        vector.push(
            TestValue::Signed { value: 5, width: 4 },
            Some("__VERIFIER_nondet_int".into()),
        );
        let methods = vec![
            NondetMethod::new("__VERIFIER_nondet_int", "int"),
            NondetMethod::new("__VERIFIER_nondet_char", "char"),
        ];
        let witness = create_witness(&meta(), &vector, &methods, &[7, 12]);
        assert_eq!(witness.matches("\\result == 5;").count(), 1);
        assert!(witness.contains(
            "<data key=\"assumption.resultfunction\">__VERIFIER_nondet_int</data>"
        ));
        assert!(witness.contains("<data key=\"architecture\">32bit</data>"));
        assert!(witness.contains("<data key=\"startline\">7</data>"));
        assert!(witness.contains("<data key=\"startline\">12</data>"));
        assert_eq!(witness.matches("target=\"violation\"").count(), 2);
    }

    #[test]
    fn untyped_values_fan_out_over_value_methods() {
        let mut vector = TestVector::new("t", "/tmp/t");
        vector.push(TestValue::Text(b"-3".to_vec()), None);
        let methods = vec![
            NondetMethod::new("__VERIFIER_nondet_int", "int"),
            NondetMethod::new("__VERIFIER_nondet_long", "long"),
            NondetMethod::new("log_event", "void"),
        ];
        let witness = create_witness(&meta(), &vector, &methods, &[3]);
        assert_eq!(witness.matches("\\result == -3;").count(), 2);
        assert!(!witness.contains(">log_event<"));
    }

    #[test]
    fn empty_vector_links_entry_to_violation() {
        let vector = TestVector::new("t", "/tmp/t");
        let witness = create_witness(&meta(), &vector, &[], &[4]);
        assert!(witness.contains("<edge source=\"A0\" target=\"violation\">"));
    }

    #[test]
    fn text_values_are_escaped() {
        let mut vector = TestVector::new("t", "/tmp/t");
        vector.push(TestValue::Text(b"a<b".to_vec()), Some("f".into()));
        let witness = create_witness(&meta(), &vector, &[], &[1]);
        assert!(witness.contains("\\result == a&lt;b;"));
    }
}
