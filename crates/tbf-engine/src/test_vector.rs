//! Test vector codec.
//!
//! Raw generator output is untyped. A [`TestVector`] is obtained by
//! interpreting each raw value according to the declared return type of the
//! non-deterministic method it was produced for, and is turned back into the
//! byte stream a harness reads from stdin by [`encode`].
//!
//! Numeric values are little-endian and fixed width: 1 byte for `char` and
//! `_Bool`, 2 for `short`, 4 for `int` and `float`, 8 for `double`, `long`
//! and `long long`. Pointers use the pointer width of the machine model and
//! every other type is read as an 8-byte unsigned integer. Short byte strings
//! are zero-extended and long ones truncated, so decoding never fails on the
//! value bytes themselves.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::DecodeError;
use crate::machine_model::MachineModel;
use crate::nondet::{method_name_of, sym_var_name, NondetMethod, ValueKind, SYM_VAR_PREFIX};
use crate::test_case::{TestCase, TestCaseFormat};

/// One typed value of a test vector.
#[derive(Debug, Clone, PartialEq)]
pub enum TestValue {
    Signed { value: i64, width: u8 },
    Unsigned { value: u64, width: u8 },
    Float { value: f64, width: u8 },
    Pointer { value: u64, width: u8 },
    /// Textual or otherwise untyped value, used verbatim.
    Text(Vec<u8>),
}

impl TestValue {
    /// Textual form written to the harness input.
    pub fn text(&self) -> Vec<u8> {
        match self {
            TestValue::Text(bytes) => bytes.clone(),
            other => other.to_string().into_bytes(),
        }
    }

    /// Little-endian raw bytes of a fixed-width value; text is returned as is.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match *self {
            TestValue::Signed { value, width } => value.to_le_bytes()[..width as usize].to_vec(),
            TestValue::Unsigned { value, width } | TestValue::Pointer { value, width } => {
                value.to_le_bytes()[..width as usize].to_vec()
            }
            TestValue::Float { value, width: 4 } => (value as f32).to_le_bytes().to_vec(),
            TestValue::Float { value, .. } => value.to_le_bytes().to_vec(),
            TestValue::Text(ref bytes) => bytes.clone(),
        }
    }
}

impl fmt::Display for TestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestValue::Signed { value, .. } => write!(f, "{value}"),
            TestValue::Unsigned { value, .. } => write!(f, "{value}"),
            TestValue::Float { value, width: 4 } => write!(f, "{}", *value as f32),
            TestValue::Float { value, .. } => write!(f, "{value}"),
            TestValue::Pointer { value, .. } => write!(f, "{value:#x}"),
            TestValue::Text(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// A value together with the method that produced it, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub value: TestValue,
    pub method: Option<String>,
}

/// Typed, ordered decoding of one [`TestCase`].
#[derive(Debug, Clone, PartialEq)]
pub struct TestVector {
    name: String,
    origin: PathBuf,
    entries: Vec<VectorEntry>,
}

impl TestVector {
    pub fn new(name: impl Into<String>, origin: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, value: TestValue, method: Option<String>) {
        self.entries.push(VectorEntry { value, method });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for TestVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ([", self.origin.display())?;
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match &entry.method {
                Some(method) => write!(f, "{method}={}", entry.value)?,
                None => write!(f, "{}", entry.value)?,
            }
        }
        f.write_str("])")
    }
}

// ---------------------------------------------------------------------------
// KLEE .ktest container
// ---------------------------------------------------------------------------

const KTEST_MAGIC: &[u8; 5] = b"KTEST";
const BOUT_MAGIC: &[u8; 5] = b"BOUT\n";
pub const KTEST_VERSION: u32 = 3;

/// One named symbolic object of a ktest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KTestObject {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Parsed KLEE test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KTest {
    pub version: u32,
    pub args: Vec<Vec<u8>>,
    pub sym_argvs: u32,
    pub sym_argv_len: u32,
    pub objects: Vec<KTestObject>,
}

impl KTest {
    pub fn with_objects(objects: Vec<KTestObject>) -> Self {
        Self {
            version: KTEST_VERSION,
            args: Vec::new(),
            sym_argvs: 0,
            sym_argv_len: 0,
            objects,
        }
    }

    pub fn parse(data: &[u8]) -> Result<KTest, DecodeError> {
        let mut reader = KTestReader { data, pos: 0 };
        let magic = reader.take(5)?;
        if magic != KTEST_MAGIC && magic != BOUT_MAGIC {
            return Err(DecodeError::MalformedKtest("bad magic".into()));
        }
        let version = reader.u32()?;
        if version > KTEST_VERSION {
            return Err(DecodeError::MalformedKtest(format!(
                "unsupported version {version}"
            )));
        }
        let num_args = reader.u32()?;
        let mut args = Vec::new();
        for _ in 0..num_args {
            args.push(reader.sized()?.to_vec());
        }
        let (sym_argvs, sym_argv_len) = if version >= 2 {
            (reader.u32()?, reader.u32()?)
        } else {
            (0, 0)
        };
        let num_objects = reader.u32()?;
        let mut objects = Vec::new();
        for _ in 0..num_objects {
            let name = String::from_utf8_lossy(reader.sized()?).into_owned();
            let bytes = reader.sized()?.to_vec();
            objects.push(KTestObject { name, bytes });
        }
        Ok(KTest {
            version,
            args,
            sym_argvs,
            sym_argv_len,
            objects,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        fn put_sized(out: &mut Vec<u8>, bytes: &[u8]) {
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        let mut out = Vec::new();
        out.extend_from_slice(KTEST_MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(self.args.len() as u32).to_be_bytes());
        for arg in &self.args {
            put_sized(&mut out, arg);
        }
        if self.version >= 2 {
            out.extend_from_slice(&self.sym_argvs.to_be_bytes());
            out.extend_from_slice(&self.sym_argv_len.to_be_bytes());
        }
        out.extend_from_slice(&(self.objects.len() as u32).to_be_bytes());
        for object in &self.objects {
            put_sized(&mut out, object.name.as_bytes());
            put_sized(&mut out, &object.bytes);
        }
        out
    }
}

struct KTestReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> KTestReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                DecodeError::MalformedKtest(format!(
                    "truncated at byte {} (wanted {n} more)",
                    self.pos
                ))
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn sized(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Value category and width used to decode raw bytes of `c_type`.
pub fn decode_layout(c_type: &str, machine_model: &MachineModel) -> (ValueKind, usize) {
    let c_type = c_type.trim();
    if c_type.contains("long double") {
        return (ValueKind::Other, 8);
    }
    let kind = ValueKind::of(c_type);
    let width = match kind {
        ValueKind::Pointer => machine_model.pointer_size(),
        ValueKind::Other => 8,
        _ if c_type.contains("size_t") => machine_model.pointer_size(),
        _ if c_type.contains("char") || c_type.contains("_Bool") || c_type == "bool" => 1,
        _ if c_type.contains("short") => 2,
        _ if c_type.contains("double") || c_type.contains("long") => 8,
        _ => 4,
    };
    (kind, width)
}

fn fixed_width(bytes: &[u8], width: usize) -> [u8; 8] {
    if bytes.len() != width {
        debug!(
            "Value has {} bytes, expected {width}; zero-extending or truncating",
            bytes.len()
        );
    }
    let mut buf = [0u8; 8];
    let n = bytes.len().min(width);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Interpret `bytes` as a little-endian value of `c_type`.
pub fn decode_value(bytes: &[u8], c_type: &str, machine_model: &MachineModel) -> TestValue {
    let (kind, width) = decode_layout(c_type, machine_model);
    let buf = fixed_width(bytes, width);
    let raw = u64::from_le_bytes(buf);
    let w = width as u8;
    match kind {
        ValueKind::Signed => {
            let shift = 64 - 8 * width as u32;
            let value = ((raw << shift) as i64) >> shift;
            TestValue::Signed { value, width: w }
        }
        ValueKind::Unsigned | ValueKind::Other => TestValue::Unsigned { value: raw, width: w },
        ValueKind::Pointer => TestValue::Pointer { value: raw, width: w },
        ValueKind::Float if width == 4 => TestValue::Float {
            value: f64::from(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            width: 4,
        },
        ValueKind::Float => TestValue::Float {
            value: f64::from_le_bytes(buf),
            width: 8,
        },
    }
}

fn decode_lines(test_case: &TestCase) -> TestVector {
    let mut vector = TestVector::new(test_case.name(), test_case.origin());
    let content = test_case.content();
    if content.is_empty() {
        return vector;
    }
    let content = content.strip_suffix(b"\n").unwrap_or(content);
    for line in content.split(|b| *b == b'\n') {
        vector.push(TestValue::Text(line.to_vec()), None);
    }
    vector
}

fn decode_ktest(
    test_case: &TestCase,
    nondet_methods: &[NondetMethod],
    machine_model: &MachineModel,
) -> Result<TestVector, DecodeError> {
    let ktest = KTest::parse(test_case.content())?;
    let mut vector = TestVector::new(test_case.name(), test_case.origin());
    for object in &ktest.objects {
        let method_name = method_name_of(&object.name);
        let Some(method) = nondet_methods.iter().find(|m| m.name == method_name) else {
            if object.name.starts_with(SYM_VAR_PREFIX) {
                return Err(DecodeError::UnknownMethod {
                    method: method_name.to_string(),
                });
            }
            debug!("Skipping ktest object {} of the KLEE runtime", object.name);
            continue;
        };
        let value = decode_value(&object.bytes, &method.return_type, machine_model);
        vector.push(value, Some(method.name.clone()));
    }
    Ok(vector)
}

/// Decode `test_case` against the program's non-deterministic methods.
pub fn decode(
    test_case: &TestCase,
    nondet_methods: &[NondetMethod],
    machine_model: &MachineModel,
) -> Result<TestVector, DecodeError> {
    match test_case.format() {
        TestCaseFormat::Lines => Ok(decode_lines(test_case)),
        TestCaseFormat::Ktest => decode_ktest(test_case, nondet_methods, machine_model),
    }
}

/// Inverse of ktest decoding for the values that carry a method name.
pub fn to_ktest_objects(vector: &TestVector) -> Vec<KTestObject> {
    vector
        .entries()
        .iter()
        .filter_map(|entry| {
            entry.method.as_ref().map(|method| KTestObject {
                name: sym_var_name(method),
                bytes: entry.value.raw_bytes(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Input stream encoding
// ---------------------------------------------------------------------------

/// How values are delimited in the stdin stream of a harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Each value followed by the terminator. Not injective when a raw value
    /// contains the terminator itself.
    Lines { terminator: Vec<u8> },
    /// `<len>:<bytes>` followed by a newline; exactly invertible.
    LengthPrefixed,
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Lines {
            terminator: b"\n".to_vec(),
        }
    }
}

/// Byte stream a harness or instrumented binary expects on stdin.
pub fn encode(vector: &TestVector, framing: &Framing) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in vector.entries() {
        let text = entry.value.text();
        match framing {
            Framing::Lines { terminator } => {
                out.extend_from_slice(&text);
                out.extend_from_slice(terminator);
            }
            Framing::LengthPrefixed => {
                out.extend_from_slice(text.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(&text);
                out.push(b'\n');
            }
        }
    }
    debug!("Input for test {}: {} bytes", vector.name(), out.len());
    out
}

/// Split an encoded input stream back into its raw values.
pub fn split_input_stream(stream: &[u8], framing: &Framing) -> Result<Vec<Vec<u8>>, DecodeError> {
    match framing {
        Framing::Lines { terminator } => {
            if terminator.is_empty() {
                return Err(DecodeError::MalformedStream {
                    offset: 0,
                    message: "empty terminator".into(),
                });
            }
            let mut values = Vec::new();
            let mut rest = stream;
            while !rest.is_empty() {
                match rest
                    .windows(terminator.len())
                    .position(|w| w == terminator.as_slice())
                {
                    Some(idx) => {
                        values.push(rest[..idx].to_vec());
                        rest = &rest[idx + terminator.len()..];
                    }
                    None => {
                        values.push(rest.to_vec());
                        rest = &[];
                    }
                }
            }
            Ok(values)
        }
        Framing::LengthPrefixed => {
            let mut values = Vec::new();
            let mut pos = 0;
            while pos < stream.len() {
                let colon = stream[pos..]
                    .iter()
                    .position(|b| *b == b':')
                    .map(|i| pos + i)
                    .ok_or_else(|| DecodeError::MalformedStream {
                        offset: pos,
                        message: "missing length separator".into(),
                    })?;
                let len: usize = std::str::from_utf8(&stream[pos..colon])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| DecodeError::MalformedStream {
                        offset: pos,
                        message: "invalid length prefix".into(),
                    })?;
                let start = colon + 1;
                let end = start.checked_add(len).filter(|end| *end < stream.len());
                let Some(end) = end.filter(|end| stream[*end] == b'\n') else {
                    return Err(DecodeError::MalformedStream {
                        offset: start,
                        message: format!("value of length {len} is not terminated"),
                    });
                };
                values.push(stream[start..end].to_vec());
                pos = end + 1;
            }
            Ok(values)
        }
    }
}
