//! Primitive type widths of the target ABI.
//!
//! A [`MachineModel`] is selected once at startup and threaded read-only
//! through vector decoding, compilation and witness synthesis.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

/// Word size of the target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WordSize {
    #[serde(rename = "32bit")]
    Bits32,
    #[serde(rename = "64bit")]
    Bits64,
}

/// Immutable description of the C type widths (in bytes) of one ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineModel {
    pub word_size: WordSize,
    pub name: &'static str,
    pub short_size: usize,
    pub int_size: usize,
    pub long_size: usize,
    pub long_long_size: usize,
    pub float_size: usize,
    pub double_size: usize,
    pub long_double_size: usize,
    /// Compiler flag selecting this ABI.
    pub compile_parameter: &'static str,
}

impl MachineModel {
    pub const LINUX_32: MachineModel = MachineModel {
        word_size: WordSize::Bits32,
        name: "32 bit linux",
        short_size: 2,
        int_size: 4,
        long_size: 4,
        long_long_size: 8,
        float_size: 4,
        double_size: 8,
        long_double_size: 12,
        compile_parameter: "-m32",
    };

    pub const LINUX_64: MachineModel = MachineModel {
        word_size: WordSize::Bits64,
        name: "64 bit linux",
        short_size: 2,
        int_size: 4,
        long_size: 8,
        long_long_size: 8,
        float_size: 4,
        double_size: 8,
        long_double_size: 16,
        compile_parameter: "-m64",
    };

    pub fn is_32(&self) -> bool {
        self.word_size == WordSize::Bits32
    }

    pub fn is_64(&self) -> bool {
        self.word_size == WordSize::Bits64
    }

    /// Width of a data pointer in bytes.
    pub fn pointer_size(&self) -> usize {
        match self.word_size {
            WordSize::Bits32 => 4,
            WordSize::Bits64 => 8,
        }
    }

    /// Architecture key used in witness files (`32bit` / `64bit`).
    pub fn witness_key(&self) -> &'static str {
        match self.word_size {
            WordSize::Bits32 => "32bit",
            WordSize::Bits64 => "64bit",
        }
    }

    /// Size of a C arithmetic type. Order of the checks matters:
    /// `long long` and `long double` must win over `long`.
    pub fn size_of(&self, data_type: &str) -> Option<usize> {
        if data_type.contains('*') {
            Some(self.pointer_size())
        } else if data_type.contains("short") {
            Some(self.short_size)
        } else if data_type.contains("long long") {
            Some(self.long_long_size)
        } else if data_type.contains("long double") {
            Some(self.long_double_size)
        } else if data_type.contains("long") {
            Some(self.long_size)
        } else if data_type.contains("double") {
            Some(self.double_size)
        } else if data_type.contains("float") {
            Some(self.float_size)
        } else if data_type.contains("int") {
            Some(self.int_size)
        } else if data_type.contains("char") || data_type.contains("_Bool") {
            Some(1)
        } else {
            None
        }
    }
}

impl Default for MachineModel {
    fn default() -> Self {
        MachineModel::LINUX_32
    }
}

impl fmt::Display for MachineModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl FromStr for MachineModel {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "32" | "32bit" | "-32" | "-m32" => Ok(MachineModel::LINUX_32),
            "64" | "64bit" | "-64" | "-m64" => Ok(MachineModel::LINUX_64),
            other => Err(ConfigError::UnknownMachineModel(other.into())),
        }
    }
}
