//! Table of contents: the vehicle's catalog of parameters or log variables.
//!
//! Element wire layout (after the command and index bytes have been
//! checked by the [`fetcher`]):
//!
//! ```text
//! ┌─────────┬───────────┬──────────────────────────┐
//! │ ident   │ type byte │ group \0 name \0         │
//! └─────────┴───────────┴──────────────────────────┘
//! ```
//!
//! The type byte is read through one of two code tables depending on the
//! port the TOC lives on: the parameter table (low nibble is the type,
//! bit 6 marks read-only) or the log table (whole byte is the type, every
//! log variable is read-only).

pub mod fetcher;

pub use fetcher::{FetchState, TocFetcher};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crtp::CrtpPort;
use crate::error::TocError;

/// Request/reply opcode: fetch one element.
pub const CMD_TOC_ELEMENT: u8 = 0;

/// Request/reply opcode: fetch item count and CRC.
pub const CMD_TOC_INFO: u8 = 1;

/// Bit 6 of a parameter type byte marks the variable read-only.
const PARAM_RO_FLAG: u8 = 0x40;

const PARAM_TYPE_MASK: u8 = 0x0F;

// ── Types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Fp16,
    Float,
    Double,
}

impl VariableType {
    /// Parameter TOC type code (low nibble of the type byte).
    pub fn from_param_code(code: u8) -> Result<Self, TocError> {
        Ok(match code {
            0x00 => Self::Int8,
            0x01 => Self::Int16,
            0x02 => Self::Int32,
            0x03 => Self::Int64,
            0x05 => Self::Fp16,
            0x06 => Self::Float,
            0x07 => Self::Double,
            0x08 => Self::Uint8,
            0x09 => Self::Uint16,
            0x0A => Self::Uint32,
            0x0B => Self::Uint64,
            other => return Err(TocError::UnknownType(other)),
        })
    }

    /// Log TOC type code.
    pub fn from_log_code(code: u8) -> Result<Self, TocError> {
        Ok(match code {
            1 => Self::Uint8,
            2 => Self::Uint16,
            3 => Self::Uint32,
            4 => Self::Int8,
            5 => Self::Int16,
            6 => Self::Int32,
            7 => Self::Float,
            8 => Self::Fp16,
            other => return Err(TocError::UnknownType(other)),
        })
    }

    /// Encoded width in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 | Self::Fp16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float => 4,
            Self::Int64 | Self::Uint64 | Self::Double => 8,
        }
    }

    /// C type name as the firmware declares it.
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Int8 => "int8_t",
            Self::Int16 => "int16_t",
            Self::Int32 => "int32_t",
            Self::Int64 => "int64_t",
            Self::Uint8 => "uint8_t",
            Self::Uint16 => "uint16_t",
            Self::Uint32 => "uint32_t",
            Self::Uint64 => "uint64_t",
            Self::Fp16 => "FP16",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Which code table a TOC uses; follows from the port it is fetched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocKind {
    Param,
    Log,
}

impl TocKind {
    pub fn for_port(port: u8) -> Self {
        if port == CrtpPort::Logging.number() {
            Self::Log
        } else {
            Self::Param
        }
    }
}

// ── Element ───────────────────────────────────────────────────

/// One catalog entry. `ident` is only stable within a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocElement {
    pub ident: u8,
    pub group: String,
    pub name: String,
    pub var_type: VariableType,
    pub access: Access,
}

impl TocElement {
    /// `group.name`
    pub fn complete_name(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    /// Decode `[ident, type_byte, group\0name\0]`.
    pub fn decode(kind: TocKind, data: &[u8]) -> Result<Self, TocError> {
        let [ident, type_byte, names @ ..] = data else {
            return Err(TocError::Malformed("element shorter than ident + type"));
        };
        let (var_type, access) = match kind {
            TocKind::Param => (
                VariableType::from_param_code(type_byte & PARAM_TYPE_MASK)?,
                if type_byte & PARAM_RO_FLAG != 0 {
                    Access::ReadOnly
                } else {
                    Access::ReadWrite
                },
            ),
            TocKind::Log => (VariableType::from_log_code(*type_byte)?, Access::ReadOnly),
        };

        let mut parts = names.split(|&b| b == 0);
        let group = parts
            .next()
            .ok_or(TocError::Malformed("missing group name"))?;
        let name = parts
            .next()
            .ok_or(TocError::Malformed("missing variable name"))?;
        // A terminated name leaves an (empty) remainder behind it.
        if parts.next().is_none() {
            return Err(TocError::Malformed("variable name not NUL-terminated"));
        }

        Ok(Self {
            ident: *ident,
            group: utf8(group)?,
            name: utf8(name)?,
            var_type,
            access,
        })
    }
}

fn utf8(bytes: &[u8]) -> Result<String, TocError> {
    core::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| TocError::Malformed("name is not UTF-8"))
}

// ── Catalog ───────────────────────────────────────────────────

/// Elements keyed by ident, plus the CRC the vehicle reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toc {
    elements: BTreeMap<u8, TocElement>,
    crc: u32,
}

impl Toc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the element with the same ident.
    pub fn add_element(&mut self, element: TocElement) {
        self.elements.insert(element.ident, element);
    }

    pub fn element(&self, ident: u8) -> Option<&TocElement> {
        self.elements.get(&ident)
    }

    /// Look up by `group.name`.
    pub fn element_by_complete_name(&self, complete_name: &str) -> Option<&TocElement> {
        let (group, name) = complete_name.split_once('.')?;
        self.element_by_name(group, name)
    }

    pub fn element_by_name(&self, group: &str, name: &str) -> Option<&TocElement> {
        self.elements
            .values()
            .find(|e| e.group == group && e.name == name)
    }

    /// Elements in ident order.
    pub fn iter(&self) -> impl Iterator<Item = &TocElement> {
        self.elements.values()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub(crate) fn set_crc(&mut self, crc: u32) {
        self.crc = crc;
    }

    pub(crate) fn clear(&mut self) {
        self.elements.clear();
        self.crc = 0;
    }
}
