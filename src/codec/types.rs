//! Core data model: section kinds, value types, signatures, and imports.

use std::fmt;
use std::ops::Range;

use super::Error;

/// The 13 section kinds of the binary format (§5.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Custom,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    Code,
    Data,
    DataCount,
}

impl SectionKind {
    pub fn decode(byte: u8) -> Result<SectionKind, Error> {
        match byte {
            0 => Ok(SectionKind::Custom),
            1 => Ok(SectionKind::Type),
            2 => Ok(SectionKind::Import),
            3 => Ok(SectionKind::Function),
            4 => Ok(SectionKind::Table),
            5 => Ok(SectionKind::Memory),
            6 => Ok(SectionKind::Global),
            7 => Ok(SectionKind::Export),
            8 => Ok(SectionKind::Start),
            9 => Ok(SectionKind::Element),
            10 => Ok(SectionKind::Code),
            11 => Ok(SectionKind::Data),
            12 => Ok(SectionKind::DataCount),
            _ => Err(Error::UnknownSection(byte)),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            SectionKind::Custom => 0,
            SectionKind::Type => 1,
            SectionKind::Import => 2,
            SectionKind::Function => 3,
            SectionKind::Table => 4,
            SectionKind::Memory => 5,
            SectionKind::Global => 6,
            SectionKind::Export => 7,
            SectionKind::Start => 8,
            SectionKind::Element => 9,
            SectionKind::Code => 10,
            SectionKind::Data => 11,
            SectionKind::DataCount => 12,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SectionKind::Custom => "custom",
            SectionKind::Type => "type",
            SectionKind::Import => "import",
            SectionKind::Function => "function",
            SectionKind::Table => "table",
            SectionKind::Memory => "memory",
            SectionKind::Global => "global",
            SectionKind::Export => "export",
            SectionKind::Start => "start",
            SectionKind::Element => "element",
            SectionKind::Code => "code",
            SectionKind::Data => "data",
            SectionKind::DataCount => "data count",
        };
        write!(f, "{}", name)
    }
}

/// Location of one section within a module buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    /// Offset of the section id byte.
    pub start: usize,
    /// Offset of the first content byte, past the id and size varint.
    pub content_start: usize,
    pub kind: SectionKind,
    pub size: usize,
}

impl SectionInfo {
    pub fn end(&self) -> usize {
        self.content_start + self.size
    }

    /// Byte range of the whole section, framing included.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Number value types (§5.3.4). Reference and vector types never surface in
/// the structures the passes rewrite, so they are not represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn decode(byte: u8) -> Result<ValueType, Error> {
        match byte {
            0x7F => Ok(ValueType::I32),
            0x7E => Ok(ValueType::I64),
            0x7D => Ok(ValueType::F32),
            0x7C => Ok(ValueType::F64),
            _ => Err(Error::InvalidValueType(byte)),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            ValueType::I32 => 0x7F,
            ValueType::I64 => 0x7E,
            ValueType::F32 => 0x7D,
            ValueType::F64 => 0x7C,
        }
    }

    pub fn is_value_type_byte(byte: u8) -> bool {
        ValueType::decode(byte).is_ok()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// Import/export descriptor kinds (§5.5.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    /// Exception-handling imports (tag kind, 4) are deliberately rejected as
    /// unsupported rather than unknown.
    pub fn decode(byte: u8) -> Result<ExternalKind, Error> {
        match byte {
            0 => Ok(ExternalKind::Func),
            1 => Ok(ExternalKind::Table),
            2 => Ok(ExternalKind::Memory),
            3 => Ok(ExternalKind::Global),
            4 => Err(Error::UnsupportedExternalKind(byte)),
            _ => Err(Error::InvalidExternalKind(byte)),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            ExternalKind::Func => 0,
            ExternalKind::Table => 1,
            ExternalKind::Memory => 2,
            ExternalKind::Global => 3,
        }
    }
}

/// A function signature from the Type section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSignature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FuncSignature {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> FuncSignature {
        FuncSignature { params, results }
    }

    /// True when any parameter is an i64, i.e. the signature cannot cross a
    /// 32-bit host-import boundary as-is.
    pub fn has_i64_param(&self) -> bool {
        self.params.contains(&ValueType::I64)
    }

    /// The import-boundary form of this signature: every i64 parameter
    /// becomes an i32. Results are left untouched.
    pub fn lowered(&self) -> FuncSignature {
        let params = self
            .params
            .iter()
            .map(|ty| match ty {
                ValueType::I64 => ValueType::I32,
                other => *other,
            })
            .collect();
        FuncSignature {
            params,
            results: self.results.clone(),
        }
    }
}

/// A type-section index, as listed by the Function section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureIndex(pub u32);

/// The payload of an import entry. Only function imports are decoded; the
/// other kinds are carried as their raw sub-encodings for verbatim re-emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDescriptor<'a> {
    Function(u32),
    Table(&'a [u8]),
    Memory(&'a [u8]),
    Global(&'a [u8]),
}

/// An entry of the Import section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import<'a> {
    pub module: &'a str,
    pub field: &'a str,
    pub descriptor: ImportDescriptor<'a>,
}

/// An element segment: a table initializer. Function indices are
/// materialized because every pass that touches this section renumbers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element<'a> {
    /// Segment flags field; always 0 (active, table 0) in the segments the
    /// passes accept.
    pub flags: u32,
    /// Raw bytes of the i32 constant offset expression, end marker included.
    pub init_expr: &'a [u8],
    pub func_indices: Vec<u32>,
}
