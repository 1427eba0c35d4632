//! Section-aware codec for the WebAssembly binary format.
//!
//! Everything here operates on in-memory byte buffers: [`cursor::ByteCursor`]
//! reads, [`sink::ByteSink`] writes, and [`readers`] layers typed, lazy
//! section decoding on top of the cursor. The passes in [`crate::passes`] are
//! built entirely from these pieces.

pub mod cursor;
pub mod leb128;
pub mod readers;
pub mod sink;
pub mod types;

use thiserror::Error;

/// Module preamble: magic number and version (§5.5.16 of the wasm spec).
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
pub const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

// Type constructors (§5.3.6)
pub const TYPE_FUNC: u8 = 0x60;

// Opcodes the passes understand structurally (§5.4)
pub const OP_IF: u8 = 0x04;
pub const OP_END: u8 = 0x0B;
pub const OP_CALL: u8 = 0x10;
pub const OP_DROP: u8 = 0x1A;
pub const OP_LOCAL_GET: u8 = 0x20;
pub const OP_LOCAL_SET: u8 = 0x21;
pub const OP_GLOBAL_SET: u8 = 0x24;
pub const OP_I32_CONST: u8 = 0x41;
pub const OP_I32_LT_S: u8 = 0x48;
pub const OP_I32_WRAP_I64: u8 = 0xA7;

// Block type: empty (§5.4.1)
pub const BLOCK_TYPE_EMPTY: u8 = 0x40;

// Limits flags (§5.3.7)
pub const LIMITS_HAS_MAX_FLAG: u8 = 0x1;

/// Binary-format decoding failures.
///
/// Every variant is a hard stop: a malformed module aborts the whole
/// transform with no partial output.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("bad magic: 0x{}", hex::encode(.0))]
    BadMagic([u8; 4]),
    #[error("bad version: 0x{}", hex::encode(.0))]
    BadVersion([u8; 4]),
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("unknown section id: {0}")]
    UnknownSection(u8),
    #[error("invalid value type: 0x{0:02x}")]
    InvalidValueType(u8),
    #[error("invalid external kind: {0}")]
    InvalidExternalKind(u8),
    #[error("unsupported external kind: {0}")]
    UnsupportedExternalKind(u8),
    #[error("unsupported type definition kind: 0x{0:02x}")]
    UnsupportedTypeKind(u8),
    #[error("expected a constant opcode, got 0x{0:02x}")]
    ExpectConstOpcode(u8),
    #[error("expected i32.const, got opcode 0x{0:02x}")]
    ExpectI32Const(u8),
    #[error("expected end opcode")]
    ExpectEnd,
    #[error("unexpected opcode 0x{0:02x}")]
    UnexpectedOpcode(u8),
    #[error("varint is too long for its target width")]
    VarintOverflow,
    #[error("invalid utf-8 in name")]
    InvalidUtf8,
}
