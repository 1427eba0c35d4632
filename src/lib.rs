//! Semantics-preserving binary rewrites for WebAssembly modules.
//!
//! rewasm reads a serialized module, applies one or more transformation
//! passes, and re-emits a valid module. Sections the active pass does not
//! rewrite move through byte for byte; only the structures a rewrite
//! touches are decoded and re-serialized.
//!
//! # Modules
//!
//! - [`codec`] -- Binary format plumbing: LEB128 varints, the byte
//!   cursor/sink pair, and lazy typed section readers.
//! - [`instr`] -- The decoded instruction model for synthesized code.
//! - [`passes`] -- The rewrite passes and their pipeline driver.
//!
//! # Example
//!
//! Lower the i64-parameter imports of a module and strip its custom
//! sections:
//!
//! ```
//! use rewasm::passes::{lower_i64_imports, strip_custom_sections};
//!
//! let module: &[u8] = &[
//!     0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // header
//!     0x01, 0x05, 0x01, 0x60, 0x01, 0x7E, 0x00,       // type (i64) -> ()
//!     0x02, 0x0B, 0x01, 0x03, b'f', b'o', b'o', 0x03, b'b', b'a', b'r',
//!     0x00, 0x00,                                     // import "foo"."bar"
//! ];
//!
//! let lowered = lower_i64_imports(module).unwrap();
//! let stripped = strip_custom_sections(&lowered).unwrap();
//! assert!(stripped.starts_with(&[0x00, 0x61, 0x73, 0x6D]));
//! ```
//!
//! # Format
//!
//! Targets the [WebAssembly core binary format](https://webassembly.github.io/spec/core/binary/)
//! as emitted by MVP-era toolchains, plus the bulk memory prefix opcodes.

pub mod codec;
pub mod instr;
pub mod passes;
