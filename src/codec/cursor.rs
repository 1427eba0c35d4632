//! Forward-only read cursor over an immutable module buffer.
//!
//! The cursor is the single piece of mutable reader state in a transform: it
//! is threaded by exclusive reference through every sub-routine, and every
//! read advances the offset by exactly the consumed byte count. Structural
//! helpers return borrowed byte ranges so callers can re-emit sub-structures
//! verbatim without decoding them.

use byteorder::{ByteOrder, LittleEndian};

use super::types::{ExternalKind, FuncSignature, Import, ImportDescriptor, SectionInfo, SectionKind, ValueType};
use super::{leb128, Error, LIMITS_HAS_MAX_FLAG, MAGIC, OP_CALL, OP_END};

const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteCursor<'a> {
        ByteCursor { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The whole underlying buffer. Used together with the byte ranges the
    /// structural helpers return to copy untouched spans into a sink.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn skip(&mut self, len: usize) {
        self.offset += len;
    }

    pub fn read(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.offset + len > self.bytes.len() {
            return Err(Error::UnexpectedEof(self.offset));
        }
        let result = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(result)
    }

    pub fn read_byte(&mut self) -> Result<u8, Error> {
        let bytes = self.read(1)?;
        Ok(bytes[0])
    }

    pub fn read_vu32(&mut self) -> Result<u32, Error> {
        let (value, consumed) = leb128::read_vu32(&self.bytes[self.offset..])
            .map_err(|e| e.at(self.offset))?;
        self.offset += consumed;
        Ok(value)
    }

    pub fn read_vu64(&mut self) -> Result<u64, Error> {
        let (value, consumed) = leb128::read_vu64(&self.bytes[self.offset..])
            .map_err(|e| e.at(self.offset))?;
        self.offset += consumed;
        Ok(value)
    }

    /// Reads a varint-length-prefixed UTF-8 name (§5.2.4).
    pub fn read_string(&mut self) -> Result<&'a str, Error> {
        let len = self.read_vu32()? as usize;
        let bytes = self.read(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Checks the 8-byte preamble. Fails before anything else can happen on
    /// a buffer that is not a wasm module.
    pub fn read_header(&mut self) -> Result<(), Error> {
        let magic = self.read(4).map_err(|_| short_preamble(self.bytes))?;
        if magic != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(Error::BadMagic(found));
        }
        let version = self.read(4).map_err(|_| short_preamble(self.bytes))?;
        if LittleEndian::read_u32(version) != SUPPORTED_VERSION {
            let mut found = [0u8; 4];
            found.copy_from_slice(version);
            return Err(Error::BadVersion(found));
        }
        Ok(())
    }

    /// Decodes one section header: `[id:1][size:vu32]`.
    pub fn read_section_info(&mut self) -> Result<SectionInfo, Error> {
        let start = self.offset;
        let kind = SectionKind::decode(self.read_byte()?)?;
        let size = self.read_vu32()? as usize;
        let content_start = self.offset;
        if content_start + size > self.bytes.len() {
            return Err(Error::UnexpectedEof(content_start));
        }
        Ok(SectionInfo {
            start,
            content_start,
            kind,
            size,
        })
    }

    /// Walks the whole module and returns every section's location, in
    /// order. The cursor must sit at offset 0.
    pub fn read_sections_info(&mut self) -> Result<Vec<SectionInfo>, Error> {
        debug_assert_eq!(self.offset, 0);
        self.read_header()?;
        let mut result = Vec::new();
        while !self.is_at_end() {
            let info = self.read_section_info()?;
            self.seek(info.end());
            result.push(info);
        }
        Ok(result)
    }

    pub fn read_value_type(&mut self) -> Result<ValueType, Error> {
        ValueType::decode(self.read_byte()?)
    }

    /// Reads a result-type vector (§5.3.5).
    pub fn read_result_types(&mut self) -> Result<Vec<ValueType>, Error> {
        let count = self.read_vu32()?;
        let mut types = Vec::with_capacity(count as usize);
        for _ in 0..count {
            types.push(self.read_value_type()?);
        }
        Ok(types)
    }

    /// Reads the params/results of a function type, past its 0x60 tag.
    pub fn read_func_type(&mut self) -> Result<FuncSignature, Error> {
        let params = self.read_result_types()?;
        let results = self.read_result_types()?;
        Ok(FuncSignature::new(params, results))
    }

    pub fn read_external_kind(&mut self) -> Result<ExternalKind, Error> {
        ExternalKind::decode(self.read_byte()?)
    }

    pub fn read_import_descriptor(&mut self) -> Result<ImportDescriptor<'a>, Error> {
        match self.read_external_kind()? {
            ExternalKind::Func => Ok(ImportDescriptor::Function(self.read_vu32()?)),
            ExternalKind::Table => Ok(ImportDescriptor::Table(self.consume_table()?)),
            ExternalKind::Memory => Ok(ImportDescriptor::Memory(self.consume_memory()?)),
            ExternalKind::Global => Ok(ImportDescriptor::Global(self.consume_global_header()?)),
        }
    }

    /// Reads one import entry (§5.5.5).
    pub fn read_import(&mut self) -> Result<Import<'a>, Error> {
        let module = self.read_string()?;
        let field = self.read_string()?;
        let descriptor = self.read_import_descriptor()?;
        Ok(Import {
            module,
            field,
            descriptor,
        })
    }

    fn span_from(&self, start: usize) -> &'a [u8] {
        &self.bytes[start..self.offset]
    }

    /// Skips a table type (§5.3.8), returning its raw bytes.
    pub fn consume_table(&mut self) -> Result<&'a [u8], Error> {
        let start = self.offset;
        self.read_byte()?; // element type
        self.consume_limits()?;
        Ok(self.span_from(start))
    }

    /// Skips a memory type (§5.3.9), returning its raw bytes.
    pub fn consume_memory(&mut self) -> Result<&'a [u8], Error> {
        let start = self.offset;
        self.consume_limits()?;
        Ok(self.span_from(start))
    }

    fn consume_limits(&mut self) -> Result<(), Error> {
        let flags = self.read_byte()?;
        self.read_vu32()?; // initial
        if flags & LIMITS_HAS_MAX_FLAG != 0 {
            self.read_vu32()?; // max
        }
        Ok(())
    }

    /// Skips a global header: value type + mutability (§5.3.10).
    pub fn consume_global_header(&mut self) -> Result<&'a [u8], Error> {
        let start = self.offset;
        self.read_byte()?; // value type
        self.read_byte()?; // mutable
        Ok(self.span_from(start))
    }

    /// Consumes an `i32.const n; end` initializer expression and returns its
    /// raw bytes. Anything else is malformed in the segments the passes
    /// accept.
    pub fn consume_i32_init_expr(&mut self) -> Result<&'a [u8], Error> {
        let start = self.offset;
        let code = self.read_byte()?;
        match code {
            0x41 => {
                self.read_vu32()?;
            }
            0x42 | 0x43 | 0x44 => return Err(Error::ExpectI32Const(code)),
            _ => return Err(Error::ExpectConstOpcode(code)),
        }
        if self.read_byte()? != OP_END {
            return Err(Error::ExpectEnd);
        }
        Ok(self.span_from(start))
    }

    /// Consumes one locals run: `(count, value type)`. Returns the run count
    /// and its raw bytes.
    pub fn consume_local(&mut self) -> Result<(u32, &'a [u8]), Error> {
        let start = self.offset;
        let count = self.read_vu32()?;
        self.read_byte()?; // value type
        Ok((count, self.span_from(start)))
    }

    /// Consumes a whole locals declaration block (§5.4.6) and returns its raw
    /// bytes, leading run count included.
    pub fn consume_locals(&mut self) -> Result<&'a [u8], Error> {
        let start = self.offset;
        let runs = self.read_vu32()?;
        for _ in 0..runs {
            self.consume_local()?;
        }
        Ok(self.span_from(start))
    }

    fn consume_block_type(&mut self) -> Result<(), Error> {
        let head = *self
            .bytes
            .get(self.offset)
            .ok_or(Error::UnexpectedEof(self.offset))?;
        if head == super::BLOCK_TYPE_EMPTY || ValueType::is_value_type_byte(head) {
            self.offset += 1;
        } else {
            // s33 type index
            let (_, consumed) =
                leb128::read_vs64(&self.bytes[self.offset..]).map_err(|e| e.at(self.offset))?;
            self.offset += consumed;
        }
        Ok(())
    }

    fn consume_br_table(&mut self) -> Result<(), Error> {
        let count = self.read_vu32()?;
        for _ in 0..count {
            self.read_vu32()?;
        }
        self.read_vu32()?; // default label
        Ok(())
    }

    fn consume_memory_arg(&mut self) -> Result<(), Error> {
        self.read_vu32()?; // align
        self.read_vu32()?; // offset
        Ok(())
    }

    fn consume_misc_inst(&mut self) -> Result<(), Error> {
        let sub = self.read_vu32()?;
        match sub {
            // i32/i64 trunc_sat
            0..=7 => {}
            // memory.init
            8 => {
                self.read_vu32()?;
                self.read_byte()?;
            }
            // data.drop, elem.drop
            9 | 13 => {
                self.read_vu32()?;
            }
            // memory.copy
            10 => {
                self.read_byte()?;
                self.read_byte()?;
            }
            // memory.fill
            11 => {
                self.read_byte()?;
            }
            // table.init, table.copy
            12 | 14 => {
                self.read_vu32()?;
                self.read_vu32()?;
            }
            _ => return Err(Error::UnexpectedOpcode(0xFC)),
        }
        Ok(())
    }

    /// Skips the immediates of an opcode that has already been read. The
    /// instruction set is closed: an opcode outside it is a format error,
    /// never silently skipped, because a wrong guess at an immediate width
    /// would corrupt every offset after it.
    pub fn consume_inst(&mut self, code: u8) -> Result<(), Error> {
        match code {
            // unreachable, nop
            0x00 | 0x01 => {}
            // block, loop, if
            0x02..=0x04 => self.consume_block_type()?,
            // else, end
            0x05 | 0x0B => {}
            // br, br_if
            0x0C | 0x0D => {
                self.read_vu32()?;
            }
            0x0E => self.consume_br_table()?,
            // return
            0x0F => {}
            // call
            0x10 => {
                self.read_vu32()?;
            }
            // call_indirect
            0x11 => {
                self.read_vu32()?; // type index
                self.read_byte()?; // table index
            }
            // drop, select
            0x1A | 0x1B => {}
            // local/global access
            0x20..=0x24 => {
                self.read_vu32()?;
            }
            // loads and stores
            0x28..=0x3E => self.consume_memory_arg()?,
            // memory.size, memory.grow
            0x3F | 0x40 => {
                self.read_byte()?;
            }
            // i32.const, i64.const
            0x41 => {
                self.read_vu32()?;
            }
            0x42 => {
                self.read_vu64()?;
            }
            // f32.const, f64.const
            0x43 => {
                self.read(4)?;
            }
            0x44 => {
                self.read(8)?;
            }
            // comparisons, arithmetic, conversions, sign extensions
            0x45..=0xC4 => {}
            0xFC => self.consume_misc_inst()?,
            _ => return Err(Error::UnexpectedOpcode(code)),
        }
        Ok(())
    }

    /// Reads one instruction; returns the callee index when it is a `call`,
    /// consuming anything else opaquely.
    pub fn read_call(&mut self) -> Result<Option<u32>, Error> {
        let code = self.read_byte()?;
        if code == OP_CALL {
            Ok(Some(self.read_vu32()?))
        } else {
            self.consume_inst(code)?;
            Ok(None)
        }
    }

}

fn short_preamble(bytes: &[u8]) -> Error {
    let mut found = [0u8; 4];
    for (i, b) in bytes.iter().take(4).enumerate() {
        found[i] = *b;
    }
    Error::BadMagic(found)
}

impl Error {
    /// Rebases an EOF error from a sub-slice onto an absolute buffer offset.
    fn at(self, base: usize) -> Error {
        match self {
            Error::UnexpectedEof(rel) => Error::UnexpectedEof(base + rel),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VERSION;

    fn module(sections: &[&[u8]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&VERSION);
        for section in sections {
            bytes.extend_from_slice(section);
        }
        bytes
    }

    #[test]
    fn header_accepts_preamble() {
        let bytes = module(&[]);
        let mut cur = ByteCursor::new(&bytes);
        cur.read_header().unwrap();
        assert!(cur.is_at_end());
    }

    #[test]
    fn header_rejects_wrong_magic_bytes() {
        let mut cur = ByteCursor::new(b"\x7fELF\x01\x00\x00\x00");
        assert_eq!(
            cur.read_header(),
            Err(Error::BadMagic([0x7F, 0x45, 0x4C, 0x46]))
        );
    }

    #[test]
    fn header_rejects_truncated_buffer() {
        let mut cur = ByteCursor::new(&[0x00, 0x61]);
        assert!(matches!(cur.read_header(), Err(Error::BadMagic(_))));
    }

    #[test]
    fn header_rejects_bad_version() {
        let mut cur = ByteCursor::new(b"\0asm\x02\x00\x00\x00");
        assert_eq!(
            cur.read_header(),
            Err(Error::BadVersion([0x02, 0x00, 0x00, 0x00]))
        );
    }

    #[test]
    fn sections_info_walk() {
        // type (func) ; function [0] ; code {nop}
        let bytes = module(&[
            &[0x01, 0x04, 0x01, 0x60, 0x00, 0x00],
            &[0x03, 0x02, 0x01, 0x00],
            &[0x0A, 0x05, 0x01, 0x03, 0x00, 0x01, 0x0B],
        ]);
        let mut cur = ByteCursor::new(&bytes);
        let infos = cur.read_sections_info().unwrap();
        assert_eq!(
            infos,
            vec![
                SectionInfo { start: 8, content_start: 10, kind: SectionKind::Type, size: 4 },
                SectionInfo { start: 14, content_start: 16, kind: SectionKind::Function, size: 2 },
                SectionInfo { start: 18, content_start: 20, kind: SectionKind::Code, size: 5 },
            ]
        );
    }

    #[test]
    fn section_size_past_buffer_is_eof() {
        let bytes = module(&[&[0x01, 0x7F]]);
        let mut cur = ByteCursor::new(&bytes);
        assert!(matches!(
            cur.read_sections_info(),
            Err(Error::UnexpectedEof(_))
        ));
    }

    #[test]
    fn init_expr_round_trip() {
        let bytes = [0x41, 0x80, 0x01, 0x0B, 0xFF];
        let mut cur = ByteCursor::new(&bytes);
        let expr = cur.consume_i32_init_expr().unwrap();
        assert_eq!(expr, &[0x41, 0x80, 0x01, 0x0B]);
        assert_eq!(cur.offset(), 4);
    }

    #[test]
    fn init_expr_rejects_i64_const() {
        let bytes = [0x42, 0x00, 0x0B];
        let mut cur = ByteCursor::new(&bytes);
        assert_eq!(cur.consume_i32_init_expr(), Err(Error::ExpectI32Const(0x42)));
    }

    #[test]
    fn init_expr_requires_end() {
        let bytes = [0x41, 0x00, 0x01];
        let mut cur = ByteCursor::new(&bytes);
        assert_eq!(cur.consume_i32_init_expr(), Err(Error::ExpectEnd));
    }

    #[test]
    fn locals_block_span() {
        // two runs: 2 x i32, 1 x i64
        let bytes = [0x02, 0x02, 0x7F, 0x01, 0x7E, 0xAA];
        let mut cur = ByteCursor::new(&bytes);
        let span = cur.consume_locals().unwrap();
        assert_eq!(span, &bytes[..5]);
    }

    #[test]
    fn call_probe_skips_other_instructions() {
        // i32.const 1; call 7; end
        let bytes = [0x41, 0x01, 0x10, 0x07, 0x0B];
        let mut cur = ByteCursor::new(&bytes);
        assert_eq!(cur.read_call().unwrap(), None);
        assert_eq!(cur.read_call().unwrap(), Some(7));
        assert_eq!(cur.read_call().unwrap(), None);
        assert!(cur.is_at_end());
    }

    #[test]
    fn consume_inst_skips_immediates() {
        // local.get 0; global.set 0; block (empty); end
        let bytes = [0x20, 0x00, 0x24, 0x00, 0x02, 0x40, 0x0B];
        let mut cur = ByteCursor::new(&bytes);
        while !cur.is_at_end() {
            let code = cur.read_byte().unwrap();
            cur.consume_inst(code).unwrap();
        }
        assert_eq!(cur.offset(), bytes.len());
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut cur = ByteCursor::new(&[0xD0, 0x70]);
        assert_eq!(cur.read_call(), Err(Error::UnexpectedOpcode(0xD0)));
    }

    #[test]
    fn import_entry_decodes() {
        // "foo" "bar" func 2
        let bytes = [0x03, b'f', b'o', b'o', 0x03, b'b', b'a', b'r', 0x00, 0x02];
        let mut cur = ByteCursor::new(&bytes);
        let import = cur.read_import().unwrap();
        assert_eq!(import.module, "foo");
        assert_eq!(import.field, "bar");
        assert_eq!(import.descriptor, ImportDescriptor::Function(2));
    }

    #[test]
    fn import_rejects_exception_kind() {
        let bytes = [0x01, b'm', 0x01, b'f', 0x04, 0x00];
        let mut cur = ByteCursor::new(&bytes);
        assert_eq!(cur.read_import(), Err(Error::UnsupportedExternalKind(4)));
    }
}
