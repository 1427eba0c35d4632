//! Output buffer for rebuilt modules.
//!
//! Section framing is the one place a transform can silently corrupt a
//! module, so it is centralized here: `write_section` serializes the content
//! into a scratch sink first and only then emits the id and the now-known
//! size. Everything else is append-only.

use super::leb128;
use super::types::{FuncSignature, Import, ImportDescriptor, SectionKind, SignatureIndex};
use super::TYPE_FUNC;

#[derive(Debug, Default)]
pub struct ByteSink {
    bytes: Vec<u8>,
}

impl ByteSink {
    pub fn new() -> ByteSink {
        ByteSink::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_vu32(&mut self, value: u32) {
        leb128::write_vu32(&mut self.bytes, value);
    }

    pub fn write_vs32(&mut self, value: i32) {
        leb128::write_vs32(&mut self.bytes, value);
    }

    /// Writes `value` as an unsigned varint padded with continuation bytes to
    /// exactly `pad_to` bytes, for overwriting a field in place without
    /// moving its neighbors.
    pub fn write_vu32_padded(&mut self, value: u32, pad_to: usize) {
        leb128::write_vu32_padded(&mut self.bytes, value, pad_to);
    }

    /// Writes a varint-length-prefixed UTF-8 name.
    pub fn write_string(&mut self, value: &str) {
        self.write_vu32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    pub fn write_header(&mut self) {
        self.bytes.extend_from_slice(&super::MAGIC);
        self.bytes.extend_from_slice(&super::VERSION);
    }

    /// Emits one section: the body is produced into a scratch sink by
    /// `body`, then framed with its id and true byte size.
    pub fn write_section<E, F>(&mut self, kind: SectionKind, body: F) -> Result<(), E>
    where
        F: FnOnce(&mut ByteSink) -> Result<(), E>,
    {
        let mut scratch = ByteSink::new();
        body(&mut scratch)?;
        self.write_byte(kind.id());
        self.write_vu32(scratch.len() as u32);
        self.write_bytes(&scratch.bytes);
        Ok(())
    }

    /// Emits a section whose content is a counted vector of entries.
    pub fn write_vector_section<E, I>(&mut self, kind: SectionKind, entries: I) -> Result<(), E>
    where
        I: ExactSizeIterator,
        I::Item: Encode,
    {
        self.write_section(kind, |sink| {
            sink.write_vu32(entries.len() as u32);
            for entry in entries {
                entry.encode(sink);
            }
            Ok(())
        })
    }
}

/// Serialization of a section entry into a sink. The border between the
/// decoded model and raw bytes: lazily-read structures keep their original
/// bytes, decoded ones re-serialize through this trait.
pub trait Encode {
    fn encode(&self, sink: &mut ByteSink);
}

impl<'a, T: Encode + ?Sized> Encode for &'a T {
    fn encode(&self, sink: &mut ByteSink) {
        (*self).encode(sink)
    }
}

impl Encode for FuncSignature {
    fn encode(&self, sink: &mut ByteSink) {
        sink.write_byte(TYPE_FUNC);
        sink.write_vu32(self.params.len() as u32);
        for ty in &self.params {
            sink.write_byte(ty.id());
        }
        sink.write_vu32(self.results.len() as u32);
        for ty in &self.results {
            sink.write_byte(ty.id());
        }
    }
}

impl Encode for SignatureIndex {
    fn encode(&self, sink: &mut ByteSink) {
        sink.write_vu32(self.0);
    }
}

impl<'a> Encode for Import<'a> {
    fn encode(&self, sink: &mut ByteSink) {
        sink.write_string(self.module);
        sink.write_string(self.field);
        match &self.descriptor {
            ImportDescriptor::Function(sig_index) => {
                sink.write_byte(0x00);
                sink.write_vu32(*sig_index);
            }
            ImportDescriptor::Table(raw) => {
                sink.write_byte(0x01);
                sink.write_bytes(raw);
            }
            ImportDescriptor::Memory(raw) => {
                sink.write_byte(0x02);
                sink.write_bytes(raw);
            }
            ImportDescriptor::Global(raw) => {
                sink.write_byte(0x03);
                sink.write_bytes(raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::types::ValueType;
    use crate::codec::Error;

    #[test]
    fn section_framing_measures_body() {
        let mut sink = ByteSink::new();
        sink.write_section::<Error, _>(SectionKind::Custom, |body| {
            body.write_bytes(&[0x04, b'n', b'a', b'm', b'e']);
            Ok(())
        })
        .unwrap();
        assert_eq!(sink.into_bytes(), vec![0x00, 0x05, 0x04, b'n', b'a', b'm', b'e']);
    }

    #[test]
    fn empty_section_has_zero_size() {
        let mut sink = ByteSink::new();
        sink.write_section::<Error, _>(SectionKind::Import, |_| Ok(())).unwrap();
        assert_eq!(sink.into_bytes(), vec![0x02, 0x00]);
    }

    #[test]
    fn body_error_leaves_sink_untouched() {
        let mut sink = ByteSink::new();
        let result = sink.write_section::<Error, _>(SectionKind::Code, |body| {
            body.write_byte(0xFF);
            Err(Error::ExpectEnd)
        });
        assert_eq!(result, Err(Error::ExpectEnd));
        assert!(sink.is_empty());
    }

    #[test]
    fn func_signature_encoding() {
        let sig = FuncSignature::new(vec![ValueType::I64, ValueType::F32], vec![ValueType::I32]);
        let mut sink = ByteSink::new();
        sig.encode(&mut sink);
        assert_eq!(sink.into_bytes(), vec![0x60, 0x02, 0x7E, 0x7D, 0x01, 0x7F]);
    }

    #[test]
    fn vector_section_counts_entries() {
        let sigs = vec![
            FuncSignature::new(vec![], vec![]),
            FuncSignature::new(vec![ValueType::I32], vec![]),
        ];
        let mut sink = ByteSink::new();
        sink.write_vector_section::<Error, _>(SectionKind::Type, sigs.iter())
            .unwrap();
        assert_eq!(
            sink.into_bytes(),
            vec![0x01, 0x08, 0x02, 0x60, 0x00, 0x00, 0x60, 0x01, 0x7F, 0x00]
        );
    }

    #[test]
    fn import_encoding_round_trips() {
        let import = Import {
            module: "env",
            field: "log",
            descriptor: ImportDescriptor::Function(3),
        };
        let mut sink = ByteSink::new();
        import.encode(&mut sink);
        let bytes = sink.into_bytes();
        assert_eq!(
            bytes,
            vec![0x03, b'e', b'n', b'v', 0x03, b'l', b'o', b'g', 0x00, 0x03]
        );
    }

    #[test]
    fn padded_index_keeps_width() {
        let mut sink = ByteSink::new();
        sink.write_vu32_padded(3, 2);
        assert_eq!(sink.into_bytes(), vec![0x83, 0x00]);
    }
}
