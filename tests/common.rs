//! Common test utilities shared between integration tests

use rewasm::codec::sink::ByteSink;
use rewasm::codec::types::SectionKind;
use rewasm::codec::Error;

/// Builds module byte buffers section by section, framing each one through
/// the same sink path the passes emit with.
pub struct ModuleBuilder {
    sink: ByteSink,
}

impl ModuleBuilder {
    pub fn new() -> ModuleBuilder {
        let mut sink = ByteSink::new();
        sink.write_header();
        ModuleBuilder { sink }
    }

    /// Appends a section with the given raw content (everything after the
    /// size prefix).
    pub fn section(mut self, kind: SectionKind, content: &[u8]) -> ModuleBuilder {
        self.sink
            .write_section::<Error, _>(kind, |body| {
                body.write_bytes(content);
                Ok(())
            })
            .unwrap();
        self
    }

    /// Appends a custom section with the given name and payload.
    pub fn custom(mut self, name: &str, payload: &[u8]) -> ModuleBuilder {
        self.sink
            .write_section::<Error, _>(SectionKind::Custom, |body| {
                body.write_string(name);
                body.write_bytes(payload);
                Ok(())
            })
            .unwrap();
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.sink.into_bytes()
    }
}

impl Default for ModuleBuilder {
    fn default() -> ModuleBuilder {
        ModuleBuilder::new()
    }
}
