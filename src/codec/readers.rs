//! Lazy, pull-based readers over section content.
//!
//! A reader decodes its leading entry count up front and then yields one
//! entry per `read_next` call, so a pass that only needs the import section
//! never pays for decoding code bodies. Iteration is fail-closed: after the
//! first decode error the reader yields nothing further, since every later
//! offset would be derived from a corrupt position.

use super::cursor::ByteCursor;
use super::types::{Element, FuncSignature, Import, SectionInfo, SectionKind, SignatureIndex, ValueType};
use super::{Error, TYPE_FUNC};

/// A counted section vector that can be pulled entry by entry.
pub trait VectorReader {
    type Entry;

    fn count(&self) -> u32;

    /// Decodes the next entry, `None` once the declared count is exhausted.
    fn read_next(&mut self) -> Result<Option<Self::Entry>, Error>;

    /// Drains the reader into a vector, failing on the first bad entry.
    fn collect_all(mut self) -> Result<Vec<Self::Entry>, Error>
    where
        Self: Sized,
    {
        let mut entries = Vec::with_capacity(self.count() as usize);
        while let Some(entry) = self.read_next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn entries(self) -> Entries<Self>
    where
        Self: Sized,
    {
        Entries {
            reader: self,
            failed: false,
        }
    }
}

/// Fail-closed iterator adapter over a [`VectorReader`].
pub struct Entries<R> {
    reader: R,
    failed: bool,
}

impl<R: VectorReader> Iterator for Entries<R> {
    type Item = Result<R::Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.read_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

macro_rules! counted_reader {
    ($name:ident) => {
        impl<'a> $name<'a> {
            pub fn new(content: &'a [u8]) -> Result<$name<'a>, Error> {
                let mut cursor = ByteCursor::new(content);
                let count = cursor.read_vu32()?;
                Ok($name {
                    cursor,
                    count,
                    read: 0,
                })
            }

            fn next_slot(&mut self) -> Option<()> {
                if self.read == self.count {
                    None
                } else {
                    self.read += 1;
                    Some(())
                }
            }
        }
    };
}

/// Reader over the Type section: one [`FuncSignature`] per entry.
pub struct TypeSectionReader<'a> {
    cursor: ByteCursor<'a>,
    count: u32,
    read: u32,
}

counted_reader!(TypeSectionReader);

impl<'a> VectorReader for TypeSectionReader<'a> {
    type Entry = FuncSignature;

    fn count(&self) -> u32 {
        self.count
    }

    fn read_next(&mut self) -> Result<Option<FuncSignature>, Error> {
        if self.next_slot().is_none() {
            return Ok(None);
        }
        let tag = self.cursor.read_byte()?;
        if tag != TYPE_FUNC {
            return Err(Error::UnsupportedTypeKind(tag));
        }
        self.cursor.read_func_type().map(Some)
    }
}

/// Reader over the Import section. Names borrow from the module buffer.
pub struct ImportSectionReader<'a> {
    cursor: ByteCursor<'a>,
    count: u32,
    read: u32,
}

counted_reader!(ImportSectionReader);

impl<'a> VectorReader for ImportSectionReader<'a> {
    type Entry = Import<'a>;

    fn read_next(&mut self) -> Result<Option<Import<'a>>, Error> {
        if self.next_slot().is_none() {
            return Ok(None);
        }
        self.cursor.read_import().map(Some)
    }

    fn count(&self) -> u32 {
        self.count
    }
}

/// Reader over the Function section: the signature index of each defined
/// function, in declaration order.
pub struct FunctionSectionReader<'a> {
    cursor: ByteCursor<'a>,
    count: u32,
    read: u32,
}

counted_reader!(FunctionSectionReader);

impl<'a> VectorReader for FunctionSectionReader<'a> {
    type Entry = SignatureIndex;

    fn count(&self) -> u32 {
        self.count
    }

    fn read_next(&mut self) -> Result<Option<SignatureIndex>, Error> {
        if self.next_slot().is_none() {
            return Ok(None);
        }
        self.cursor.read_vu32().map(SignatureIndex).map(Some)
    }
}

/// Reader over the Element section. Function indices are decoded eagerly per
/// segment; the init expression stays raw.
pub struct ElementSectionReader<'a> {
    cursor: ByteCursor<'a>,
    count: u32,
    read: u32,
}

counted_reader!(ElementSectionReader);

impl<'a> VectorReader for ElementSectionReader<'a> {
    type Entry = Element<'a>;

    fn count(&self) -> u32 {
        self.count
    }

    fn read_next(&mut self) -> Result<Option<Element<'a>>, Error> {
        if self.next_slot().is_none() {
            return Ok(None);
        }
        let flags = self.cursor.read_vu32()?;
        let init_expr = self.cursor.consume_i32_init_expr()?;
        let index_count = self.cursor.read_vu32()?;
        let mut func_indices = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            func_indices.push(self.cursor.read_vu32()?);
        }
        Ok(Some(Element {
            flags,
            init_expr,
            func_indices,
        }))
    }
}

/// Reader over the Code section: one [`FunctionBody`] per defined function.
pub struct CodeSectionReader<'a> {
    cursor: ByteCursor<'a>,
    count: u32,
    read: u32,
}

counted_reader!(CodeSectionReader);

impl<'a> VectorReader for CodeSectionReader<'a> {
    type Entry = FunctionBody<'a>;

    fn count(&self) -> u32 {
        self.count
    }

    fn read_next(&mut self) -> Result<Option<FunctionBody<'a>>, Error> {
        if self.next_slot().is_none() {
            return Ok(None);
        }
        let size = self.cursor.read_vu32()? as usize;
        let bytes = self.cursor.read(size)?;
        Ok(Some(FunctionBody { bytes }))
    }
}

/// One entry of the Code section, past its size prefix: the locals
/// declaration block followed by the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionBody<'a> {
    bytes: &'a [u8],
}

impl<'a> FunctionBody<'a> {
    pub fn new(bytes: &'a [u8]) -> FunctionBody<'a> {
        FunctionBody { bytes }
    }

    pub fn raw(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn locals_reader(&self) -> Result<LocalsReader<'a>, Error> {
        let mut cursor = ByteCursor::new(self.bytes);
        let count = cursor.read_vu32()?;
        Ok(LocalsReader {
            cursor,
            count,
            read: 0,
        })
    }
}

/// Reader over a body's locals runs. Once drained, [`LocalsReader::code`]
/// yields the instruction stream that follows.
pub struct LocalsReader<'a> {
    cursor: ByteCursor<'a>,
    count: u32,
    read: u32,
}

impl<'a> LocalsReader<'a> {
    /// The instruction bytes after the locals block. Valid only once every
    /// run has been read.
    pub fn code(&self) -> &'a [u8] {
        debug_assert_eq!(self.read, self.count);
        &self.cursor.bytes()[self.cursor.offset()..]
    }
}

impl<'a> VectorReader for LocalsReader<'a> {
    type Entry = (u32, ValueType);

    fn count(&self) -> u32 {
        self.count
    }

    fn read_next(&mut self) -> Result<Option<(u32, ValueType)>, Error> {
        if self.read == self.count {
            return Ok(None);
        }
        self.read += 1;
        let count = self.cursor.read_vu32()?;
        let ty = self.cursor.read_value_type()?;
        Ok(Some((count, ty)))
    }
}

/// Lazy walk over a whole module, one section at a time. The header is
/// checked on construction.
pub struct ModuleReader<'a> {
    cursor: ByteCursor<'a>,
}

impl<'a> ModuleReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<ModuleReader<'a>, Error> {
        let mut cursor = ByteCursor::new(bytes);
        cursor.read_header()?;
        Ok(ModuleReader { cursor })
    }

    pub fn read_next(&mut self) -> Result<Option<ModuleSection<'a>>, Error> {
        if self.cursor.is_at_end() {
            return Ok(None);
        }
        let info = self.cursor.read_section_info()?;
        let content = self.cursor.read(info.size)?;
        Ok(Some(ModuleSection { info, content }))
    }
}

/// One located section with its content bytes (size prefix excluded).
#[derive(Debug, Clone, Copy)]
pub struct ModuleSection<'a> {
    pub info: SectionInfo,
    pub content: &'a [u8],
}

impl<'a> ModuleSection<'a> {
    pub fn kind(&self) -> SectionKind {
        self.info.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // (i64) -> i32 ; () -> ()
    const TYPE_CONTENT: &[u8] = &[0x02, 0x60, 0x01, 0x7E, 0x01, 0x7F, 0x60, 0x00, 0x00];

    #[test]
    fn type_reader_yields_signatures() {
        let reader = TypeSectionReader::new(TYPE_CONTENT).unwrap();
        assert_eq!(reader.count(), 2);
        let sigs = reader.collect_all().unwrap();
        assert_eq!(
            sigs,
            vec![
                FuncSignature::new(vec![ValueType::I64], vec![ValueType::I32]),
                FuncSignature::new(vec![], vec![]),
            ]
        );
    }

    #[test]
    fn type_reader_rejects_non_func_type() {
        let content = [0x01, 0x5F, 0x00];
        let mut reader = TypeSectionReader::new(&content).unwrap();
        assert_eq!(reader.read_next(), Err(Error::UnsupportedTypeKind(0x5F)));
    }

    #[test]
    fn entries_iterator_stops_after_error() {
        // declared count 2 but the buffer ends mid-entry
        let content = [0x02, 0x60, 0x01];
        let reader = TypeSectionReader::new(&content).unwrap();
        let results: Vec<_> = reader.entries().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn import_reader_borrows_names() {
        let content = [
            0x01, 0x03, b'e', b'n', b'v', 0x01, b'f', 0x00, 0x00,
        ];
        let imports = ImportSectionReader::new(&content).unwrap().collect_all().unwrap();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].module, "env");
        assert_eq!(imports[0].field, "f");
    }

    #[test]
    fn function_reader_yields_indices() {
        let content = [0x03, 0x00, 0x01, 0x00];
        let indices = FunctionSectionReader::new(&content)
            .unwrap()
            .collect_all()
            .unwrap();
        assert_eq!(
            indices,
            vec![SignatureIndex(0), SignatureIndex(1), SignatureIndex(0)]
        );
    }

    #[test]
    fn element_reader_materializes_indices() {
        // table 0, offset i32.const 1, funcs [2, 3]
        let content = [0x01, 0x00, 0x41, 0x01, 0x0B, 0x02, 0x02, 0x03];
        let elements = ElementSectionReader::new(&content)
            .unwrap()
            .collect_all()
            .unwrap();
        assert_eq!(elements[0].flags, 0);
        assert_eq!(elements[0].init_expr, &[0x41, 0x01, 0x0B]);
        assert_eq!(elements[0].func_indices, vec![2, 3]);
    }

    #[test]
    fn code_reader_splits_bodies() {
        let content = [
            0x02, // two bodies
            0x04, 0x00, 0x41, 0x2A, 0x0B, // no locals; i32.const 42; end
            0x02, 0x00, 0x0B, // no locals; end
        ];
        let bodies = CodeSectionReader::new(&content).unwrap().collect_all().unwrap();
        assert_eq!(bodies[0].raw(), &[0x00, 0x41, 0x2A, 0x0B]);
        assert_eq!(bodies[1].raw(), &[0x00, 0x0B]);
    }

    #[test]
    fn locals_reader_yields_runs_then_code() {
        // 2 x i32, 3 x i64; then `end`
        let body = FunctionBody::new(&[0x02, 0x02, 0x7F, 0x03, 0x7E, 0x0B]);
        let mut locals = body.locals_reader().unwrap();
        assert_eq!(locals.read_next().unwrap(), Some((2, ValueType::I32)));
        assert_eq!(locals.read_next().unwrap(), Some((3, ValueType::I64)));
        assert_eq!(locals.read_next().unwrap(), None);
        assert_eq!(locals.code(), &[0x0B]);
    }

    #[test]
    fn module_reader_walks_sections() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&crate::codec::MAGIC);
        bytes.extend_from_slice(&crate::codec::VERSION);
        bytes.extend_from_slice(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
        bytes.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
        let mut reader = ModuleReader::new(&bytes).unwrap();
        let first = reader.read_next().unwrap().unwrap();
        assert_eq!(first.kind(), SectionKind::Type);
        assert_eq!(first.content, &[0x01, 0x60, 0x00, 0x00]);
        let second = reader.read_next().unwrap().unwrap();
        assert_eq!(second.kind(), SectionKind::Function);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn module_reader_rejects_bad_header() {
        assert!(matches!(
            ModuleReader::new(b"\x7fELF\x01\x00\x00\x00"),
            Err(Error::BadMagic(_))
        ));
    }
}
