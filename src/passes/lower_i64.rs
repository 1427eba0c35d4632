//! Lowering of i64-parameter function imports.
//!
//! Hosts that cannot pass 64-bit integers across the import boundary need
//! every imported function signature to be i32-only. For each function
//! import with an i64 parameter this pass appends a lowered copy of its
//! signature to the Type section, re-points the import at it, and appends a
//! trampoline function carrying the original signature. Internal callers
//! are redirected to the trampoline, which wraps each i64 argument down to
//! i32 and forwards to the re-typed import.
//!
//! Index bookkeeping: imports keep their function indices, so only the
//! trampolines occupy new ones, placed after every original function. A
//! trampoline's index is `imported count + defined count + creation order`.

use std::collections::HashMap;

use crate::codec::cursor::ByteCursor;
use crate::codec::readers::{ElementSectionReader, TypeSectionReader, VectorReader};
use crate::codec::sink::{ByteSink, Encode};
use crate::codec::types::{FuncSignature, Import, ImportDescriptor, SectionInfo, SectionKind, ValueType};
use crate::codec::{MAGIC, OP_CALL, VERSION};
use crate::instr::Instr;

use super::{Pass, PassError};

/// One synthesized wrapper: presents `signature` (i64-bearing) to internal
/// callers and forwards to the lowered import at `import_func_index`.
struct Trampoline {
    signature: FuncSignature,
    signature_index: u32,
    import_func_index: u32,
}

impl Trampoline {
    /// Emits this trampoline's Code section entry: size prefix, empty
    /// locals declaration, then the forwarding body.
    fn encode_entry(&self, sink: &mut ByteSink) {
        let mut body = ByteSink::new();
        body.write_byte(0x00); // no locals
        for (index, param) in self.signature.params.iter().enumerate() {
            Instr::LocalGet(index as u32).encode(&mut body);
            if *param == ValueType::I64 {
                Instr::I32WrapI64.encode(&mut body);
            }
        }
        Instr::Call(self.import_func_index).encode(&mut body);
        Instr::End.encode(&mut body);

        let bytes = body.into_bytes();
        sink.write_vu32(bytes.len() as u32);
        sink.write_bytes(&bytes);
    }
}

/// Trampolines in creation order, addressable by the import function index
/// they wrap.
#[derive(Default)]
struct Trampolines {
    order_by_import_index: HashMap<u32, usize>,
    list: Vec<Trampoline>,
}

impl Trampolines {
    fn add(&mut self, import_func_index: u32, signature: FuncSignature, signature_index: u32) {
        self.order_by_import_index
            .insert(import_func_index, self.list.len());
        self.list.push(Trampoline {
            signature,
            signature_index,
            import_func_index,
        });
    }

    /// Looks up the trampoline wrapping the given function index, with its
    /// creation order. `None` when the index is not a lowered import.
    fn for_func_index(&self, func_index: u32) -> Option<(usize, &Trampoline)> {
        let order = *self.order_by_import_index.get(&func_index)?;
        Some((order, &self.list[order]))
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn iter(&self) -> std::slice::Iter<'_, Trampoline> {
        self.list.iter()
    }
}

pub struct I64ImportLowering {
    _private: (),
}

impl I64ImportLowering {
    pub fn new() -> I64ImportLowering {
        I64ImportLowering { _private: () }
    }
}

impl Default for I64ImportLowering {
    fn default() -> I64ImportLowering {
        I64ImportLowering::new()
    }
}

impl Pass for I64ImportLowering {
    fn run(&mut self, input: &mut ByteCursor<'_>, output: &mut ByteSink) -> Result<(), PassError> {
        input.read_header()?;
        output.write_bytes(&MAGIC);
        output.write_bytes(&VERSION);

        let mut trampolines = Trampolines::default();
        let mut signatures: Vec<FuncSignature> = Vec::new();
        let mut had_type_section = false;
        let mut imports: Option<Vec<Import<'_>>> = None;
        let mut import_func_count: u32 = 0;
        let mut leading_custom: Vec<SectionInfo> = Vec::new();

        // Phase 1: scan Type then Import, recording which imports to lower.
        while !input.is_at_end() {
            let info = input.read_section_info()?;
            match info.kind {
                SectionKind::Type => {
                    let content = input.read(info.size)?;
                    signatures = TypeSectionReader::new(content)?.collect_all()?;
                    had_type_section = true;
                }
                SectionKind::Import => {
                    imports = Some(scan_imports(
                        input,
                        &mut signatures,
                        &mut trampolines,
                        &mut import_func_count,
                    )?);
                    break;
                }
                SectionKind::Custom => {
                    leading_custom.push(info);
                    input.skip(info.size);
                }
                other => return Err(PassError::UnexpectedSection(other.id())),
            }
            debug_assert_eq!(input.offset(), info.end());
        }

        // Phase 2: re-emit Type (with appended lowered signatures) and the
        // replayed Import section, then any custom sections that preceded
        // them.
        if had_type_section {
            output.write_vector_section::<PassError, _>(SectionKind::Type, signatures.iter())?;
        }
        if let Some(imports) = &imports {
            output.write_vector_section::<PassError, _>(SectionKind::Import, imports.iter())?;
        }
        for info in &leading_custom {
            output.write_bytes(&input.bytes()[info.range()]);
        }

        // Phases 3-5: everything after the Import section is emitted in
        // input order; Function, Element and Code get rewritten, the rest is
        // copied through.
        let mut original_func_count: Option<u32> = None;
        while !input.is_at_end() {
            let info = input.read_section_info()?;
            match info.kind {
                SectionKind::Function => {
                    let defined = rewrite_function_section(input, output, &trampolines)?;
                    original_func_count = Some(import_func_count + defined);
                }
                SectionKind::Element => {
                    let func_count = original_func_count
                        .ok_or(PassError::SectionOutOfOrder("function"))?;
                    let content = input.read(info.size)?;
                    rewrite_element_section(content, output, &trampolines, func_count)?;
                }
                SectionKind::Code => {
                    let func_count = original_func_count
                        .ok_or(PassError::SectionOutOfOrder("function"))?;
                    rewrite_code_section(input, output, &trampolines, func_count)?;
                }
                SectionKind::Type | SectionKind::Import => {
                    return Err(PassError::UnexpectedSection(info.kind.id()));
                }
                _ => {
                    // FIXME: re-exports of lowered imports keep the original
                    // signature; the Export section passes through as is.
                    output.write_bytes(&input.bytes()[info.range()]);
                    input.skip(info.size);
                }
            }
            debug_assert_eq!(input.offset(), info.end());
        }
        Ok(())
    }
}

/// Walks the Import section entries, lowering each function import whose
/// signature carries an i64 parameter. Returns the entries to replay, with
/// lowered imports already re-pointed at their new signature index.
fn scan_imports<'a>(
    input: &mut ByteCursor<'a>,
    signatures: &mut Vec<FuncSignature>,
    trampolines: &mut Trampolines,
    import_func_count: &mut u32,
) -> Result<Vec<Import<'a>>, PassError> {
    let count = input.read_vu32()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut import = input.read_import()?;
        if let ImportDescriptor::Function(signature_index) = import.descriptor {
            let signature = signatures
                .get(signature_index as usize)
                .ok_or(PassError::BadSignatureIndex(signature_index))?
                .clone();
            if signature.has_i64_param() {
                let new_index = signatures.len() as u32;
                signatures.push(signature.lowered());
                import.descriptor = ImportDescriptor::Function(new_index);
                trampolines.add(*import_func_count, signature, signature_index);
            }
            *import_func_count += 1;
        }
        entries.push(import);
    }
    Ok(entries)
}

/// Re-emits the Function section with one appended declaration per
/// trampoline, each using its original (i64-bearing) signature index.
/// Returns the original defined-function count.
fn rewrite_function_section(
    input: &mut ByteCursor<'_>,
    output: &mut ByteSink,
    trampolines: &Trampolines,
) -> Result<u32, PassError> {
    let count = input.read_vu32()?;
    output.write_section(SectionKind::Function, |body| {
        body.write_vu32(count + trampolines.len() as u32);
        for _ in 0..count {
            let index = input.read_vu32()?;
            body.write_vu32(index);
        }
        for trampoline in trampolines.iter() {
            body.write_vu32(trampoline.signature_index);
        }
        Ok::<(), PassError>(())
    })?;
    Ok(count)
}

/// Redirects element-segment function indices that point at a lowered
/// import to the matching trampoline.
fn rewrite_element_section(
    content: &[u8],
    output: &mut ByteSink,
    trampolines: &Trampolines,
    original_func_count: u32,
) -> Result<(), PassError> {
    let reader = ElementSectionReader::new(content)?;
    let count = reader.count();
    output.write_section(SectionKind::Element, |body| {
        body.write_vu32(count);
        for entry in reader.entries() {
            let element = entry?;
            body.write_vu32(element.flags);
            body.write_bytes(element.init_expr);
            body.write_vu32(element.func_indices.len() as u32);
            for func_index in &element.func_indices {
                match trampolines.for_func_index(*func_index) {
                    Some((order, _)) => {
                        body.write_vu32(original_func_count + order as u32);
                    }
                    None => body.write_vu32(*func_index),
                }
            }
        }
        Ok::<(), PassError>(())
    })
}

/// Rewrites call sites targeting lowered imports to call the trampoline
/// instead, then appends the trampoline bodies. Untouched instruction spans
/// are copied through byte for byte; only matching calls are re-serialized,
/// padded back to their original operand width.
fn rewrite_code_section(
    input: &mut ByteCursor<'_>,
    output: &mut ByteSink,
    trampolines: &Trampolines,
    original_func_count: u32,
) -> Result<(), PassError> {
    let count = input.read_vu32()?;
    output.write_section(SectionKind::Code, |body| {
        body.write_vu32(count + trampolines.len() as u32);
        for _ in 0..count {
            let old_size = input.read_vu32()? as usize;
            let body_end = input.offset() + old_size;

            let mut buffer = ByteSink::new();
            buffer.write_bytes(input.consume_locals()?);

            let mut chunk_start = input.offset();
            while input.offset() < body_end {
                let inst_start = input.offset();
                let callee = match input.read_call()? {
                    Some(callee) => callee,
                    None => continue,
                };
                let order = match trampolines.for_func_index(callee) {
                    Some((order, _)) => order,
                    None => continue,
                };
                buffer.write_bytes(&input.bytes()[chunk_start..inst_start]);
                let operand_width = input.offset() - inst_start - 1;
                buffer.write_byte(OP_CALL);
                buffer.write_vu32_padded(original_func_count + order as u32, operand_width);
                chunk_start = input.offset();
            }
            buffer.write_bytes(&input.bytes()[chunk_start..input.offset()]);

            let bytes = buffer.into_bytes();
            body.write_vu32(bytes.len() as u32);
            body.write_bytes(&bytes);
        }
        for trampoline in trampolines.iter() {
            trampoline.encode_entry(body);
        }
        Ok::<(), PassError>(())
    })
}
