//! Stack-pointer underflow instrumentation.
//!
//! In the usual push-down convention the linear-memory stack grows toward
//! zero, so the stack pointer going negative is the observable symptom of an
//! overflow. This pass guards every write to the stack-pointer global
//! (global 0): the value about to be stored is parked in a synthesized
//! local, compared against zero, and handed to the
//! `__stack_sanitizer.report_stack_overflow` import when it has gone
//! negative, before the `global.set` is committed.
//!
//! The report import is injected at the end of the import list when the
//! module does not already link it, taking the function index right after
//! the original imports. Every call operand and element-segment entry
//! referencing a defined function then shifts by exactly one; a module that
//! already links the sanitizer is instrumented with no renumbering at all.

use crate::codec::cursor::ByteCursor;
use crate::codec::readers::{
    CodeSectionReader, ElementSectionReader, FunctionBody, FunctionSectionReader,
    ImportSectionReader, ModuleReader, TypeSectionReader, VectorReader,
};
use crate::codec::sink::{ByteSink, Encode};
use crate::codec::types::{
    FuncSignature, Import, ImportDescriptor, SectionKind, ValueType,
};
use crate::codec::{OP_CALL, OP_GLOBAL_SET};
use crate::instr::{BlockType, Instr};

use super::{Pass, PassError};

pub const SANITIZER_MODULE: &str = "__stack_sanitizer";
pub const REPORT_FIELD: &str = "report_stack_overflow";

const STACK_POINTER_GLOBAL: u32 = 0;

/// Minimal hand-assembled object file declaring the sanitizer import plus a
/// dummy caller that keeps it alive through unused-symbol elimination. Built
/// from:
///
/// ```wat
/// (module
///   (type (;0;) (func))
///   (import "__stack_sanitizer" "report_stack_overflow" (func (;0;) (type 0)))
///   (func (;1;) (type 0)
///     i32.const 0
///     call 0
///     return))
/// ```
///
/// with a hand-written "linking" custom section, so it can be fed to the
/// linker ahead of instrumentation.
pub const SUPPORT_OBJECT: &[u8] = &[
    // magic
    0x00, 0x61, 0x73, 0x6D,
    // version
    0x01, 0x00, 0x00, 0x00,
    // type section
    0x01, 0x04, 0x01, 0x60, 0x00, 0x00,
    // import section
    0x02, 0x2B, 0x01, 0x11, 0x5F, 0x5F, 0x73, 0x74, 0x61, 0x63, 0x6B, 0x5F, 0x73, 0x61, 0x6E, 0x69,
    0x74, 0x69, 0x7A, 0x65, 0x72, 0x15, 0x72, 0x65, 0x70, 0x6F, 0x72, 0x74, 0x5F, 0x73, 0x74, 0x61,
    0x63, 0x6B, 0x5F, 0x6F, 0x76, 0x65, 0x72, 0x66, 0x6C, 0x6F, 0x77, 0x00, 0x00,
    // function section
    0x03, 0x02, 0x01, 0x00,
    // code section
    0x0A, 0x09, 0x01, 0x07, 0x00, 0x41, 0x00, 0x10, 0x00, 0x0F, 0x0B,
    // custom section "linking": symbol table for the import and the dummy
    0x00, 0x37, 0x07, 0x6C, 0x69, 0x6E, 0x6B, 0x69, 0x6E, 0x67, 0x02,
    0x08, 0x2C, 0x01, 0x00, 0x50, 0x00,
    0x27, 0x5F, 0x5F, 0x73, 0x74, 0x61, 0x63, 0x6B, 0x5F, 0x73, 0x61, 0x6E, 0x69, 0x74,
    0x69, 0x7A, 0x65, 0x72,
    0x5F, 0x72, 0x65, 0x70, 0x6F, 0x72, 0x74, 0x5F, 0x73, 0x74, 0x61, 0x63, 0x6B, 0x5F, 0x6F, 0x76,
    0x65, 0x72, 0x66, 0x6C, 0x6F, 0x77,
];

fn report_signature() -> FuncSignature {
    FuncSignature::new(vec![ValueType::I32], vec![ValueType::I32])
}

fn report_import(signature_index: u32) -> Import<'static> {
    Import {
        module: SANITIZER_MODULE,
        field: REPORT_FIELD,
        descriptor: ImportDescriptor::Function(signature_index),
    }
}

/// Everything the rewrite needs to know up front, gathered by a read-only
/// scan before any output is produced. Section order in the binary format
/// puts Type before Import, but whether a signature must be appended is only
/// known after reading the imports, hence the separate scan.
struct Plan {
    /// Whether the sanitizer import must be added.
    inject: bool,
    /// Final function index of the report import.
    report_func_index: u32,
    /// Type index the injected import refers to.
    report_sig_index: u32,
    /// The module carries no Type section, so one must be synthesized.
    need_type_section: bool,
    /// Function-import count of the unmodified module.
    import_func_count: u32,
    /// Index shift applied to defined functions: 1 when injecting, else 0.
    shift: u32,
    /// Parameter count per defined function, in Code section order.
    func_param_counts: Vec<u32>,
}

impl Plan {
    fn build(module: &[u8]) -> Result<Plan, PassError> {
        let mut reader = ModuleReader::new(module)?;
        let mut signatures: Vec<FuncSignature> = Vec::new();
        let mut had_type_section = false;
        let mut sig_indices = Vec::new();
        let mut import_func_count: u32 = 0;
        let mut existing_report: Option<u32> = None;

        while let Some(section) = reader.read_next()? {
            match section.kind() {
                SectionKind::Type => {
                    signatures = TypeSectionReader::new(section.content)?.collect_all()?;
                    had_type_section = true;
                }
                SectionKind::Import => {
                    for entry in ImportSectionReader::new(section.content)?.entries() {
                        let import = entry?;
                        if let ImportDescriptor::Function(_) = import.descriptor {
                            if existing_report.is_none()
                                && import.module == SANITIZER_MODULE
                                && import.field == REPORT_FIELD
                            {
                                existing_report = Some(import_func_count);
                            }
                            import_func_count += 1;
                        }
                    }
                }
                SectionKind::Function => {
                    sig_indices = FunctionSectionReader::new(section.content)?.collect_all()?;
                }
                _ => {}
            }
        }

        if !had_type_section && !sig_indices.is_empty() {
            return Err(PassError::SectionOutOfOrder("type"));
        }
        let mut func_param_counts = Vec::with_capacity(sig_indices.len());
        for index in &sig_indices {
            let signature = signatures
                .get(index.0 as usize)
                .ok_or(PassError::BadSignatureIndex(index.0))?;
            func_param_counts.push(signature.params.len() as u32);
        }

        let inject = existing_report.is_none();
        Ok(Plan {
            inject,
            report_func_index: existing_report.unwrap_or(import_func_count),
            report_sig_index: signatures.len() as u32,
            need_type_section: inject && !had_type_section,
            import_func_count,
            shift: if inject { 1 } else { 0 },
            func_param_counts,
        })
    }
}

pub struct StackOverflowGuard {
    _private: (),
}

impl StackOverflowGuard {
    pub fn new() -> StackOverflowGuard {
        StackOverflowGuard { _private: () }
    }
}

impl Default for StackOverflowGuard {
    fn default() -> StackOverflowGuard {
        StackOverflowGuard::new()
    }
}

impl Pass for StackOverflowGuard {
    fn run(&mut self, input: &mut ByteCursor<'_>, output: &mut ByteSink) -> Result<(), PassError> {
        let plan = Plan::build(input.bytes())?;
        input.read_header()?;
        output.write_header();

        let mut type_emitted = !plan.need_type_section;
        let mut import_emitted = !plan.inject;

        while !input.is_at_end() {
            let info = input.read_section_info()?;

            // a synthesized Type or Import section slots in just before the
            // first section required to follow it
            if info.kind != SectionKind::Custom {
                if !type_emitted && info.kind.id() > SectionKind::Type.id() {
                    emit_type_section_with_report(output, None)?;
                    type_emitted = true;
                }
                if !import_emitted && info.kind.id() > SectionKind::Import.id() {
                    emit_import_section_with_report(output, None, &plan)?;
                    import_emitted = true;
                }
            }

            match info.kind {
                SectionKind::Type if plan.inject => {
                    let content = input.read(info.size)?;
                    emit_type_section_with_report(output, Some(content))?;
                    type_emitted = true;
                }
                SectionKind::Import if plan.inject => {
                    let content = input.read(info.size)?;
                    emit_import_section_with_report(output, Some(content), &plan)?;
                    import_emitted = true;
                }
                SectionKind::Element if plan.shift != 0 => {
                    let content = input.read(info.size)?;
                    rewrite_element_section(content, output, &plan)?;
                }
                SectionKind::Code => {
                    let content = input.read(info.size)?;
                    rewrite_code_section(content, output, &plan)?;
                }
                _ => {
                    output.write_bytes(&input.bytes()[info.range()]);
                    input.skip(info.size);
                }
            }
        }

        // a module with nothing after its imports still gets the declaration
        if !type_emitted {
            emit_type_section_with_report(output, None)?;
        }
        if !import_emitted {
            emit_import_section_with_report(output, None, &plan)?;
        }
        Ok(())
    }
}

/// Re-emits the Type section with the report signature appended, or a fresh
/// one-entry section when the module had none.
fn emit_type_section_with_report(
    output: &mut ByteSink,
    content: Option<&[u8]>,
) -> Result<(), PassError> {
    match content {
        Some(content) => {
            let reader = TypeSectionReader::new(content)?;
            let count = reader.count();
            output.write_section(SectionKind::Type, |body| {
                body.write_vu32(count + 1);
                for entry in reader.entries() {
                    entry?.encode(body);
                }
                report_signature().encode(body);
                Ok::<(), PassError>(())
            })
        }
        None => {
            output.write_vector_section(SectionKind::Type, std::iter::once(&report_signature()))
        }
    }
}

/// Re-emits the Import section with the report import appended at the end,
/// or a fresh one-entry section when the module had none.
fn emit_import_section_with_report(
    output: &mut ByteSink,
    content: Option<&[u8]>,
    plan: &Plan,
) -> Result<(), PassError> {
    let report = report_import(plan.report_sig_index);
    match content {
        Some(content) => {
            let reader = ImportSectionReader::new(content)?;
            let count = reader.count();
            output.write_section(SectionKind::Import, |body| {
                body.write_vu32(count + 1);
                for entry in reader.entries() {
                    entry?.encode(body);
                }
                report.encode(body);
                Ok::<(), PassError>(())
            })
        }
        None => output.write_vector_section(SectionKind::Import, std::iter::once(&report)),
    }
}

/// Shifts element-segment entries pointing at defined functions past the
/// injected import.
fn rewrite_element_section(
    content: &[u8],
    output: &mut ByteSink,
    plan: &Plan,
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
                if *func_index >= plan.import_func_count {
                    body.write_vu32(func_index + plan.shift);
                } else {
                    body.write_vu32(*func_index);
                }
            }
        }
        Ok::<(), PassError>(())
    })
}

fn rewrite_code_section(
    content: &[u8],
    output: &mut ByteSink,
    plan: &Plan,
) -> Result<(), PassError> {
    let reader = CodeSectionReader::new(content)?;
    let count = reader.count();
    if count as usize != plan.func_param_counts.len() {
        return Err(PassError::SectionOutOfOrder("function"));
    }
    output.write_section(SectionKind::Code, |body| {
        body.write_vu32(count);
        for (index, entry) in reader.entries().enumerate() {
            let func_body = entry?;
            let bytes = rewrite_body(&func_body, plan.func_param_counts[index], plan)?;
            body.write_vu32(bytes.len() as u32);
            body.write_bytes(&bytes);
        }
        Ok::<(), PassError>(())
    })
}

/// Rebuilds one function body: the locals block gains a trailing i32 local
/// to park the guarded value in, every `global.set` of the stack pointer is
/// wrapped in the underflow check, and call operands are renumbered past the
/// injected import. Untouched instruction spans are copied byte for byte.
fn rewrite_body(
    body: &FunctionBody<'_>,
    param_count: u32,
    plan: &Plan,
) -> Result<Vec<u8>, PassError> {
    let mut out = ByteSink::new();
    let mut locals = body.locals_reader()?;
    out.write_vu32(locals.count() + 1);
    let mut total_locals: u32 = 0;
    while let Some((count, ty)) = locals.read_next()? {
        out.write_vu32(count);
        out.write_byte(ty.id());
        total_locals += count;
    }
    out.write_vu32(1);
    out.write_byte(ValueType::I32.id());
    let guard_local = param_count + total_locals;

    let code = locals.code();
    let mut cursor = ByteCursor::new(code);
    let mut chunk_start = 0usize;
    while !cursor.is_at_end() {
        let inst_start = cursor.offset();
        match cursor.read_byte()? {
            OP_GLOBAL_SET => {
                let global_index = cursor.read_vu32()?;
                if global_index != STACK_POINTER_GLOBAL {
                    continue;
                }
                out.write_bytes(&code[chunk_start..inst_start]);
                for instr in guard_sequence(guard_local, plan.report_func_index) {
                    instr.encode(&mut out);
                }
                chunk_start = cursor.offset();
            }
            OP_CALL => {
                let operand_start = cursor.offset();
                let callee = cursor.read_vu32()?;
                if plan.shift == 0 || callee < plan.import_func_count {
                    continue;
                }
                out.write_bytes(&code[chunk_start..inst_start]);
                let operand_width = cursor.offset() - operand_start;
                out.write_byte(OP_CALL);
                out.write_vu32_padded(callee + plan.shift, operand_width);
                chunk_start = cursor.offset();
            }
            other => cursor.consume_inst(other)?,
        }
    }
    out.write_bytes(&code[chunk_start..]);
    Ok(out.into_bytes())
}

/// The check inserted at each stack-pointer write. The incoming value is
/// parked in the guard local, reported when negative, then stored for real.
fn guard_sequence(guard_local: u32, report_func_index: u32) -> [Instr; 11] {
    [
        Instr::LocalSet(guard_local),
        Instr::LocalGet(guard_local),
        Instr::I32Const(0),
        Instr::I32LtS,
        Instr::If(BlockType::Empty),
        Instr::LocalGet(guard_local),
        Instr::Call(report_func_index),
        Instr::Drop,
        Instr::End,
        Instr::LocalGet(guard_local),
        Instr::GlobalSet(STACK_POINTER_GLOBAL),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_object_declares_the_sanitizer_import() {
        let mut reader = ModuleReader::new(SUPPORT_OBJECT).unwrap();
        let mut found = false;
        while let Some(section) = reader.read_next().unwrap() {
            if section.kind() != SectionKind::Import {
                continue;
            }
            let imports = ImportSectionReader::new(section.content)
                .unwrap()
                .collect_all()
                .unwrap();
            assert_eq!(imports.len(), 1);
            assert_eq!(imports[0].module, SANITIZER_MODULE);
            assert_eq!(imports[0].field, REPORT_FIELD);
            assert_eq!(imports[0].descriptor, ImportDescriptor::Function(0));
            found = true;
        }
        assert!(found);
    }

    #[test]
    fn guard_sequence_serializes_as_expected() {
        let mut sink = ByteSink::new();
        for instr in guard_sequence(2, 5) {
            instr.encode(&mut sink);
        }
        assert_eq!(
            sink.into_bytes(),
            vec![
                0x21, 0x02, // local.set 2
                0x20, 0x02, // local.get 2
                0x41, 0x00, // i32.const 0
                0x48, // i32.lt_s
                0x04, 0x40, // if (empty)
                0x20, 0x02, // local.get 2
                0x10, 0x05, // call 5
                0x1A, // drop
                0x0B, // end
                0x20, 0x02, // local.get 2
                0x24, 0x00, // global.set 0
            ]
        );
    }
}
