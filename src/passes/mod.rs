//! Module-to-module rewrite passes.
//!
//! Every pass consumes a complete module buffer and produces a complete
//! rewritten buffer, so passes compose into a pipeline where each stage's
//! output feeds the next. A pass never commits partial output: section
//! bodies are built in scratch sinks and only framed into the result once
//! they serialize end to end.

pub mod lower_i64;
pub mod stack_guard;
pub mod strip_custom;

pub use lower_i64::I64ImportLowering;
pub use stack_guard::{StackOverflowGuard, SUPPORT_OBJECT};
pub use strip_custom::CustomSectionStripper;

use crate::codec::cursor::ByteCursor;
use crate::codec::sink::ByteSink;
use crate::codec::Error;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError, PartialEq)]
pub enum PassError {
    #[error("{0}")]
    Format(#[from] Error),
    /// A section that depends on earlier section data arrived before it.
    #[error("section out of order: {0} section required first")]
    SectionOutOfOrder(&'static str),
    /// A section kind the pass has no rewrite rule for, where passing it
    /// through verbatim would desynchronize rewritten indices.
    #[error("cannot rewrite module with unexpected section id {0}")]
    UnexpectedSection(u8),
    /// A function import names a type index past the end of the Type
    /// section.
    #[error("signature index {0} out of range")]
    BadSignatureIndex(u32),
}

/// A single module rewrite. Implementations read from the cursor, which sits
/// at the start of the input module, and emit the rewritten module into the
/// sink.
pub trait Pass {
    fn run(&mut self, input: &mut ByteCursor<'_>, output: &mut ByteSink) -> Result<(), PassError>;
}

fn apply(pass: &mut dyn Pass, module: &[u8]) -> Result<Vec<u8>, PassError> {
    let mut cursor = ByteCursor::new(module);
    let mut sink = ByteSink::new();
    pass.run(&mut cursor, &mut sink)?;
    Ok(sink.into_bytes())
}

/// Rewrites i64-parameter function imports to i32-only signatures, adapting
/// internal callers through generated trampolines.
pub fn lower_i64_imports(module: &[u8]) -> Result<Vec<u8>, PassError> {
    apply(&mut I64ImportLowering::new(), module)
}

/// Drops every custom section from the module.
pub fn strip_custom_sections(module: &[u8]) -> Result<Vec<u8>, PassError> {
    apply(&mut CustomSectionStripper::new(), module)
}

/// Instruments every write to the stack-pointer global (global 0) with an
/// underflow check that reports through `__stack_sanitizer`.
pub fn sanitize_stack_overflow(module: &[u8]) -> Result<Vec<u8>, PassError> {
    apply(&mut StackOverflowGuard::new(), module)
}

/// Runs the passes in order, feeding each one's output to the next.
pub fn run_pipeline(
    module: &[u8],
    passes: &mut [&mut dyn Pass],
) -> Result<Vec<u8>, PassError> {
    let mut current = module.to_vec();
    for pass in passes.iter_mut() {
        current = apply(*pass, &current)?;
    }
    Ok(current)
}
