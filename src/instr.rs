//! Decoded instruction model.
//!
//! Only the instructions the rewrite passes synthesize or rewrite are
//! modeled; everything else moves through a transform as raw bytes. An
//! [`Instr`] serializes itself through the sink's [`Encode`] trait so
//! synthesized code shares the emission path with re-encoded structures.

use crate::codec::sink::{ByteSink, Encode};
use crate::codec::{
    BLOCK_TYPE_EMPTY, OP_CALL, OP_DROP, OP_END, OP_GLOBAL_SET, OP_I32_CONST, OP_I32_LT_S,
    OP_I32_WRAP_I64, OP_IF, OP_LOCAL_GET, OP_LOCAL_SET,
};

/// The structured type of a block instruction. The passes only ever open
/// blocks that leave the stack untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    LocalGet(u32),
    LocalSet(u32),
    GlobalSet(u32),
    I32Const(i32),
    I32LtS,
    I32WrapI64,
    If(BlockType),
    Call(u32),
    Drop,
    End,
}

impl Encode for Instr {
    fn encode(&self, sink: &mut ByteSink) {
        match *self {
            Instr::LocalGet(index) => {
                sink.write_byte(OP_LOCAL_GET);
                sink.write_vu32(index);
            }
            Instr::LocalSet(index) => {
                sink.write_byte(OP_LOCAL_SET);
                sink.write_vu32(index);
            }
            Instr::GlobalSet(index) => {
                sink.write_byte(OP_GLOBAL_SET);
                sink.write_vu32(index);
            }
            Instr::I32Const(value) => {
                sink.write_byte(OP_I32_CONST);
                sink.write_vs32(value);
            }
            Instr::I32LtS => sink.write_byte(OP_I32_LT_S),
            Instr::I32WrapI64 => sink.write_byte(OP_I32_WRAP_I64),
            Instr::If(BlockType::Empty) => {
                sink.write_byte(OP_IF);
                sink.write_byte(BLOCK_TYPE_EMPTY);
            }
            Instr::Call(index) => {
                sink.write_byte(OP_CALL);
                sink.write_vu32(index);
            }
            Instr::Drop => sink.write_byte(OP_DROP),
            Instr::End => sink.write_byte(OP_END),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(instrs: &[Instr]) -> Vec<u8> {
        let mut sink = ByteSink::new();
        for instr in instrs {
            instr.encode(&mut sink);
        }
        sink.into_bytes()
    }

    #[test]
    fn index_operands_are_varints() {
        assert_eq!(encode(&[Instr::LocalGet(0)]), vec![0x20, 0x00]);
        assert_eq!(encode(&[Instr::LocalSet(200)]), vec![0x21, 0xC8, 0x01]);
        assert_eq!(encode(&[Instr::Call(16)]), vec![0x10, 0x10]);
    }

    #[test]
    fn i32_const_is_signed() {
        assert_eq!(encode(&[Instr::I32Const(0)]), vec![0x41, 0x00]);
        assert_eq!(encode(&[Instr::I32Const(-1)]), vec![0x41, 0x7F]);
        assert_eq!(encode(&[Instr::I32Const(64)]), vec![0x41, 0xC0, 0x00]);
    }

    #[test]
    fn empty_if_block() {
        assert_eq!(
            encode(&[Instr::If(BlockType::Empty), Instr::End]),
            vec![0x04, 0x40, 0x0B]
        );
    }

    #[test]
    fn wrap_and_compare_are_single_bytes() {
        assert_eq!(
            encode(&[Instr::I32WrapI64, Instr::I32LtS, Instr::Drop]),
            vec![0xA7, 0x48, 0x1A]
        );
    }
}
