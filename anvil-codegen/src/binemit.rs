//! Binary emission of the stabilized block layout.
//!
//! Emission is the last, trivial pass: relaxation has already fixed every
//! block address and jump displacement, so this module only serializes what
//! the layout says, in layout order.

use crate::block::{BlockData, JumpKind, LabelRef, Layout};

/// Offset in bytes from the beginning of the emitted code.
///
/// The assembler can run on any host, so this is a fixed-width type rather
/// than `usize`.
pub type CodeOffset = u32;

/// Abstract interface for receiving the emitted code bytes.
///
/// Multi-byte values are always written little-endian, matching both the
/// target and the ELF container.
pub trait CodeSink {
    /// Get the current position.
    fn offset(&self) -> CodeOffset;

    /// Add 1 byte to the code section.
    fn put1(&mut self, _: u8);

    /// Add 2 bytes to the code section.
    fn put2(&mut self, _: u16);

    /// Add 4 bytes to the code section.
    fn put4(&mut self, _: u32);

    /// Add 8 bytes to the code section.
    fn put8(&mut self, _: u64);
}

/// Provide a convenient implementation for in-memory emission.
impl CodeSink for Vec<u8> {
    fn offset(&self) -> CodeOffset {
        self.len() as CodeOffset
    }

    fn put1(&mut self, v: u8) {
        self.push(v);
    }

    fn put2(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put4(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put8(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }
}

/// Serialize the layout into `sink`.
///
/// The layout must have been relaxed first; emitting an unresolved jump is a
/// programming error.
pub fn emit(layout: &Layout, sink: &mut impl CodeSink) {
    for (block, node) in layout.blocks() {
        debug_assert_eq!(
            node.address,
            sink.offset(),
            "{block} emitted away from its laid-out address"
        );
        match &node.data {
            BlockData::Code { bytes } => {
                for &byte in bytes.iter() {
                    sink.put1(byte);
                }
            }
            BlockData::Jump {
                kind,
                target,
                disp,
                long_mode,
            } => {
                debug_assert!(
                    matches!(target, LabelRef::Resolved(_)),
                    "{block} still has a symbolic target"
                );
                match kind {
                    JumpKind::ShortJmp => {
                        sink.put1(0xEB);
                        sink.put1(*disp as i8 as u8);
                    }
                    JumpKind::ShortJnz => {
                        sink.put1(0x75);
                        sink.put1(*disp as i8 as u8);
                    }
                    JumpKind::NearJmp => {
                        sink.put1(0xE9);
                        put_disp(sink, *disp, *long_mode);
                    }
                    JumpKind::NearJnz => {
                        // Two opcode bytes in memory order; never a
                        // host-endian 16-bit store.
                        sink.put1(0x0F);
                        sink.put1(0x85);
                        put_disp(sink, *disp, *long_mode);
                    }
                }
            }
        }
    }
}

/// Write a near displacement: 32 bits in long mode, 16 bits otherwise.
fn put_disp(sink: &mut impl CodeSink, disp: i32, long_mode: bool) {
    if long_mode {
        sink.put4(disp as u32);
    } else {
        debug_assert!(
            i16::try_from(disp).is_ok(),
            "near displacement {disp:#x} overflows the 16-bit field"
        );
        sink.put2(disp as u16);
    }
}
