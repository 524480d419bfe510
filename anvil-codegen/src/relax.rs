//! Branch relaxation and block address computation.
//!
//! Before the stream can be emitted, every jump needs a concrete
//! displacement. Displacements depend on the addresses of the blocks between
//! a jump and its target, and those addresses depend on which encoding form
//! every *other* jump picked: the classic branch displacement problem.
//!
//! Relaxation resolves the mutual dependency iteratively. Each sweep walks
//! the layout in order, assigns running addresses, recomputes every
//! displacement, and promotes any short jump whose displacement falls
//! outside the 8-bit range. The loop stops at the first sweep that changes
//! nothing. Promotions only ever grow sizes and never revert, so the
//! iteration is bounded by the number of jumps.

use log::debug;

use crate::binemit::CodeOffset;
use crate::block::{BlockData, LabelRef, Layout};
use crate::entity::{Block, EntityRef};
use crate::error::{CodegenError, CodegenResult};
use crate::strmap::StringMap;

/// Replace every symbolic jump target with the id of the labeled block.
///
/// This is the only place where a label reference can fail; afterwards the
/// layout is self-contained.
pub(crate) fn bind_targets(layout: &mut Layout, labels: &StringMap<Block>) -> CodegenResult<()> {
    for i in 0..layout.len() {
        let block = Block::new(i);
        let line = layout.node(block).line;
        if let BlockData::Jump { target, .. } = &mut layout.node_mut(block).data {
            if let LabelRef::Name(name) = target {
                match labels.get(name) {
                    Some(dest) => *target = LabelRef::Resolved(*dest),
                    None => {
                        return Err(CodegenError::UndefinedLabel {
                            name: String::from_utf8_lossy(name).into_owned(),
                            line,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Relax branches and compute the final block addresses.
///
/// Requires `bind_targets` to have succeeded.
pub(crate) fn relax_branches(layout: &mut Layout) {
    let mut go_again = true;
    while go_again {
        go_again = false;
        let mut offset: CodeOffset = 0;

        for i in 0..layout.len() {
            let block = Block::new(i);

            // Record the address and make sure we iterate until all of them
            // are stable.
            if layout.node(block).address != offset {
                layout.node_mut(block).address = offset;
                go_again = true;
            }

            // Copy the jump fields out so the displacement can be computed
            // against the target's address.
            let jump = match &layout.node(block).data {
                BlockData::Jump {
                    kind,
                    target: LabelRef::Resolved(dest),
                    long_mode,
                    ..
                } => Some((*kind, *dest, *long_mode)),
                BlockData::Jump { .. } => panic!("relaxing unresolved {block}"),
                BlockData::Code { .. } => None,
            };

            let Some((mut kind, dest, long_mode)) = jump else {
                offset += layout.node(block).size();
                continue;
            };

            let dest_addr = layout.node(dest).address;
            let mut size = kind.size(long_mode);
            let mut disp = i64::from(dest_addr) - i64::from(offset) - i64::from(size);
            // Both bounds matter: a backward jump can underflow the 8-bit
            // field just as a forward one can overflow it.
            if kind.is_short() && !(-128..=127).contains(&disp) {
                kind = kind.promote();
                size = kind.size(long_mode);
                disp = i64::from(dest_addr) - i64::from(offset) - i64::from(size);
                debug!(
                    "relaxing {block} at {offset:#x}: {dest} at {dest_addr:#x} is out of short range"
                );
                go_again = true;
            }

            if let BlockData::Jump {
                kind: k, disp: d, ..
            } = &mut layout.node_mut(block).data
            {
                *k = kind;
                *d = disp as i32;
            }
            offset += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::JumpKind;
    use crate::encode::Assembler;

    fn pad(asm: &mut Assembler, bytes: u32, line: u32) {
        assert_eq!(bytes % 2, 0);
        for _ in 0..bytes / 2 {
            asm.data16(0, line);
        }
    }

    fn addresses(asm: &Assembler) -> Vec<u32> {
        asm.layout().blocks().map(|(_, node)| node.address).collect()
    }

    #[test]
    fn backward_short_jump() {
        let mut asm = Assembler::new();
        asm.define_label(b"_start", 1).unwrap();
        asm.jump(JumpKind::ShortJmp, b"_start", true, 2);
        asm.finish().unwrap();
        assert_eq!(asm.emit_code(), [0xEB, 0xFE]);
        assert_eq!(asm.entry_address(), 0);
    }

    #[test]
    fn forward_short_jump() {
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJmp, b"fwd", true, 1);
        pad(&mut asm, 4, 2);
        asm.define_label(b"fwd", 3).unwrap();
        pad(&mut asm, 4, 4);
        asm.finish().unwrap();
        assert_eq!(
            asm.emit_code(),
            [0xEB, 0x04, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn short_boundaries() {
        let eax = crate::reg::lookup(b"eax").unwrap();

        // A forward displacement of exactly 127 still fits.
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJmp, b"l", true, 1);
        pad(&mut asm, 126, 2);
        asm.dec(eax, 2).unwrap();
        asm.define_label(b"l", 3).unwrap();
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(&code[..2], [0xEB, 0x7F]);

        // A backward displacement of exactly -128 still fits.
        let mut asm = Assembler::new();
        asm.define_label(b"l", 1).unwrap();
        pad(&mut asm, 126, 2);
        asm.jump(JumpKind::ShortJmp, b"l", true, 3);
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(&code[126..], [0xEB, 0x80]);
    }

    #[test]
    fn forward_promotion() {
        let mut asm = Assembler::new();
        asm.define_label(b"_start", 1).unwrap();
        asm.jump(JumpKind::ShortJmp, b"l", true, 2);
        pad(&mut asm, 200, 3);
        asm.define_label(b"l", 4).unwrap();
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(code.len(), 205);
        assert_eq!(&code[..5], [0xE9, 0xC8, 0x00, 0x00, 0x00]);
        assert!(code[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn backward_promotion() {
        // A short displacement of -129 underflows the 8-bit field; checking
        // only the positive bound would miss this.
        let eax = crate::reg::lookup(b"eax").unwrap();
        let mut asm = Assembler::new();
        asm.define_label(b"l", 1).unwrap();
        pad(&mut asm, 126, 2);
        asm.dec(eax, 2).unwrap();
        asm.jump(JumpKind::ShortJmp, b"l", true, 3);
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(code.len(), 132);
        // Promoted: disp = 0 - 127 - 5 = -132.
        assert_eq!(&code[127..], [0xE9, 0x7C, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn promotion_cascade() {
        // Promoting the second jump pushes the first one out of range too.
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJmp, b"l", true, 1);
        pad(&mut asm, 124, 2);
        asm.jump(JumpKind::ShortJmp, b"m", true, 3);
        asm.define_label(b"l", 4).unwrap();
        pad(&mut asm, 130, 5);
        asm.define_label(b"m", 6).unwrap();
        asm.finish().unwrap();

        let code = asm.emit_code();
        // Both jumps end up near: 5 + 124 + 5 + 130 bytes.
        assert_eq!(code.len(), 264);
        assert_eq!(&code[..5], [0xE9, 0x81, 0x00, 0x00, 0x00]);
        assert_eq!(&code[129..134], [0xE9, 0x82, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn short_mode_displacement_width() {
        // In [bits 32] mode a near jmp is E9 + disp16, 3 bytes.
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJmp, b"l", false, 1);
        pad(&mut asm, 200, 2);
        asm.define_label(b"l", 3).unwrap();
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(code.len(), 203);
        assert_eq!(&code[..3], [0xE9, 0xC8, 0x00]);

        // Near jnz in 32-bit mode: 0F 85 + disp16, 4 bytes.
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJnz, b"l", false, 1);
        pad(&mut asm, 200, 2);
        asm.define_label(b"l", 3).unwrap();
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(code.len(), 204);
        assert_eq!(&code[..4], [0x0F, 0x85, 0xC8, 0x00]);
    }

    #[test]
    fn near_jnz_long_mode() {
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJnz, b"l", true, 1);
        pad(&mut asm, 200, 2);
        asm.define_label(b"l", 3).unwrap();
        asm.finish().unwrap();
        let code = asm.emit_code();
        assert_eq!(code.len(), 206);
        assert_eq!(&code[..6], [0x0F, 0x85, 0xC8, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn addresses_are_consistent() {
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJmp, b"a", true, 1);
        pad(&mut asm, 126, 2);
        asm.define_label(b"a", 3).unwrap();
        asm.jump(JumpKind::ShortJnz, b"b", true, 4);
        pad(&mut asm, 200, 5);
        asm.define_label(b"b", 6).unwrap();
        asm.finish().unwrap();

        let mut expected = 0;
        for (i, addr) in addresses(&asm).iter().enumerate() {
            assert_eq!(*addr, expected, "block{i}");
            let node = asm
                .layout()
                .blocks()
                .nth(i)
                .map(|(_, node)| node)
                .unwrap();
            expected += node.size();
        }
        assert_eq!(asm.code_size(), expected);
    }

    #[test]
    fn unknown_label() {
        let mut asm = Assembler::new();
        asm.jump(JumpKind::ShortJmp, b"nowhere", true, 7);
        assert_eq!(
            asm.finish(),
            Err(CodegenError::UndefinedLabel {
                name: "nowhere".to_string(),
                line: 7,
            })
        );
    }
}
