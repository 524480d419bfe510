//! Per-mnemonic instruction encoding.
//!
//! The [`Assembler`] appends one statement at a time to the block layout.
//! Fixed-size encodings go straight into the trailing code block's byte
//! buffer; control flow and label definitions go through the layout so that
//! every jump sits in its own relaxable block.
//!
//! Operand widths come from the register table for register destinations and
//! from the (optional) width keyword for memory destinations. Only the
//! low eight register encodings are accepted where an encoding is folded
//! into the opcode byte or a ModR/M field; the REX machinery needed for the
//! extended set is outside the implemented subset.

use log::trace;

use crate::binemit::{self, CodeOffset, CodeSink};
use crate::block::{JumpKind, Layout};
use crate::entity::Block;
use crate::error::{CodegenError, CodegenResult};
use crate::reg::{Reg, RegClass};
use crate::strmap::StringMap;

/// The two-operand arithmetic/logical family.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AluOp {
    /// `add`
    Add,
    /// `or`
    Or,
    /// `and`
    And,
    /// `xor`
    Xor,
}

impl AluOp {
    /// Base opcode of the family; the low three bits select the operand
    /// form.
    fn base(self) -> u8 {
        match self {
            Self::Add => 0x00,
            Self::Or => 0x08,
            Self::And => 0x20,
            Self::Xor => 0x30,
        }
    }

    /// The /digit selecting this operation in the 0x80/0x81 immediate
    /// group: add=0, or=1, and=4, xor=6.
    fn subop(self) -> u8 {
        self.base() >> 3
    }

    /// Source-level mnemonic, for diagnostics.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Or => "or",
            Self::And => "and",
            Self::Xor => "xor",
        }
    }
}

/// A parsed instruction operand, after symbol resolution.
///
/// The reader distinguishes a named constant from a bare literal because a
/// few encodings (memory stores) accept only the former.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// A bare register.
    Reg(Reg),
    /// A memory reference `[reg]` with its access width in bits.
    Mem {
        /// The address register.
        base: Reg,
        /// Access width in bits; defaults to 32 when no keyword forces it.
        bits: u16,
    },
    /// The value of a named constant.
    Const(i64),
    /// A numeric literal.
    Imm(i64),
}

/// Encode the ModR/M byte.
#[inline]
fn encode_modrm(m0d: u8, reg_g: u8, rm_e: u8) -> u8 {
    debug_assert!(m0d < 4);
    debug_assert!(reg_g < 8);
    debug_assert!(rm_e < 8);
    ((m0d & 3) << 6) | ((reg_g & 7) << 3) | (rm_e & 7)
}

fn class_name(class: RegClass) -> &'static str {
    match class {
        RegClass::Gpr => "general purpose",
        RegClass::Segment => "segment",
        RegClass::Control => "control",
        RegClass::Debug => "debug",
        RegClass::Fp => "floating point",
        RegClass::Mmx => "mmx",
        RegClass::Xmm => "xmm",
        RegClass::Ymm => "ymm",
    }
}

/// A register whose encoding lands in an opcode byte or a ModR/M field must
/// be a general purpose register from the low eight.
fn require_low_gp(reg: Reg, what: &str) -> CodegenResult<()> {
    if reg.class != RegClass::Gpr {
        return Err(CodegenError::Unsupported(format!(
            "{} registers as {what} are not implemented",
            class_name(reg.class)
        )));
    }
    if reg.enc > 7 {
        return Err(CodegenError::Unsupported(format!(
            "extended registers as {what} are not implemented"
        )));
    }
    Ok(())
}

/// Control/debug registers only need the ModR/M range check, not the class
/// check of `require_low_gp`.
fn require_low_enc(reg: Reg, what: &str) -> CodegenResult<()> {
    if reg.enc > 7 {
        return Err(CodegenError::Unsupported(format!(
            "extended registers as {what} are not implemented"
        )));
    }
    Ok(())
}

fn require_width(bits: u16) -> CodegenResult<()> {
    match bits {
        8 | 16 | 32 => Ok(()),
        _ => Err(CodegenError::Unsupported(format!(
            "{bits}-bit operands are not implemented"
        ))),
    }
}

/// Builds the block layout one statement at a time and owns the label map.
pub struct Assembler {
    layout: Layout,
    labels: StringMap<Block>,
}

impl Assembler {
    /// Create an assembler holding an empty code stream.
    pub fn new() -> Self {
        Self {
            layout: Layout::new(),
            labels: StringMap::new(),
        }
    }

    /// Bind `name` to a fresh empty block at the current end of the stream.
    pub fn define_label(&mut self, name: &[u8], line: u32) -> CodegenResult<()> {
        if self.labels.get(name).is_some() {
            return Err(CodegenError::Redefined(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        let block = self.layout.append_code_block(line);
        trace!("line {line}: label {} -> {block}", String::from_utf8_lossy(name));
        self.labels.insert(Box::from(name), block);
        Ok(())
    }

    /// Append a `jmp`/`jnz` to `target` in its initial short form.
    pub fn jump(&mut self, kind: JumpKind, target: &[u8], long_mode: bool, line: u32) {
        debug_assert!(kind.is_short());
        let block = self
            .layout
            .append_jump(kind, Box::from(target), long_mode, line);
        trace!(
            "line {line}: {kind:?} to {} as {block}",
            String::from_utf8_lossy(target)
        );
    }

    /// `dw`: two bytes of data, little-endian.
    pub fn data16(&mut self, value: i64, line: u32) {
        self.layout
            .code_buf(line)
            .extend_from_slice(&(value as u16).to_le_bytes());
    }

    /// `dd`: four bytes of data, little-endian.
    pub fn data32(&mut self, value: i64, line: u32) {
        self.layout
            .code_buf(line)
            .extend_from_slice(&(value as u32).to_le_bytes());
    }

    /// `mov dest, src`.
    pub fn mov(&mut self, dest: &Operand, src: &Operand, line: u32) -> CodegenResult<()> {
        match (dest, src) {
            (Operand::Reg(d), Operand::Imm(v) | Operand::Const(v)) => {
                self.mov_reg_imm(*d, *v, line)
            }
            (Operand::Reg(d), Operand::Reg(s)) => self.mov_reg_reg(*d, *s, line),
            (Operand::Mem { base, .. }, Operand::Reg(s)) => self.mov_mem_reg(*base, *s, line),
            (Operand::Mem { base, bits }, Operand::Const(v)) => {
                self.mov_mem_imm(*base, *bits, *v, line)
            }
            (Operand::Mem { .. }, Operand::Imm(_)) => Err(CodegenError::Unsupported(
                "storing a literal to memory is not implemented".to_string(),
            )),
            (_, Operand::Mem { .. }) => Err(CodegenError::Unsupported(
                "memory sources for \"mov\" are not implemented".to_string(),
            )),
            (Operand::Const(_) | Operand::Imm(_), _) => Err(CodegenError::Unsupported(
                "immediates as a \"mov\" destination are not implemented".to_string(),
            )),
        }
    }

    /// `B0+r imm8` / `B8+r imm16/32`.
    fn mov_reg_imm(&mut self, dest: Reg, value: i64, line: u32) -> CodegenResult<()> {
        require_low_gp(dest, "a \"mov\" destination")?;
        require_width(dest.bits)?;
        let buf = self.layout.code_buf(line);
        match dest.bits {
            8 => {
                buf.push(0xB0 + dest.enc);
                buf.push(value as u8);
            }
            16 => {
                buf.push(0xB8 + dest.enc);
                buf.extend_from_slice(&(value as u16).to_le_bytes());
            }
            _ => {
                buf.push(0xB8 + dest.enc);
                buf.extend_from_slice(&(value as u32).to_le_bytes());
            }
        }
        Ok(())
    }

    fn mov_reg_reg(&mut self, dest: Reg, src: Reg, line: u32) -> CodegenResult<()> {
        match (dest.class, src.class) {
            // `mov r, cr` is `0F 20 /r` with the control register in the reg
            // field; `mov cr, r` is `0F 22 /r`, same field assignment.
            (RegClass::Gpr, RegClass::Control) => {
                require_low_gp(dest, "a \"mov\" destination")?;
                require_low_enc(src, "a \"mov\" source")?;
                let buf = self.layout.code_buf(line);
                buf.push(0x0F);
                buf.push(0x20);
                buf.push(encode_modrm(0b11, src.enc, dest.enc));
                Ok(())
            }
            (RegClass::Control, RegClass::Gpr) => {
                require_low_enc(dest, "a \"mov\" destination")?;
                require_low_gp(src, "a \"mov\" source")?;
                let buf = self.layout.code_buf(line);
                buf.push(0x0F);
                buf.push(0x22);
                buf.push(encode_modrm(0b11, dest.enc, src.enc));
                Ok(())
            }
            (RegClass::Gpr, RegClass::Gpr) => {
                require_low_gp(dest, "a \"mov\" destination")?;
                require_low_gp(src, "a \"mov\" source")?;
                require_width(dest.bits)?;
                let opcode = if dest.bits == 8 { 0x88 } else { 0x89 };
                let buf = self.layout.code_buf(line);
                buf.push(opcode);
                buf.push(encode_modrm(0b11, src.enc, dest.enc));
                Ok(())
            }
            _ => Err(CodegenError::Unsupported(
                "this register combination for \"mov\" is not implemented".to_string(),
            )),
        }
    }

    /// `88/89 /r` with mod 00: the reg field carries the source and the r/m
    /// field the address register.
    fn mov_mem_reg(&mut self, base: Reg, src: Reg, line: u32) -> CodegenResult<()> {
        require_low_gp(base, "a memory base")?;
        require_low_gp(src, "a \"mov\" source")?;
        require_width(src.bits)?;
        let opcode = if src.bits == 8 { 0x88 } else { 0x89 };
        let buf = self.layout.code_buf(line);
        buf.push(opcode);
        buf.push(encode_modrm(0b00, src.enc, base.enc));
        Ok(())
    }

    /// `C6/C7 /0` with mod 00 and an immediate of the declared width.
    fn mov_mem_imm(&mut self, base: Reg, bits: u16, value: i64, line: u32) -> CodegenResult<()> {
        require_low_gp(base, "a memory base")?;
        require_width(bits)?;
        let buf = self.layout.code_buf(line);
        match bits {
            8 => {
                buf.push(0xC6);
                buf.push(encode_modrm(0b00, 0, base.enc));
                buf.push(value as u8);
            }
            16 => {
                buf.push(0xC7);
                buf.push(encode_modrm(0b00, 0, base.enc));
                buf.extend_from_slice(&(value as u16).to_le_bytes());
            }
            _ => {
                buf.push(0xC7);
                buf.push(encode_modrm(0b00, 0, base.enc));
                buf.extend_from_slice(&(value as u32).to_le_bytes());
            }
        }
        Ok(())
    }

    /// `add`/`or`/`and`/`xor dest, src`.
    pub fn alu(
        &mut self,
        op: AluOp,
        dest: &Operand,
        src: &Operand,
        line: u32,
    ) -> CodegenResult<()> {
        match (dest, src) {
            (Operand::Reg(d), Operand::Imm(v) | Operand::Const(v)) => {
                self.alu_reg_imm(op, *d, *v, line)
            }
            (Operand::Reg(d), Operand::Reg(s)) => self.alu_reg_reg(op, *d, *s, line),
            _ => Err(CodegenError::Unsupported(format!(
                "this operand combination for \"{}\" is not implemented",
                op.mnemonic()
            ))),
        }
    }

    fn alu_reg_imm(&mut self, op: AluOp, dest: Reg, value: i64, line: u32) -> CodegenResult<()> {
        let what = format!("an \"{}\" destination", op.mnemonic());
        require_low_gp(dest, &what)?;
        require_width(dest.bits)?;
        let buf = self.layout.code_buf(line);
        if dest.enc == 0 {
            // The accumulator has dedicated single-byte forms.
            match dest.bits {
                8 => {
                    buf.push(op.base() | 4);
                    buf.push(value as u8);
                }
                16 => {
                    buf.push(op.base() | 5);
                    buf.extend_from_slice(&(value as u16).to_le_bytes());
                }
                _ => {
                    buf.push(op.base() | 5);
                    buf.extend_from_slice(&(value as u32).to_le_bytes());
                }
            }
        } else {
            match dest.bits {
                8 => {
                    buf.push(0x80);
                    buf.push(encode_modrm(0b11, op.subop(), dest.enc));
                    buf.push(value as u8);
                }
                16 => {
                    buf.push(0x81);
                    buf.push(encode_modrm(0b11, op.subop(), dest.enc));
                    buf.extend_from_slice(&(value as u16).to_le_bytes());
                }
                _ => {
                    buf.push(0x81);
                    buf.push(encode_modrm(0b11, op.subop(), dest.enc));
                    buf.extend_from_slice(&(value as u32).to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn alu_reg_reg(&mut self, op: AluOp, dest: Reg, src: Reg, line: u32) -> CodegenResult<()> {
        let what = format!("an \"{}\" operand", op.mnemonic());
        require_low_gp(dest, &what)?;
        require_low_gp(src, &what)?;
        require_width(dest.bits)?;
        let opcode = if dest.bits == 8 {
            op.base()
        } else {
            op.base() + 1
        };
        let buf = self.layout.code_buf(line);
        buf.push(opcode);
        buf.push(encode_modrm(0b11, src.enc, dest.enc));
        Ok(())
    }

    /// `dec reg`, the single-byte `48+r` form. The clash with REX prefixes
    /// in 64-bit mode is a known limitation of the subset.
    pub fn dec(&mut self, dest: Reg, line: u32) -> CodegenResult<()> {
        require_low_gp(dest, "a \"dec\" destination")?;
        self.layout.code_buf(line).push(0x48 + dest.enc);
        Ok(())
    }

    /// `rep stosb/stosw/stosd`.
    pub fn rep(&mut self, op: &[u8], line: u32) -> CodegenResult<()> {
        let second = match op {
            b"stosb" => 0xAA,
            b"stosw" | b"stosd" => 0xAB,
            _ => {
                return Err(CodegenError::Unsupported(format!(
                    "\"rep {}\" is not implemented",
                    String::from_utf8_lossy(op)
                )));
            }
        };
        let buf = self.layout.code_buf(line);
        buf.push(0xF3);
        buf.push(second);
        Ok(())
    }

    /// Resolve jump targets and run branch relaxation. After this the block
    /// addresses are final and the stream can be emitted.
    pub fn finish(&mut self) -> CodegenResult<()> {
        crate::relax::bind_targets(&mut self.layout, &self.labels)?;
        crate::relax::relax_branches(&mut self.layout);
        Ok(())
    }

    /// Total size of the (relaxed) code stream.
    pub fn code_size(&self) -> CodeOffset {
        self.layout.code_size()
    }

    /// Address of `_start`, or 0 when the label is not defined.
    pub fn entry_address(&self) -> CodeOffset {
        match self.labels.get(b"_start") {
            Some(block) => self.layout.node(*block).address,
            None => 0,
        }
    }

    /// Serialize the relaxed stream into `sink`.
    pub fn emit(&self, sink: &mut impl CodeSink) {
        binemit::emit(&self.layout, sink);
    }

    /// Convenience wrapper collecting the emitted bytes.
    pub fn emit_code(&self) -> Vec<u8> {
        let mut sink = Vec::with_capacity(self.code_size() as usize);
        self.emit(&mut sink);
        sink
    }

    /// Borrow the block layout, e.g. to inspect addresses in tests.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
