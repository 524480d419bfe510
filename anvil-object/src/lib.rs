//! Minimal ELF64 executable emission.
//!
//! The assembler produces a single R+X text segment mapped at virtual
//! address 0, so the container is fixed: a 0x40-byte ELF file header, one
//! 0x38-byte `PT_LOAD` program header, and the raw code stream at file
//! offset 0x78. Everything is written little-endian, field by field; there
//! are no sections and no symbol table, so a general object-file writer
//! would only obscure the layout.

use std::io::{self, Write};

const CLASS_64: u8 = 2;
const DATA_LITTLE_ENDIAN: u8 = 1;
const EV_CURRENT: u8 = 1;
const OS_ABI_SYSV: u8 = 0;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3E;
const ELF_HEADER_SIZE: u16 = 0x40;
const PROGRAM_HEADER_SIZE: u16 = 0x38;
const PT_LOAD: u32 = 1;
const PF_R_X: u32 = 5;
const SEGMENT_ALIGN: u64 = 8;

/// File offset of the code stream: the ELF header plus one program header.
pub const CODE_OFFSET: u64 = ELF_HEADER_SIZE as u64 + PROGRAM_HEADER_SIZE as u64;

/// Write a complete executable: the fixed prelude followed by `code`.
///
/// `entry` is the virtual address of the first instruction to run,
/// conventionally the address of `_start` (or 0 when it is not defined,
/// which coincides with the start of the segment).
pub fn write_executable<W: Write>(out: &mut W, code: &[u8], entry: u64) -> io::Result<()> {
    write_file_header(out, entry)?;
    write_program_header(out, code.len() as u64)?;
    out.write_all(code)
}

fn write_file_header<W: Write>(out: &mut W, entry: u64) -> io::Result<()> {
    out.write_all(&[0x7F, b'E', b'L', b'F'])?;
    out.write_all(&[CLASS_64, DATA_LITTLE_ENDIAN, EV_CURRENT, OS_ABI_SYSV])?;
    // ABI version and the seven padding bytes.
    out.write_all(&[0; 8])?;
    out.write_all(&ET_EXEC.to_le_bytes())?;
    out.write_all(&EM_X86_64.to_le_bytes())?;
    out.write_all(&u32::from(EV_CURRENT).to_le_bytes())?;
    out.write_all(&entry.to_le_bytes())?;
    // Program headers sit directly behind this header; no section headers.
    out.write_all(&u64::from(ELF_HEADER_SIZE).to_le_bytes())?;
    out.write_all(&0u64.to_le_bytes())?;
    // flags
    out.write_all(&0u32.to_le_bytes())?;
    out.write_all(&ELF_HEADER_SIZE.to_le_bytes())?;
    out.write_all(&PROGRAM_HEADER_SIZE.to_le_bytes())?;
    // phnum = 1, then shentsize/shnum/shstrndx all zero.
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&0u16.to_le_bytes())?;
    out.write_all(&0u16.to_le_bytes())?;
    out.write_all(&0u16.to_le_bytes())
}

fn write_program_header<W: Write>(out: &mut W, code_size: u64) -> io::Result<()> {
    out.write_all(&PT_LOAD.to_le_bytes())?;
    out.write_all(&PF_R_X.to_le_bytes())?;
    out.write_all(&CODE_OFFSET.to_le_bytes())?;
    // vaddr and paddr: the segment is mapped at 0.
    out.write_all(&0u64.to_le_bytes())?;
    out.write_all(&0u64.to_le_bytes())?;
    out.write_all(&code_size.to_le_bytes())?;
    out.write_all(&code_size.to_le_bytes())?;
    out.write_all(&SEGMENT_ALIGN.to_le_bytes())
}
