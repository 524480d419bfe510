//! Byte-level checks of the emitted ELF container.

use anvil_object::{write_executable, CODE_OFFSET};

fn field_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

fn field_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn field_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

#[test]
fn empty_executable_is_just_the_prelude() {
    let mut out = Vec::new();
    write_executable(&mut out, &[], 0).unwrap();
    assert_eq!(out.len() as u64, CODE_OFFSET);
    assert_eq!(out.len(), 0x78);
}

#[test]
fn file_header_fields() {
    let mut out = Vec::new();
    write_executable(&mut out, &[0x90], 0x1234).unwrap();

    assert_eq!(&out[..4], [0x7F, b'E', b'L', b'F']);
    assert_eq!(out[4], 2, "ELFCLASS64");
    assert_eq!(out[5], 1, "little-endian");
    assert_eq!(out[6], 1, "EV_CURRENT");
    assert_eq!(out[7], 0, "System V ABI");
    assert_eq!(field_u16(&out, 0x10), 2, "ET_EXEC");
    assert_eq!(field_u16(&out, 0x12), 0x3E, "EM_X86_64");
    assert_eq!(field_u32(&out, 0x14), 1, "file version");
    assert_eq!(field_u64(&out, 0x18), 0x1234, "entry");
    assert_eq!(field_u64(&out, 0x20), 0x40, "phoff");
    assert_eq!(field_u64(&out, 0x28), 0, "shoff");
    assert_eq!(field_u16(&out, 0x34), 0x40, "ehsize");
    assert_eq!(field_u16(&out, 0x36), 0x38, "phentsize");
    assert_eq!(field_u16(&out, 0x38), 1, "phnum");
    assert_eq!(field_u16(&out, 0x3A), 0, "shentsize");
    assert_eq!(field_u16(&out, 0x3C), 0, "shnum");
    assert_eq!(field_u16(&out, 0x3E), 0, "shstrndx");
}

#[test]
fn program_header_fields() {
    let code = [0xEB, 0xFE, 0x90];
    let mut out = Vec::new();
    write_executable(&mut out, &code, 0).unwrap();

    let ph = 0x40;
    assert_eq!(field_u32(&out, ph), 1, "PT_LOAD");
    assert_eq!(field_u32(&out, ph + 0x04), 5, "R+X");
    assert_eq!(field_u64(&out, ph + 0x08), 0x78, "offset");
    assert_eq!(field_u64(&out, ph + 0x10), 0, "vaddr");
    assert_eq!(field_u64(&out, ph + 0x18), 0, "paddr");
    assert_eq!(field_u64(&out, ph + 0x20), 3, "filesz");
    assert_eq!(field_u64(&out, ph + 0x28), 3, "memsz");
    assert_eq!(field_u64(&out, ph + 0x30), 8, "align");

    assert_eq!(&out[0x78..], code);
    assert_eq!(out.len(), 0x78 + code.len());
}
