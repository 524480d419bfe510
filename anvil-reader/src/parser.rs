//! Parse textual assembly and drive the encoder.
//!
//! The grammar is line oriented: one statement per line, where a statement
//! is a mnemonic with operands, a `NAME:` label definition, a
//! `NAME equ VALUE` constant definition, a `dw`/`dd` data directive, or the
//! bracketed `[bits N]` mode directive. There is no comment syntax.
//!
//! The parser owns what used to be process-wide state in assemblers of this
//! shape: the current line number, the mode flag, and the constant
//! namespace. Labels live in the [`Assembler`] because relaxation still
//! needs them after parsing ends.

use log::debug;

use anvil_codegen::block::JumpKind;
use anvil_codegen::reg;
use anvil_codegen::strmap::StringMap;
use anvil_codegen::{AluOp, Assembler, CodegenError, Operand};

use crate::error::{ErrorKind, Location, ParseError, ParseResult};
use crate::lexer::{parse_number, read_identifier};

/// Parser context: the source cursor and the constant namespace.
pub struct Parser {
    /// Current source line, 1-based once parsing has started.
    line: u32,
    /// Toggled by `[bits 32]`/`[bits 64]`; captured into each jump.
    long_mode: bool,
    /// `NAME equ VALUE` bindings. A separate namespace from labels.
    constants: StringMap<i64>,
}

impl Parser {
    /// Create a parser in the default 64-bit mode.
    pub fn new() -> Self {
        Self {
            line: 0,
            long_mode: true,
            constants: StringMap::new(),
        }
    }

    /// Assemble a whole source buffer into `asm`.
    ///
    /// Stops at the first error; the assembler contents are unspecified
    /// afterwards.
    pub fn parse_source(&mut self, src: &[u8], asm: &mut Assembler) -> ParseResult<()> {
        for line in src.split_inclusive(|&b| b == b'\n') {
            self.line += 1;
            self.parse_line(line, asm)?;
        }
        debug!("parsed {} lines", self.line);
        Ok(())
    }

    fn loc(&self) -> Location {
        Location { line: self.line }
    }

    fn codegen(&self, err: CodegenError) -> ParseError {
        ParseError::from_codegen(err, self.loc())
    }

    fn parse_line(&mut self, line: &[u8], asm: &mut Assembler) -> ParseResult<()> {
        let (skipped, ident) = read_identifier(line);
        let rest = &line[skipped + ident.len()..];
        match ident {
            // The only statement that does not start with an identifier is
            // the bracketed mode directive; anything else without one is
            // not a statement at all and is skipped.
            b"" => match rest.first() {
                Some(b'[') => self.bits_directive(rest),
                _ => Ok(()),
            },
            b"dw" => self.data_directive(asm, rest, "dw"),
            b"dd" => self.data_directive(asm, rest, "dd"),
            b"jmp" => self.jump(asm, rest, JumpKind::ShortJmp, "jmp"),
            b"jnz" => self.jump(asm, rest, JumpKind::ShortJnz, "jnz"),
            b"mov" => self.mov(asm, rest),
            b"add" => self.alu(asm, rest, AluOp::Add),
            b"or" => self.alu(asm, rest, AluOp::Or),
            b"and" => self.alu(asm, rest, AluOp::And),
            b"xor" => self.alu(asm, rest, AluOp::Xor),
            b"dec" => self.dec(asm, rest),
            b"rep" => self.rep(asm, rest),
            name => self.label_or_constant(asm, name, rest),
        }
    }

    /// A line that starts with an identifier that is no mnemonic: a label
    /// definition, a constant definition, or a mistake.
    fn label_or_constant(
        &mut self,
        asm: &mut Assembler,
        name: &[u8],
        rest: &[u8],
    ) -> ParseResult<()> {
        if rest.first() == Some(&b':') {
            // Anything after the colon is ignored.
            return asm
                .define_label(name, self.line)
                .map_err(|e| self.codegen(e));
        }
        let (skipped, keyword) = read_identifier(rest);
        if keyword == b"equ" {
            let value_text = &rest[skipped + keyword.len()..];
            let Some(value) = parse_number(value_text) else {
                return err!(
                    self.loc(),
                    ErrorKind::Syntax,
                    "constant \"{}\" requires a value",
                    lossy(name)
                );
            };
            if self.constants.get(name).is_some() {
                return err!(
                    self.loc(),
                    ErrorKind::Semantic,
                    "\"{}\" is already defined",
                    lossy(name)
                );
            }
            self.constants.insert(Box::from(name), value);
            return Ok(());
        }
        err!(
            self.loc(),
            ErrorKind::Syntax,
            "unknown instruction \"{}\"",
            lossy(name)
        )
    }

    /// `dw <expr>` / `dd <expr>`.
    fn data_directive(
        &mut self,
        asm: &mut Assembler,
        rest: &[u8],
        name: &str,
    ) -> ParseResult<()> {
        let Some(value) = self.expr(rest) else {
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "Directive \"{name}\" requires an argument"
            );
        };
        match name {
            "dw" => asm.data16(value, self.line),
            _ => asm.data32(value, self.line),
        }
        Ok(())
    }

    /// Resolve a data or immediate expression: a known constant name wins,
    /// then the token is scanned as a literal.
    fn expr(&self, buf: &[u8]) -> Option<i64> {
        let (_, ident) = read_identifier(buf);
        if !ident.is_empty() {
            if let Some(value) = self.constants.get(ident) {
                return Some(*value);
            }
        }
        parse_number(buf)
    }

    fn jump(
        &mut self,
        asm: &mut Assembler,
        rest: &[u8],
        kind: JumpKind,
        mnemonic: &str,
    ) -> ParseResult<()> {
        let (_, target) = read_identifier(rest);
        if target.is_empty() {
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "\"{mnemonic}\" requires a label"
            );
        }
        asm.jump(kind, target, self.long_mode, self.line);
        Ok(())
    }

    fn mov(&mut self, asm: &mut Assembler, rest: &[u8]) -> ParseResult<()> {
        let (dest_text, src_text) = self.split_operands(rest, "mov")?;
        let dest = self.operand(dest_text)?;
        let src = self.operand(src_text)?;
        asm.mov(&dest, &src, self.line).map_err(|e| self.codegen(e))
    }

    fn alu(&mut self, asm: &mut Assembler, rest: &[u8], op: AluOp) -> ParseResult<()> {
        let (dest_text, src_text) = self.split_operands(rest, op.mnemonic())?;
        let dest = self.operand(dest_text)?;
        let src = self.operand(src_text)?;
        asm.alu(op, &dest, &src, self.line)
            .map_err(|e| self.codegen(e))
    }

    fn dec(&mut self, asm: &mut Assembler, rest: &[u8]) -> ParseResult<()> {
        match self.operand(rest)? {
            Operand::Reg(r) => asm.dec(r, self.line).map_err(|e| self.codegen(e)),
            _ => err!(
                self.loc(),
                ErrorKind::Syntax,
                "\"dec\" requires a register operand"
            ),
        }
    }

    fn rep(&mut self, asm: &mut Assembler, rest: &[u8]) -> ParseResult<()> {
        let (_, op) = read_identifier(rest);
        if op.is_empty() {
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "\"rep\" requires a string operation"
            );
        }
        asm.rep(op, self.line).map_err(|e| self.codegen(e))
    }

    /// Split a two-operand line at the comma.
    fn split_operands<'a>(
        &self,
        buf: &'a [u8],
        mnemonic: &str,
    ) -> ParseResult<(&'a [u8], &'a [u8])> {
        match buf.iter().position(|&b| b == b',') {
            Some(comma) => Ok((&buf[..comma], &buf[comma + 1..])),
            None => err!(
                self.loc(),
                ErrorKind::Syntax,
                "\"{mnemonic}\" requires two operands separated by \",\""
            ),
        }
    }

    /// Parse one operand: a register, a `[reg]` memory reference with an
    /// optional width keyword, a named constant, or a literal.
    fn operand(&self, text: &[u8]) -> ParseResult<Operand> {
        let (skipped, ident) = read_identifier(text);
        if ident.is_empty() {
            let trimmed = &text[skipped..];
            if trimmed.first() == Some(&b'[') {
                return self.memory(trimmed, 32);
            }
            return match parse_number(text) {
                Some(value) => Ok(Operand::Imm(value)),
                None => err!(self.loc(), ErrorKind::Syntax, "expected an operand"),
            };
        }
        if ident.eq_ignore_ascii_case(b"DWORD") {
            let after = skip_ws(&text[skipped + ident.len()..]);
            if after.first() == Some(&b'[') {
                return self.memory(after, 32);
            }
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "expected \"[\" after a width keyword"
            );
        }
        if let Some(r) = reg::lookup(ident) {
            return Ok(Operand::Reg(r));
        }
        if let Some(value) = self.constants.get(ident) {
            return Ok(Operand::Const(*value));
        }
        match parse_number(&text[skipped..]) {
            Some(value) => Ok(Operand::Imm(value)),
            None => err!(
                self.loc(),
                ErrorKind::Syntax,
                "unknown operand \"{}\"",
                lossy(ident)
            ),
        }
    }

    /// Parse `[reg]` starting at the opening bracket.
    fn memory(&self, text: &[u8], bits: u16) -> ParseResult<Operand> {
        let inner = &text[1..];
        let (skipped, name) = read_identifier(inner);
        let Some(base) = reg::lookup(name) else {
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "\"{}\" is not a register",
                lossy(name)
            );
        };
        let after = skip_ws(&inner[skipped + name.len()..]);
        if after.first() != Some(&b']') {
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "expected \"]\" after a memory operand"
            );
        }
        Ok(Operand::Mem { base, bits })
    }

    /// `[bits 32]` / `[bits 64]`, starting at the opening bracket.
    fn bits_directive(&mut self, text: &[u8]) -> ParseResult<()> {
        let inner = &text[1..];
        let (skipped, keyword) = read_identifier(inner);
        if keyword != b"bits" {
            return err!(
                self.loc(),
                ErrorKind::Syntax,
                "unknown directive \"{}\"",
                lossy(keyword)
            );
        }
        let after = &inner[skipped + keyword.len()..];
        let value = match parse_number(after) {
            Some(value) if after.contains(&b']') => value,
            _ => {
                return err!(
                    self.loc(),
                    ErrorKind::Syntax,
                    "malformed \"[bits N]\" directive"
                );
            }
        };
        match value {
            32 => self.long_mode = false,
            64 => self.long_mode = true,
            _ => {
                return err!(
                    self.loc(),
                    ErrorKind::Semantic,
                    "{value} bit mode is not supported"
                );
            }
        }
        Ok(())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_ws(buf: &[u8]) -> &[u8] {
    let ws = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
    &buf[ws..]
}

fn lossy(bytes: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(src: &str) -> Vec<u8> {
        let mut asm = Assembler::new();
        let mut parser = Parser::new();
        parser.parse_source(src.as_bytes(), &mut asm).unwrap();
        asm.finish().unwrap();
        asm.emit_code()
    }

    fn parse_err(src: &str) -> ParseError {
        let mut asm = Assembler::new();
        let mut parser = Parser::new();
        parser.parse_source(src.as_bytes(), &mut asm).unwrap_err()
    }

    #[test]
    fn moves_and_alu() {
        assert_eq!(assemble("mov eax, 1\n"), [0xB8, 1, 0, 0, 0]);
        assert_eq!(assemble("mov [ebx], eax\n"), [0x89, 0x03]);
        assert_eq!(assemble("mov ebx , ecx\n"), [0x89, 0xCB]);
        assert_eq!(assemble("and al, 0x0F\n"), [0x24, 0x0F]);
        assert_eq!(assemble("xor esi, esi\n"), [0x31, 0xF6]);
        assert_eq!(assemble("dec edx\n"), [0x4A]);
        assert_eq!(assemble("rep stosd\n"), [0xF3, 0xAB]);
    }

    #[test]
    fn constants() {
        let code = assemble("K equ 0x1234\n_start:\ndw K\n");
        assert_eq!(code, [0x34, 0x12]);

        // Constants may seed immediates and memory stores.
        let code = assemble("VAL equ 7\nmov eax, VAL\n");
        assert_eq!(code, [0xB8, 7, 0, 0, 0]);
        let code = assemble("VAL equ 7\nmov [edi], VAL\n");
        assert_eq!(code, [0xC7, 0x07, 7, 0, 0, 0]);
        let code = assemble("VAL equ 7\nmov dword [edi], VAL\n");
        assert_eq!(code, [0xC7, 0x07, 7, 0, 0, 0]);
    }

    #[test]
    fn data_directives() {
        assert_eq!(assemble("dw 0x1234\ndd -1\n"), [0x34, 0x12, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(assemble("dd 010\n"), [8, 0, 0, 0]);
    }

    #[test]
    fn labels_and_jumps() {
        assert_eq!(assemble("_start: jmp _start\n"), [0xEB, 0xFE]);
        assert_eq!(
            assemble("[bits 64]\n_start: jmp fwd\n        dd 0\nfwd:    dd 0\n"),
            [0xEB, 0x04, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(assemble("top:\njnz top\n"), [0x75, 0xFE]);
    }

    #[test]
    fn bits_directive_selects_near_width() {
        let mut src = String::from("[bits 32]\njmp far\n");
        for _ in 0..50 {
            src.push_str("dd 0\n");
        }
        src.push_str("far:\n");
        let code = assemble(&src);
        // Near jmp in 32-bit mode is E9 + disp16.
        assert_eq!(code.len(), 3 + 200);
        assert_eq!(&code[..3], [0xE9, 0xC8, 0x00]);
    }

    #[test]
    fn blank_and_junk_lines() {
        assert_eq!(assemble("\n   \n!@#\nmov eax, 2\n"), [0xB8, 2, 0, 0, 0]);
        // No trailing newline.
        assert_eq!(assemble("mov eax, 2"), [0xB8, 2, 0, 0, 0]);
    }

    #[test]
    fn syntax_errors() {
        let err = parse_err("frobnicate eax\n");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.location.line, 1);
        assert!(err.message.contains("frobnicate"), "{err}");

        let err = parse_err("mov eax 1\n");
        assert_eq!(err.kind, ErrorKind::Syntax);

        let err = parse_err("\ndw\n");
        assert_eq!(err.location.line, 2);
        assert!(err.message.contains("\"dw\" requires an argument"), "{err}");

        let err = parse_err("[bits]\n");
        assert_eq!(err.kind, ErrorKind::Syntax);

        let err = parse_err("mov [nope], eax\n");
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn semantic_errors() {
        let err = parse_err("[bits 16]\n");
        assert_eq!(err.kind, ErrorKind::Semantic);

        let err = parse_err("a:\na:\n");
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert_eq!(err.location.line, 2);

        let err = parse_err("K equ 1\nK equ 2\n");
        assert_eq!(err.kind, ErrorKind::Semantic);
    }

    #[test]
    fn unsupported_errors() {
        let err = parse_err("mov r8, 1\n");
        assert_eq!(err.kind, ErrorKind::Unsupported);

        let err = parse_err("mov [ebx], 5\n");
        assert_eq!(err.kind, ErrorKind::Unsupported);
        assert!(err.message.contains("literal"), "{err}");

        let err = parse_err("rep stosq\n");
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn undefined_label_is_reported_at_finish() {
        let mut asm = Assembler::new();
        let mut parser = Parser::new();
        parser
            .parse_source(b"jmp nowhere\n", &mut asm)
            .unwrap();
        let err = asm.finish().unwrap_err();
        let err = ParseError::from_codegen(err, Location::default());
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert_eq!(err.location.line, 1);
        assert!(err.message.contains("nowhere"), "{err}");
    }
}
