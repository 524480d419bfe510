//! Command-line driver for the Anvil assembler.
//!
//! `anvil [-o OUT] INPUT` assembles one source file into a statically
//! linked ELF64 executable. Diagnostics go to stderr in the form
//! `Assembler Error (file:line): message`, and the process exit code
//! distinguishes the failure classes.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anvil_codegen::Assembler;
use anvil_reader::{ErrorKind, Location, ParseError, Parser};
use clap::Parser as _;

const SUCCESS: i32 = 0;
const USAGE_ERROR: i32 = -1;
const IO_ERROR: i32 = -2;
const SYNTAX_ERROR: i32 = -3;
const SEMANTIC_ERROR: i32 = -4;
const FEATURE_NOT_IMPLEMENTED: i32 = -5;

#[derive(clap::Parser)]
#[command(
    name = "anvil",
    version,
    about = "Assemble x86 source into a minimal static ELF64 executable"
)]
struct Args {
    /// Where to write the executable.
    #[arg(short = 'o', long = "output", value_name = "FILE", default_value = "out.elf")]
    output: PathBuf,

    /// The assembly source file.
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    process::exit(run(&args));
}

fn run(args: &Args) -> i32 {
    let Some(input) = &args.input else {
        eprintln!("Assembler Error: No input file");
        return USAGE_ERROR;
    };

    let source = match fs::read(input) {
        Ok(source) => source,
        Err(_) => {
            eprintln!(
                "Assembler Error ({}:1): cannot open file for reading",
                input.display()
            );
            return IO_ERROR;
        }
    };

    let mut asm = Assembler::new();
    let mut parser = Parser::new();
    if let Err(err) = parser.parse_source(&source, &mut asm) {
        return report(input, &err);
    }
    if let Err(err) = asm.finish() {
        return report(input, &ParseError::from_codegen(err, Location::default()));
    }

    log::debug!(
        "{}: {} bytes of code, entry {:#x}",
        input.display(),
        asm.code_size(),
        asm.entry_address()
    );

    let code = asm.emit_code();
    let entry = u64::from(asm.entry_address());
    match write_output(&args.output, &code, entry) {
        Ok(()) => SUCCESS,
        Err(_) => {
            eprintln!(
                "Assembler Error ({}:1): cannot open file for writing",
                args.output.display()
            );
            IO_ERROR
        }
    }
}

fn write_output(path: &Path, code: &[u8], entry: u64) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    anvil_object::write_executable(&mut out, code, entry)?;
    out.flush()
}

fn report(input: &Path, err: &ParseError) -> i32 {
    eprintln!(
        "Assembler Error ({}:{}): {}",
        input.display(),
        err.location.line,
        err.message
    );
    match err.kind {
        ErrorKind::Syntax => SYNTAX_ERROR,
        ErrorKind::Semantic => SEMANTIC_ERROR,
        ErrorKind::Unsupported => FEATURE_NOT_IMPLEMENTED,
    }
}
