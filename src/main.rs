//! Command line driver: applies the selected passes to a module file.

use std::env;
use std::fs;
use std::process;

use rewasm::codec::cursor::ByteCursor;
use rewasm::passes::{
    self, CustomSectionStripper, I64ImportLowering, Pass, StackOverflowGuard,
};

const USAGE: &str = "usage: rewasm <input.wasm> [-o <output.wasm>] [--lower-i64] [--strip-custom] [--stack-guard] [--sections]";

struct Options {
    input: String,
    output: Option<String>,
    lower_i64: bool,
    strip_custom: bool,
    stack_guard: bool,
    sections: bool,
}

fn parse_args() -> Result<Options, String> {
    let mut args = env::args().skip(1);
    let mut input = None;
    let mut output = None;
    let mut lower_i64 = false;
    let mut strip_custom = false;
    let mut stack_guard = false;
    let mut sections = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                output = Some(args.next().ok_or("missing value for -o")?);
            }
            "--lower-i64" => lower_i64 = true,
            "--strip-custom" => strip_custom = true,
            "--stack-guard" => stack_guard = true,
            "--sections" => sections = true,
            other if !other.starts_with('-') && input.is_none() => {
                input = Some(other.to_string());
            }
            other => return Err(format!("unrecognized argument: {}", other)),
        }
    }

    Ok(Options {
        input: input.ok_or("missing input file")?,
        output,
        lower_i64,
        strip_custom,
        stack_guard,
        sections,
    })
}

fn print_sections(module: &[u8]) -> Result<(), String> {
    let mut cursor = ByteCursor::new(module);
    let infos = cursor
        .read_sections_info()
        .map_err(|e| format!("malformed module: {}", e))?;
    for info in infos {
        println!(
            "{:>10}  offset {:#08x}  size {} bytes",
            info.kind.to_string(),
            info.start,
            info.size
        );
    }
    Ok(())
}

fn run() -> Result<(), String> {
    let options = parse_args().map_err(|e| format!("{}\n{}", e, USAGE))?;

    let module =
        fs::read(&options.input).map_err(|e| format!("cannot read {}: {}", options.input, e))?;

    if options.sections {
        print_sections(&module)?;
    }

    let mut lower = I64ImportLowering::new();
    let mut strip = CustomSectionStripper::new();
    let mut guard = StackOverflowGuard::new();
    let mut pipeline: Vec<&mut dyn Pass> = Vec::new();
    if options.lower_i64 {
        pipeline.push(&mut lower);
    }
    if options.strip_custom {
        pipeline.push(&mut strip);
    }
    if options.stack_guard {
        pipeline.push(&mut guard);
    }

    if pipeline.is_empty() {
        if !options.sections {
            return Err(format!("no passes selected\n{}", USAGE));
        }
        return Ok(());
    }

    let rewritten = passes::run_pipeline(&module, &mut pipeline)
        .map_err(|e| format!("transform failed: {}", e))?;

    let output = match &options.output {
        Some(path) => path.clone(),
        None => return Err("missing output file (-o <output.wasm>)".to_string()),
    };
    fs::write(&output, &rewritten).map_err(|e| format!("cannot write {}: {}", output, e))?;
    println!(
        "{} -> {} ({} -> {} bytes)",
        options.input,
        output,
        module.len(),
        rewritten.len()
    );
    Ok(())
}

fn main() {
    if let Err(message) = run() {
        eprintln!("{}", message);
        process::exit(1);
    }
}
