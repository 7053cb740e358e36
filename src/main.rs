use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::error;
use sav_reader::sav::models::{MissingValues, RawValue};
use sav_reader::sav::utils::printable;
use sav_reader::{CaseValue, Extension, Record, SavReader, SlotValue};

/// Dump the records of system files (.sav / .zsav).
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Files to dump
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Also dump case data, up to MAX_CASES cases (all if no value is given)
    #[arg(short, long, value_name = "MAX_CASES", num_args = 0..=1)]
    data: Option<Option<usize>>,

    /// Password for encrypted files (plain or in the legacy encoded form)
    #[arg(short, long)]
    password: Option<String>,

    /// Enable verbose logging (can be used multiple times: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut failed = false;
    for path in &cli.files {
        if let Err(e) = dump_file(path, &cli) {
            error!("{}: {}", path.display(), e);
            failed = true;
        }
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

/// Initialize logging based on verbosity level; `RUST_LOG` still applies
/// when no `-v` is given.
fn init_logging(verbose: u8) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Info);
        }
        2 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    builder.format_timestamp(None).init();
}

fn dump_file(path: &Path, cli: &Cli) -> sav_reader::Result<()> {
    println!("Reading system file: {}", path.display());
    println!("{}", "=".repeat(60));

    let mut reader = SavReader::open(path)?;
    if reader.is_encrypted() {
        println!("File is encrypted.");
        let unlocked = cli
            .password
            .as_deref()
            .is_some_and(|password| reader.unlock(password));
        if !unlocked {
            println!("No valid password supplied; nothing more to read.");
            return Err(sav_reader::SavError::Locked);
        }
    }

    while let Some(record) = reader.next_record()? {
        print_record(&reader, &record);
    }

    if let Some(max_cases) = cli.data {
        dump_cases(&mut reader, max_cases)?;
    }

    let warnings = reader.warnings();
    if !warnings.is_empty() {
        println!("\n{} warnings:", warnings.len() + reader.suppressed_warnings());
        for warning in warnings {
            println!("  {}", warning);
        }
    }
    println!();
    Ok(())
}

fn print_record(reader: &SavReader, record: &Record) {
    match record {
        Record::Header(h) => {
            println!("File header:");
            println!("  Magic: {}", h.magic.as_str());
            println!("  Product: {}", reader.decode_text(&h.product));
            println!("  Layout code: {}", h.layout_code);
            println!("  Nominal case size: {}", h.nominal_case_size);
            println!("  Compression: {} ({:?})", h.compression_code, h.format.compression);
            println!("  Weight index: {}", h.weight_index);
            match h.n_cases {
                Some(n) => println!("  Cases: {}", n),
                None => println!("  Cases: unknown"),
            }
            println!("  Bias: {}", h.bias);
            println!("  Created: {} {}", h.creation_date, h.creation_time);
            println!("  Label: {}", reader.decode_text(&h.file_label));
            println!(
                "  Format: {:?} integers, {:?} floats",
                h.format.byte_order, h.format.float_format
            );
        }
        Record::Variable(v) => {
            print!("{:08x}: variable {} width {}", v.offset, v.name, v.width);
            if v.is_continuation() {
                println!(" (continuation)");
                return;
            }
            println!(", print {}, write {}", v.print_format, v.write_format);
            if let Some(label) = &v.label {
                println!("          label: {}", reader.decode_text(label));
            }
            if !v.missing.is_empty() {
                println!("          missing: {}", describe_missing(reader, &v.missing));
            }
        }
        Record::ValueLabels(r) => {
            println!(
                "{:08x}: {} value labels for variables {:?}",
                r.offset,
                r.labels.len(),
                r.var_indexes
            );
            for label in &r.labels {
                println!(
                    "          {} = {}",
                    describe_value(reader, &label.value),
                    reader.decode_text(&label.label)
                );
            }
        }
        Record::Document(d) => {
            println!("{:08x}: document, {} lines", d.offset, d.lines.len());
            for line in &d.lines {
                println!("          {}", reader.decode_text(line).trim_end());
            }
        }
        Record::Extension(x) => {
            let h = &x.header;
            println!(
                "{:08x}: extension subtype {}, size {}, count {}",
                h.offset, h.subtype, h.size, h.count
            );
            match &x.extension {
                Extension::Unknown { dump } => {
                    for line in dump {
                        println!("          {}", line);
                    }
                }
                Extension::ProductInfo(text) | Extension::Encoding(text) => {
                    println!("          {}", text);
                }
                other => println!("          {:?}", other),
            }
        }
        Record::EndOfDictionary {
            offset,
            data_offset,
        } => {
            println!(
                "{:08x}: end of dictionary, case data at {:#x}",
                offset, data_offset
            );
        }
    }
}

fn describe_value(reader: &SavReader, value: &RawValue) -> String {
    match value {
        RawValue::Number(x) => x.to_string(),
        RawValue::String(bytes) => format!("{:?}", reader.decode_text(bytes)),
    }
}

fn describe_missing(reader: &SavReader, missing: &MissingValues) -> String {
    let mut parts: Vec<String> = missing
        .values
        .iter()
        .map(|value| describe_value(reader, value))
        .collect();
    if let Some((low, high)) = missing.range {
        parts.insert(0, format!("{} THRU {}", low, high));
    }
    parts.join(", ")
}

fn dump_cases(reader: &mut SavReader, max_cases: Option<usize>) -> sav_reader::Result<()> {
    println!("\nCase data:");
    let mut cases = Vec::new();
    for case in reader.case_values().cases() {
        if max_cases.is_some_and(|max| cases.len() >= max) {
            break;
        }
        cases.push(case?);
    }
    for case in &cases {
        let Some(first) = case.first() else {
            continue;
        };
        println!("  case {}:", first.case_index + 1);
        for value in case {
            println!("    {}", describe_slot(reader, value));
        }
    }
    if let Some(layout) = reader.zlib_layout() {
        println!(
            "\nzlib trailer at {:#x}: {} blocks of up to {:#x} bytes",
            layout.trailer.offset, layout.trailer.n_blocks, layout.trailer.block_size
        );
        for (i, block) in layout.trailer.blocks.iter().enumerate() {
            println!(
                "  block {}: {:#x} ({} bytes) -> {:#x} ({} bytes)",
                i,
                block.compressed_ofs,
                block.compressed_size,
                block.uncompressed_ofs,
                block.uncompressed_size
            );
        }
    }
    Ok(())
}

fn describe_slot(reader: &SavReader, value: &CaseValue) -> String {
    let opcode = value
        .opcode
        .map_or_else(String::new, |code| format!("opcode {:3} ", code));
    let text = match value.value {
        SlotValue::Number(x) => x.to_string(),
        SlotValue::Sysmis => "SYSMIS".to_string(),
        SlotValue::Spaces => "\"        \"".to_string(),
        SlotValue::Literal(bytes) => match reader.number(value) {
            Some(x) => x.to_string(),
            None => format!("\"{}\" ({})", printable(&bytes), hex::encode(bytes)),
        },
    };
    format!("{:08x}: slot {} {}{}", value.offset, value.slot, opcode, text)
}
