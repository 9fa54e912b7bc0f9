mod host;
mod shell;

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use host::{parse_raw_image, parse_symbol_override, RawImage, SnapshotSources, SymbolOverride};
use kdbg_core::{Command, KdbgError, KernelLayout, Report, Result};
use kdbg_utils::{info, init_logging, init_logging_to_file, LogLevel, LoggingGuard};
use serde_json::json;

/// Exit status when a heap walk stopped on corruption
const EXIT_HEAP_CORRUPTION: i32 = 2;

/// Inspect a halted x86-64 kernel from a memory snapshot.
#[derive(Parser, Debug)]
#[command(name = "kdbg")]
#[command(version)]
#[command(about = "Inspect a halted x86-64 kernel: exception frames, page tables, heap blocks and frame state", long_about = None)]
struct Cli
{
    /// Kernel executable providing the symbol table
    #[arg(long, env = "KDBG_KERNEL")]
    kernel: Option<PathBuf>,

    /// ELF core file (QEMU `dump-guest-memory`); may be repeated
    #[arg(long = "core", value_name = "ELF-CORE")]
    cores: Vec<PathBuf>,

    /// Raw physical memory image placed at a physical address; may be repeated
    #[arg(long = "raw", value_name = "PATH@PHYS", value_parser = parse_raw_image)]
    raws: Vec<RawImage>,

    /// JSON object of register values (`{"rsp": "0x...", "cr3": ...}`)
    #[arg(long, value_name = "JSON")]
    registers: Option<PathBuf>,

    /// Define or override a symbol; may be repeated
    #[arg(long = "symbol", value_name = "NAME=ADDR", value_parser = parse_symbol_override)]
    symbols: Vec<SymbolOverride>,

    /// Kernel layout file (symbol names and structure constants)
    #[arg(long, value_name = "JSON", env = "KDBG_LAYOUT")]
    layout: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log level (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Write the register set back after the command
    #[arg(long, value_name = "PATH")]
    save_registers: Option<PathBuf>,

    /// Command name or alias (`kdbg commands` lists them)
    command: String,

    /// Command argument: a literal, symbol or `$register`, with an optional `+offset`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat
{
    /// Operator-facing text
    Text,
    /// Pretty-printed JSON
    Json,
}

fn main()
{
    let cli = Cli::parse();

    let guard = match start_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    // Flush file logs before exiting
    drop(guard);
    process::exit(code);
}

fn start_logging(cli: &Cli) -> std::result::Result<LoggingGuard, kdbg_utils::LoggingError>
{
    match cli.format {
        OutputFormat::Text => init_logging(cli.log_level),
        // Keep the terminal for the JSON document only
        OutputFormat::Json => init_logging_to_file(None, cli.log_level).map(|(_, guard)| guard),
    }
}

fn run(cli: &Cli) -> Result<i32>
{
    if cli.command == "commands" {
        list_commands(cli.format)?;
        return Ok(0);
    }

    let layout = match &cli.layout {
        Some(path) => KernelLayout::load(path)?,
        None => KernelLayout::default(),
    };

    let sources = SnapshotSources {
        kernel: cli.kernel.clone(),
        cores: cli.cores.clone(),
        raws: cli.raws.clone(),
        registers: cli.registers.clone(),
        symbols: cli.symbols.clone(),
    };
    let mut target = sources.load()?;

    let command = shell::parse_command(&cli.command, &cli.args, &target)?;
    info!(command = command.name(), "running");
    let report = command.invoke(&mut target, &layout)?;
    print_report(&report, cli.format)?;

    if let Some(path) = &cli.save_registers {
        target.save_registers(path)?;
        info!(path = %path.display(), "saved registers");
    }

    Ok(if report.heap_corruption().is_some() {
        EXIT_HEAP_CORRUPTION
    } else {
        0
    })
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()>
{
    match format {
        OutputFormat::Text => println!("{report}"),
        OutputFormat::Json => println!("{}", to_json(report)?),
    }
    Ok(())
}

fn list_commands(format: OutputFormat) -> Result<()>
{
    match format {
        OutputFormat::Text => {
            for spec in &shell::COMMANDS {
                let usage = match spec.argument {
                    Some(argument) => format!("{} <{argument}>", spec.name()),
                    None => spec.name().to_string(),
                };
                println!(
                    "{usage:<28} {:<6} {:<22} {}",
                    spec.alias.unwrap_or("-"),
                    capabilities(&spec.template),
                    spec.template.summary()
                );
            }
        }
        OutputFormat::Json => {
            let listing: Vec<_> = shell::COMMANDS
                .iter()
                .map(|spec| {
                    json!({
                        "name": spec.name(),
                        "alias": spec.alias,
                        "argument": spec.argument,
                        "capabilities": spec.template.required_capabilities(),
                        "mutates_registers": spec.template.mutates_registers(),
                        "summary": spec.template.summary(),
                    })
                })
                .collect();
            println!("{}", to_json(&listing)?);
        }
    }
    Ok(())
}

fn capabilities(command: &Command) -> String
{
    let names: Vec<String> = command
        .required_capabilities()
        .iter()
        .map(ToString::to_string)
        .collect();
    let mut text = if names.is_empty() { "-".to_string() } else { names.join(",") };
    if command.mutates_registers() {
        text.push_str(" (writes)");
    }
    text
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String>
{
    serde_json::to_string_pretty(value).map_err(|err| KdbgError::InvalidArgument(format!("cannot encode report: {err}")))
}
