/// MIB compiler CLI

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mib_compiler::{CompileError, Compiler, Libsmi, ProcessRunner, PysnmpRuntime, Settings};

#[derive(Parser, Debug)]
#[command(name = "mibc")]
#[command(about = "MIB compiler - compiles ASN.1 MIB modules into PySNMP registry modules")]
#[command(version)]
struct Args {
    /// Settings file (JSON)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Root of the ASN.1 MIB source tree
    #[arg(long, value_name = "PATH", global = true)]
    mibs_root: Option<PathBuf>,

    /// PySNMP MIB directory receiving compiled modules
    #[arg(long, value_name = "DIR", global = true)]
    destination: Option<PathBuf>,

    /// Staging directory
    #[arg(long, value_name = "DIR", global = true)]
    staging: Option<PathBuf>,

    /// Per-tool timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// Print the report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a module and its imports, then commit them
    Compile {
        /// Module to compile
        #[arg(value_name = "MODULE", required_unless_present = "revalidate")]
        module: Option<String>,

        /// Only check consistency and commit what is already staged
        #[arg(long, conflicts_with = "module")]
        revalidate: bool,
    },
    /// Check that every registry module loads
    Check,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(root) = &args.mibs_root {
        settings.mibs_root = Some(root.clone());
    }
    if let Some(dir) = &args.destination {
        settings.destination_dir = dir.clone();
    }
    if let Some(dir) = &args.staging {
        settings.staging_dir = dir.clone();
    }
    if let Some(secs) = args.timeout {
        settings.tool_timeout_secs = secs;
    }
    settings.validate().map_err(CompileError::InvalidSettings)?;
    Ok(settings)
}

fn run(args: Args) -> anyhow::Result<()> {
    let settings = settings(&args)?;
    let runner = ProcessRunner::new(settings.tool_timeout());
    // The real config path is set once the run generates it.
    let toolchain = Libsmi::new(
        runner.clone(),
        settings.tools.clone(),
        "smi.conf",
        settings.severity,
    );
    let runtime = PysnmpRuntime::new(runner, settings.tools.python.clone());
    let mut compiler = Compiler::new(settings, toolchain, runtime);

    match args.command {
        Command::Compile { revalidate: true, .. } => {
            let report = compiler.revalidate()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Revalidated: {} installed, {} replaced, {} skipped",
                    report.installed.len(),
                    report.replaced.len(),
                    report.skipped.len()
                );
            }
        }
        Command::Compile { module: Some(module), .. } => {
            let report = compiler.process(&module)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Compilation successful: {}", report.module);
                println!("  Compiled: {}", report.compiled.join(", "));
                println!("  Installed: {}", report.commit.installed.len());
                println!("  Replaced: {}", report.commit.replaced.len());
                println!("  Unchanged: {}", report.commit.unchanged.len());
                for skipped in &report.commit.skipped {
                    println!(
                        "  Kept existing {} ({} bytes, new {} bytes)",
                        skipped.module, skipped.old_size, skipped.new_size
                    );
                }
                if !report.warnings.is_empty() {
                    println!("  Warnings: {}", report.warnings.len());
                }
            }
        }
        Command::Compile { module: None, .. } => {
            anyhow::bail!("a module name or --revalidate is required");
        }
        Command::Check => {
            compiler.check()?;
            println!("Registry consistency OK");
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        match e.downcast_ref::<CompileError>() {
            Some(err) => eprintln!(
                "Compilation failed [{}{}]: {}",
                err.kind(),
                err.module().map(|m| format!(" {}", m)).unwrap_or_default(),
                err
            ),
            None => eprintln!("Compilation failed: {}", e),
        }
        process::exit(1);
    }
}
