//! BkSync - binary delta synchronization

use anyhow::Context;
use bksync::cli::{Cli, Commands, ConfigArgs, DeltaArgs, InspectArgs, PatchArgs, SignArgs};
use bksync::config::Config;
use bksync::engine::{self, DeltaOptions};
use bksync::format::{format_size, format_summary, DeltaReport};
use bksync::gate::RatioGate;
use bksync::signature;
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Sign(ref args) => run_sign(&cli, args)?,
        Commands::Delta(ref args) => run_delta(&cli, args)?,
        Commands::Patch(ref args) => run_patch(&cli, args)?,
        Commands::Inspect(ref args) => run_inspect(&cli, args)?,
        Commands::Config(ref args) => handle_config_command(&cli, args)?,
    }

    Ok(())
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("bksync=info"),
        1 => EnvFilter::new("bksync=debug"),
        2 => EnvFilter::new("bksync=trace"),
        _ => EnvFilter::new("trace"),
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

fn run_sign(cli: &Cli, args: &SignArgs) -> anyhow::Result<()> {
    let config = cli.load_config()?;
    tracing::info!(file = ?args.file, "Generating signature");

    let file_size = std::fs::metadata(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?
        .len();
    let block_size = args
        .block_size
        .unwrap_or_else(|| config.effective_block_size(file_size));

    let table = signature::build_from_path(&args.file, Some(block_size))?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| with_suffix(&args.file, ".sign"));
    signature::write_signature(&table, &output)?;

    tracing::info!(
        output = ?output,
        blocks = table.block_count(),
        block_size = table.block_size(),
        "Signature generated"
    );
    Ok(())
}

fn run_delta(cli: &Cli, args: &DeltaArgs) -> anyhow::Result<()> {
    let mut config = cli.load_config()?;
    args.apply_to(&mut config);
    config.validate()?;
    let work_dir = config.effective_work_dir();

    let src = args
        .src
        .clone()
        .unwrap_or_else(|| file_key(&args.new_file));

    let delta = match (&args.base_file, &args.signature) {
        (Some(base), _) => {
            let dest = args.dest.clone().unwrap_or_else(|| file_key(base));
            let options = DeltaOptions::from_config(&config);
            engine::delta_with_options(&args.new_file, base, &src, &dest, &work_dir, &options)?
        }
        (None, Some(sig_path)) => {
            let table = signature::read_signature(sig_path)?;
            let dest = args.dest.clone().unwrap_or_else(|| {
                table
                    .file_md5()
                    .map(hex::encode)
                    .unwrap_or_else(|| file_key(sig_path))
            });
            engine::delta_with_signature(
                &args.new_file,
                &table,
                &src,
                &dest,
                &work_dir,
                config.min_match_ratio,
            )?
        }
        (None, None) => anyhow::bail!("either a base file or --signature is required"),
    };

    DeltaReport {
        src: delta.src(),
        dest: delta.dest(),
        stats: delta.stats(),
        delta_size: delta.len(),
        min_match_ratio: delta.min_match_ratio(),
    }
    .print();

    if args.strict {
        RatioGate::new(config.min_match_ratio).enforce(delta.stats())?;
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| with_suffix(&args.new_file, ".bd"));
    place(delta.into_temp_path(), &output)?;

    tracing::info!(output = ?output, "Delta written");
    Ok(())
}

fn run_patch(cli: &Cli, args: &PatchArgs) -> anyhow::Result<()> {
    let mut config = cli.load_config()?;
    if let Some(ref dir) = args.work_dir {
        config.work_dir = Some(dir.clone());
    }

    let output = patch_output(&args.delta_file, args.output.as_deref())?;
    let rebuilt = engine::patch(&args.delta_file, &args.base_file, &config.effective_work_dir())?;

    println!(
        "Rebuilt {} ({}, md5 {})",
        output.display(),
        format_size(rebuilt.len()),
        rebuilt.md5_hex()
    );
    place(rebuilt.into_temp_path(), &output)?;
    Ok(())
}

fn run_inspect(cli: &Cli, args: &InspectArgs) -> anyhow::Result<()> {
    let summary = engine::inspect(&args.delta_file)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", format_summary(&summary));
    }
    Ok(())
}

fn handle_config_command(cli: &Cli, args: &ConfigArgs) -> anyhow::Result<()> {
    if args.path {
        match Config::default_config_path() {
            Ok(path) => println!("{}", path.display()),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else if args.init {
        let config = Config::default();
        config.save()?;
        println!(
            "Created default configuration at {}",
            Config::default_config_path()?.display()
        );
    } else {
        // Show current config
        let config = cli.load_config()?;
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

/// Move a finished temp file to `output`, copying when it lives on another filesystem
fn place(temp: TempPath, output: &Path) -> anyhow::Result<()> {
    if let Err(e) = temp.persist(output) {
        tracing::debug!(error = %e.error, "Rename failed, copying instead");
        std::fs::copy(&e.path, output).with_context(|| format!("writing {}", output.display()))?;
    }
    Ok(())
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `new.bin.bd` becomes `new.bin`; anything else gets `.out` appended
fn patched_path(delta_file: &Path) -> PathBuf {
    match delta_file.extension() {
        Some(ext) if ext == "bd" => delta_file.with_extension(""),
        _ => with_suffix(delta_file, ".out"),
    }
}

/// Where `patch` writes. The derived default never replaces an existing file;
/// an explicit `-o` does.
fn patch_output(delta_file: &Path, output: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = output {
        return Ok(path.to_path_buf());
    }
    let path = patched_path(delta_file);
    if path.exists() {
        anyhow::bail!(
            "{} already exists; pass -o to choose the output path",
            path.display()
        );
    }
    Ok(path)
}
