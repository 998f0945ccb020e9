//! CLI argument parsing for BkSync

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// BkSync - binary delta synchronization
#[derive(Parser, Debug)]
#[command(name = "bksync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the configuration file named on the command line, or the default one
    pub fn load_config(&self) -> crate::Result<Config> {
        match self.config_file {
            Some(ref path) => Config::load_from(path),
            None => Config::load(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a signature file for a base file
    Sign(SignArgs),

    /// Compute a BD delta file
    Delta(DeltaArgs),

    /// Rebuild a file from a BD delta and its base
    Patch(PatchArgs),

    /// Verify a BD delta file and describe its contents
    Inspect(InspectArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the sign command
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Base file to generate a signature for
    pub file: PathBuf,

    /// Output signature file path (default: <file>.sign)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Block size, e.g. 4096 or 64K [default: derived from the file size]
    #[arg(long, value_parser = parse_size_arg)]
    pub block_size: Option<usize>,
}

/// Arguments for the delta command
#[derive(Parser, Debug)]
pub struct DeltaArgs {
    /// New version of the file
    pub new_file: PathBuf,

    /// Base file the receiver already holds
    #[arg(required_unless_present = "signature", conflicts_with = "signature")]
    pub base_file: Option<PathBuf>,

    /// Compute against a signature file instead of the base file
    #[arg(long)]
    pub signature: Option<PathBuf>,

    /// Key of the new file recorded in the delta [default: new file name]
    #[arg(long)]
    pub src: Option<String>,

    /// Key of the base file recorded in the delta [default: base file name]
    #[arg(long)]
    pub dest: Option<String>,

    /// Output delta file path (default: <new_file>.bd)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Minimum fraction of the new file to reuse from the base
    #[arg(long)]
    pub min_ratio: Option<f64>,

    /// Block size, e.g. 4096 or 64K [default: derived from the base size]
    #[arg(long, value_parser = parse_size_arg)]
    pub block_size: Option<usize>,

    /// Directory for temporary files
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Exit with an error when the reuse rate is below the threshold
    #[arg(long)]
    pub strict: bool,
}

impl DeltaArgs {
    /// Merge command line overrides into the file configuration
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ratio) = self.min_ratio {
            config.min_match_ratio = ratio;
        }
        if let Some(size) = self.block_size {
            config.block_size = Some(size);
        }
        if let Some(ref dir) = self.work_dir {
            config.work_dir = Some(dir.clone());
        }
    }
}

/// Arguments for the patch command
#[derive(Parser, Debug)]
pub struct PatchArgs {
    /// BD delta file
    pub delta_file: PathBuf,

    /// Base file the delta was computed against
    pub base_file: PathBuf,

    /// Output file path (default: the delta path without its .bd extension, which must not exist yet)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for temporary files
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// BD delta file
    pub delta_file: PathBuf,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show the configuration file path
    #[arg(long)]
    pub path: bool,

    /// Create default configuration file
    #[arg(long)]
    pub init: bool,
}

fn parse_size_arg(s: &str) -> Result<usize, String> {
    let bytes = Config::parse_size(s).map_err(|e| e.to_string())?;
    match usize::try_from(bytes) {
        Ok(0) | Err(_) => Err(format!("invalid block size: {}", s)),
        Ok(size) => Ok(size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_delta_args() {
        let cli = Cli::try_parse_from([
            "bksync", "-vv", "delta", "new.bin", "old.bin", "--src", "k1", "--min-ratio", "0.5",
            "--block-size", "64K",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let Commands::Delta(args) = cli.command else {
            panic!("expected delta command");
        };
        assert_eq!(args.base_file, Some(PathBuf::from("old.bin")));
        assert_eq!(args.src.as_deref(), Some("k1"));
        assert_eq!(args.block_size, Some(64 * 1024));

        let mut config = Config::default();
        args.apply_to(&mut config);
        assert_eq!(config.min_match_ratio, 0.5);
        assert_eq!(config.block_size, Some(65536));
    }

    #[test]
    fn test_delta_needs_base_or_signature() {
        assert!(Cli::try_parse_from(["bksync", "delta", "new.bin"]).is_err());
        assert!(Cli::try_parse_from(["bksync", "delta", "new.bin", "--signature", "s.sign"]).is_ok());
        assert!(
            Cli::try_parse_from(["bksync", "delta", "new.bin", "old.bin", "--signature", "s.sign"])
                .is_err()
        );
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(Cli::try_parse_from(["bksync", "sign", "f", "--block-size", "0"]).is_err());
    }
}
