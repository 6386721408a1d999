mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::GlobalArgs;
use output::{OutputFormat, print_error};

/// kiln - build, install and test packages from declarative descriptors
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Install prefix (overrides config and KILN_PREFIX)
  #[arg(long, global = true, value_name = "DIR")]
  prefix: Option<PathBuf>,

  /// Configuration file (default: $XDG_CONFIG_HOME/kiln/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build, install and self-test a package descriptor
  Install {
    /// Path to the descriptor file
    descriptor: PathBuf,

    /// Source download timeout (seconds, or a duration like "2m")
    #[arg(long, value_name = "SECS", value_parser = cmd::parse_timeout)]
    fetch_timeout: Option<Duration>,

    /// Per-command timeout for build steps and the self-test
    #[arg(long, value_name = "SECS", value_parser = cmd::parse_timeout)]
    command_timeout: Option<Duration>,
  },

  /// Re-run the self-test of an installed package
  Test {
    /// Package name
    name: String,
  },

  /// Remove an installed package
  Uninstall {
    /// Package name
    name: String,

    /// Remove even if installed packages depend on it
    #[arg(short, long)]
    force: bool,
  },

  /// List installed packages
  List,

  /// Show details of an installed package
  Info {
    /// Package name
    name: String,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let global = GlobalArgs {
    prefix: cli.prefix,
    config: cli.config,
    output: cli.output,
    verbose: cli.verbose,
  };

  let result = match cli.command {
    Commands::Install {
      descriptor,
      fetch_timeout,
      command_timeout,
    } => cmd::cmd_install(&descriptor, fetch_timeout, command_timeout, &global),
    Commands::Test { name } => cmd::cmd_test(&name, &global),
    Commands::Uninstall { name, force } => cmd::cmd_uninstall(&name, force, &global),
    Commands::List => cmd::cmd_list(&global),
    Commands::Info { name } => cmd::cmd_info(&name, &global),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

/// Logs go to stderr so `--output json` stays machine-readable.
fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
