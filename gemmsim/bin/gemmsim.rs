use clap::Parser;
use gemmsim::simulator::config::{load_and_merge_configs, CliOverrides, WorkloadSpec};
use gemmsim::simulator::utils::log::init_log;
use gemmsim::simulator::Simulator;
use gemmsim::DataType;

/// gemmsim - cycle-stepped GEMM accelerator simulator
#[derive(Parser, Debug)]
#[command(name = "gemmsim")]
#[command(version = "0.1.0")]
#[command(about = "Tiled GEMM accelerator model with driver and verification suite", long_about = None)]
struct Args {
  /// Config file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<String>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (warnings and errors only)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Rows of A and C; with --k and --n replaces the configured suite
  #[arg(long, requires_all = ["k", "n"])]
  m: Option<u16>,

  #[arg(long, requires_all = ["m", "n"])]
  k: Option<u16>,

  #[arg(long, requires_all = ["m", "k"])]
  n: Option<u16>,

  /// Element type of the ad-hoc workload: int8 or int16
  #[arg(long, default_value = "int8")]
  dtype: String,

  /// Seed of the ad-hoc workload
  #[arg(long, default_value_t = 1)]
  seed: u64,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  let data_type = match args.dtype.to_lowercase().as_str() {
    "int8" => DataType::Int8,
    "int16" => DataType::Int16,
    _ => {
      return Err(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("Unknown data type: {}", args.dtype),
      ));
    },
  };

  let workload = match (args.m, args.k, args.n) {
    (Some(m), Some(k), Some(n)) => Some(WorkloadSpec {
      name: format!("cli_{}x{}x{}", m, k, n),
      m,
      k,
      n,
      data_type,
      seed: args.seed,
    }),
    _ => None,
  };

  let cli = CliOverrides {
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file,
    workload,
  };

  let config = load_and_merge_configs(args.config.as_deref(), &cli)?;
  let mut simulator = Simulator::new(config);

  simulator.run()
}
