use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::arch::gemm::params::{AccelParams, DataType, MAX_BURST, MAX_DIM};

/// Simulation section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default = "default_clock_mhz")]
  pub clock_mhz: f64,
  #[serde(default = "default_watchdog_cycles")]
  pub watchdog_cycles: u64,
}

fn default_clock_mhz() -> f64 {
  100.0
}

fn default_watchdog_cycles() -> u64 {
  1_000_000
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      clock_mhz: default_clock_mhz(),
      watchdog_cycles: default_watchdog_cycles(),
    }
  }
}

/// Accelerator and external memory section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccelSection {
  #[serde(default = "default_max_burst")]
  pub max_burst: usize,
  #[serde(default)]
  pub mem_ack_latency: u32,
  #[serde(default)]
  pub pingpong: bool,
  #[serde(default = "default_dram_base")]
  pub dram_base: u64,
  #[serde(default = "default_dram_size")]
  pub dram_size: usize,
}

fn default_max_burst() -> usize {
  MAX_BURST
}

fn default_dram_base() -> u64 {
  0x8000_0000
}

fn default_dram_size() -> usize {
  0x4_0000
}

impl Default for AccelSection {
  fn default() -> Self {
    Self {
      max_burst: default_max_burst(),
      mem_ack_latency: 0,
      pingpong: false,
      dram_base: default_dram_base(),
      dram_size: default_dram_size(),
    }
  }
}

impl AccelSection {
  pub fn params(&self) -> AccelParams {
    AccelParams {
      max_burst: self.max_burst,
      pingpong: self.pingpong,
    }
  }
}

/// One GEMM in the verification suite
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkloadSpec {
  pub name: String,
  pub m: u16,
  pub k: u16,
  pub n: u16,
  #[serde(default)]
  pub data_type: DataType,
  #[serde(default)]
  pub seed: u64,
}

impl WorkloadSpec {
  /// Bytes of external memory the three matrices occupy, packed.
  pub fn footprint(&self) -> usize {
    let (m, k, n) = (self.m as usize, self.k as usize, self.n as usize);
    let eb = self.data_type.bytes();
    m * k * eb + k * n * eb + m * n * 4
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub simulation: SimulationSection,
  #[serde(default)]
  pub accel: AccelSection,
  #[serde(default)]
  pub workload: Vec<WorkloadSpec>,
}

/// Command line values that take precedence over every file and variable.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  /// Replaces the configured suite with this single workload
  pub workload: Option<WorkloadSpec>,
}

fn default_config_path() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("src")
    .join("simulator")
    .join("config")
    .join("default.toml")
}

/// Load the shipped default.toml
pub fn load_default_config() -> io::Result<AppConfig> {
  load_config_file(&default_config_path())
}

/// Parse one TOML file with no layering
pub fn load_config_file(path: &Path) -> io::Result<AppConfig> {
  let content = fs::read_to_string(path)
    .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("cannot read config file {:?}: {}", path, e)))?;

  toml::from_str::<AppConfig>(&content)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid TOML config: {}", e)))
}

/// Stack default.toml, an optional user file and GEMMSIM__* environment variables.
pub fn load_layered(custom_config_path: Option<&Path>) -> io::Result<AppConfig> {
  let defaults = fs::read_to_string(default_config_path())?;
  let mut builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

  if let Some(path) = custom_config_path {
    builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
  }

  builder
    .add_source(Environment::with_prefix("GEMMSIM").separator("__").try_parsing(true))
    .build()
    .and_then(|c| c.try_deserialize::<AppConfig>())
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("config error: {}", e)))
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(workload) = &cli.workload {
    config.workload = vec![workload.clone()];
  }
}

fn invalid(msg: String) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg)
}

pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  let sim = &config.simulation;
  if !(sim.clock_mhz > 0.0) {
    return Err(invalid(format!("clock_mhz must be positive, got {}", sim.clock_mhz)));
  }
  if sim.watchdog_cycles == 0 {
    return Err(invalid("watchdog_cycles must be positive".to_string()));
  }

  let accel = &config.accel;
  if accel.max_burst == 0 || accel.max_burst > MAX_BURST {
    return Err(invalid(format!("max_burst must be in 1..={}, got {}", MAX_BURST, accel.max_burst)));
  }
  if accel.dram_size == 0 || accel.dram_base + accel.dram_size as u64 > 1 << 32 {
    return Err(invalid(format!(
      "dram window {:#x}+{:#x} must be non-empty and inside 32-bit address space",
      accel.dram_base, accel.dram_size
    )));
  }

  for w in &config.workload {
    for (name, dim) in [("m", w.m), ("k", w.k), ("n", w.n)] {
      if dim == 0 || dim as usize > MAX_DIM {
        return Err(invalid(format!("workload '{}': {} = {} outside 1..={}", w.name, name, dim, MAX_DIM)));
      }
    }
    // Three regions, each padded to 64 bytes
    if w.footprint() + 3 * 64 > accel.dram_size {
      return Err(invalid(format!(
        "workload '{}' needs {} bytes, dram_size is {}",
        w.name,
        w.footprint(),
        accel.dram_size
      )));
    }
  }

  Ok(())
}

/// Load and merge configs
///
/// Order:
/// 1. default.toml
/// 2. custom config file, if any
/// 3. GEMMSIM__SECTION__KEY environment variables
/// 4. CLI overrides
/// 5. validation
pub fn load_and_merge_configs(custom_config_path: Option<&str>, cli: &CliOverrides) -> io::Result<AppConfig> {
  let mut config = load_layered(custom_config_path.map(Path::new))?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
