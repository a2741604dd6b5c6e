use env_logger::{Builder, Env};
use log::LevelFilter;

/// Install the global logger. RUST_LOG overrides the default `info` level.
/// Safe to call more than once.
pub fn init_log() {
  let _ = Builder::from_env(Env::default().default_filter_or("info"))
    .format_timestamp(None)
    .try_init();
}

/// Quiet mode keeps warnings and errors only.
pub fn set_quiet(quiet: bool) {
  if quiet {
    log::set_max_level(LevelFilter::Warn);
  }
}
