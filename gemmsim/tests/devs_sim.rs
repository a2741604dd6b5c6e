use gemmsim::arch::gemm::decoder::GemmInst;
use gemmsim::arch::gemm::{pack_config_blocks, Dram, ExtMem, GemmAccel, GemmConfig};
use gemmsim::simulator::config::config::load_default_config;
use gemmsim::simulator::config::{AppConfig, WorkloadSpec};
use gemmsim::simulator::utils::log::init_log;
use gemmsim::simulator::verify::{reference_gemm, Workload};
use gemmsim::simulator::Simulator;
use gemmsim::DataType;
use sim::models::Reportable;
use std::sync::Mutex;

static TEST_MUTEX: Mutex<()> = Mutex::new(());

fn spec(name: &str, m: u16, k: u16, n: u16, data_type: DataType, seed: u64) -> WorkloadSpec {
  WorkloadSpec {
    name: name.to_string(),
    m,
    k,
    n,
    data_type,
    seed,
  }
}

/// Stage through the host ports, run to quiescence, read C back over the mem port.
fn run_devs(spec: &WorkloadSpec) {
  let simulator = Simulator::new(AppConfig::default());
  let mut simulation = simulator.prepare_devs(spec).expect("staging succeeds");
  let steps = simulator.run_devs(&mut simulation, &mut None).expect("simulation settles");
  assert!(steps > 0);

  let irqs = simulation
    .models()
    .iter()
    .filter(|model| model.id() == "host")
    .flat_map(|model| model.records().iter())
    .filter(|record| record.action == "irq")
    .count();
  assert_eq!(irqs, 1);

  let hw = simulator.read_back_devs(&mut simulation, spec).expect("C reaches the host");
  let data = Workload::random(spec.m as usize, spec.k as usize, spec.n as usize, spec.data_type, spec.seed);
  let (m, k, n) = (data.m, data.k, data.n);
  assert_eq!(hw, reference_gemm(&data.a, &data.b, m, k, n, k, n));
}

macro_rules! test_case {
  ($name:ident, $m:literal, $k:literal, $n:literal, $dtype:expr) => {
    #[test]
    fn $name() {
      let _guard = TEST_MUTEX.lock().unwrap();
      init_log();
      run_devs(&spec(stringify!($name), $m, $k, $n, $dtype, 7));
    }
  };
}

test_case!(devs_8x8x8_int8, 8, 8, 8, DataType::Int8);
test_case!(devs_6x11x5_int16, 6, 11, 5, DataType::Int16);

#[test]
fn instruction_path_without_driver() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();
  let data = Workload::random(8, 8, 8, DataType::Int8, 3);
  let cfg = GemmConfig::new(0x0, 0x100, 0x200, 8, 8, 8, DataType::Int8);
  let (block1, block2) = pack_config_blocks(&cfg);

  let mut dram = Dram::new(0, 0x1000);
  assert!(dram.load_matrix(0x0, 8, 8, 8, DataType::Int8, &data.a));
  assert!(dram.load_matrix(0x100, 8, 8, 8, DataType::Int8, &data.b));
  for (i, word) in block1.iter().enumerate() {
    assert!(dram.write(0x800 + 4 * i as u64, 4, *word));
  }
  for (i, word) in block2.iter().enumerate() {
    assert!(dram.write(0x900 + 4 * i as u64, 4, *word));
  }

  let mut accel = GemmAccel::default();
  let rd = accel.execute(&GemmInst::new(5, 10, 11), 0x800, 0x900, &mut dram);
  assert_eq!(rd, 0x200);
  assert!(accel.is_busy());

  let mut cycles = 0;
  while accel.is_busy() && cycles < 100_000 {
    accel.tick(&mut dram);
    cycles += 1;
  }
  assert!(!accel.is_busy());
  assert!(accel.status().done);

  let hw = dram.read_matrix_i32(0x200, 8, 8, 8).expect("C in range");
  assert_eq!(hw, reference_gemm(&data.a, &data.b, 8, 8, 8, 8, 8));
}

#[test]
fn default_suite_small_cases_pass() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();
  let mut config = load_default_config().expect("default config");
  config.workload.retain(|w| w.m <= 16);
  assert!(!config.workload.is_empty());

  let reports = Simulator::new(config).run_suite();
  for report in &reports {
    assert!(report.passed(), "{:?}", report);
  }
}

#[test]
#[cfg(feature = "long-tests")]
fn default_suite_passes() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();
  let config = load_default_config().expect("default config");
  let reports = Simulator::new(config).run_suite();
  assert_eq!(reports.len(), 8);
  for report in &reports {
    assert!(report.passed(), "{:?}", report);
  }
}
