use sim::models::Reportable;
use sim::simulator::Simulation;
use std::fs::File;
use std::io::{self, BufWriter, Result};

use super::config::{AppConfig, WorkloadSpec};
use super::sim::model::open_trace;
use super::sim::shell::{Command, Shell};
use super::sim::{inject_message, model_step, StepMode};
use super::utils::log::set_quiet;
use super::utils::report::{print_simulation_records, print_suite_report, RunReport};
use super::verify::{compare_results, reference_gemm, Workload};
use crate::arch::gemm::decoder::GemmInst;
use crate::arch::gemm::model::{InstReq, MemReq, MmioReq};
use crate::arch::gemm::regs::{CTRL_IRQ_EN, REG_CTRL};
use crate::arch::gemm::{create_simulation, pack_config_blocks, Dram, DramParams, GemmAccel, GemmConfig};
use crate::driver::{GemmDriver, SimBus};

const REGION_ALIGN: u64 = 64;

fn align_up(addr: u64) -> u64 {
  (addr + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}

/// External-memory placement of one workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
  pub a_addr: u64,
  pub b_addr: u64,
  pub c_addr: u64,
  /// First free byte after C
  pub end: u64,
}

impl Layout {
  /// Packed A, B and C back to back from `base`, each on a 64-byte boundary.
  pub fn new(base: u64, spec: &WorkloadSpec) -> Self {
    let (m, k, n) = (spec.m as u64, spec.k as u64, spec.n as u64);
    let eb = spec.data_type.bytes() as u64;
    let a_addr = align_up(base);
    let b_addr = align_up(a_addr + m * k * eb);
    let c_addr = align_up(b_addr + k * n * eb);
    Self {
      a_addr,
      b_addr,
      c_addr,
      end: c_addr + m * n * 4,
    }
  }

  pub fn gemm_config(&self, spec: &WorkloadSpec) -> GemmConfig {
    GemmConfig::new(
      self.a_addr as u32,
      self.b_addr as u32,
      self.c_addr as u32,
      spec.m,
      spec.k,
      spec.n,
      spec.data_type,
    )
  }
}

pub struct Simulator {
  config: AppConfig,
}

impl Simulator {
  pub fn new(config: AppConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  pub fn run(&mut self) -> Result<()> {
    set_quiet(self.config.simulation.quiet);

    match StepMode::from_flag(self.config.simulation.step_mode) {
      StepMode::Step => self.run_step_mode(),
      StepMode::Continuous => {
        let reports = self.run_suite();
        print_suite_report(&reports);
        let failed = reports.iter().filter(|r| !r.passed()).count();
        if failed > 0 {
          return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} of {} workloads failed", failed, reports.len()),
          ));
        }
        Ok(())
      },
    }
  }

  pub fn run_suite(&self) -> Vec<RunReport> {
    self.config.workload.iter().map(|w| self.run_workload(w)).collect()
  }

  /// One workload through the driver on a fresh device and memory.
  pub fn run_workload(&self, spec: &WorkloadSpec) -> RunReport {
    let data = Workload::random(spec.m as usize, spec.k as usize, spec.n as usize, spec.data_type, spec.seed);
    let mut report = RunReport {
      workload: spec.clone(),
      cycles: 0,
      ops: data.ops(),
      latency_us: 0.0,
      gops: 0.0,
      mismatches: 0,
      error: None,
    };

    match self.drive(spec, &data) {
      Ok((cycles, hw)) => {
        let reference = reference_gemm(&data.a, &data.b, data.m, data.k, data.n, data.k, data.n);
        let mismatches = compare_results(&hw, &reference);
        for (idx, got, want) in mismatches.iter().take(8) {
          log::warn!("{}: C[{}][{}] = {}, expected {}", spec.name, idx / data.n, idx % data.n, got, want);
        }
        report.cycles = cycles;
        report.mismatches = mismatches.len();
        report.latency_us = cycles as f64 / self.config.simulation.clock_mhz;
        if report.latency_us > 0.0 {
          report.gops = report.ops as f64 / (report.latency_us * 1e3);
        }
      },
      Err(e) => {
        log::error!("{}: {}", spec.name, e);
        report.error = Some(e);
      },
    }

    log::info!(
      "{}: {}x{}x{} {} cycles={} {}",
      spec.name,
      spec.m,
      spec.k,
      spec.n,
      spec.data_type,
      report.cycles,
      if report.passed() { "PASS" } else { "FAIL" }
    );
    report
  }

  fn new_dram(&self) -> Dram {
    let accel = &self.config.accel;
    Dram::new(accel.dram_base, accel.dram_size).with_ack_latency(accel.mem_ack_latency)
  }

  fn drive(&self, spec: &WorkloadSpec, data: &Workload) -> std::result::Result<(u64, Vec<i32>), String> {
    let layout = Layout::new(self.config.accel.dram_base, spec);
    let mut dram = self.new_dram();
    if !dram.load_matrix(layout.a_addr, data.m, data.k, data.k, data.data_type, &data.a)
      || !dram.load_matrix(layout.b_addr, data.k, data.n, data.n, data.data_type, &data.b)
    {
      return Err("operands do not fit in external memory".to_string());
    }

    let bus = SimBus::new(GemmAccel::new(self.config.accel.params()), dram);
    let mut driver = GemmDriver::new(bus, self.config.simulation.watchdog_cycles);

    let run = |driver: &mut GemmDriver<SimBus>| -> crate::driver::Result<u64> {
      driver.init()?;
      driver.start(&layout.gemm_config(spec))?;
      driver.wait()
    };
    let cycles = run(&mut driver).map_err(|e| e.to_string())?;

    let hw = driver
      .bus()
      .dram()
      .read_matrix_i32(layout.c_addr, data.m, data.n, data.n)
      .ok_or_else(|| "result matrix out of range".to_string())?;
    Ok((cycles, hw))
  }

  /// Build the DEVS system with `spec` staged through the host ports: operands
  /// and config blocks written to memory, interrupts enabled, then the custom
  /// instruction issued.
  pub fn prepare_devs(&self, spec: &WorkloadSpec) -> Result<Simulation> {
    let accel = &self.config.accel;
    let mut simulation = create_simulation(
      accel.params(),
      DramParams {
        base: accel.dram_base,
        size: accel.dram_size,
        ack_latency: accel.mem_ack_latency,
      },
    );

    let data = Workload::random(spec.m as usize, spec.k as usize, spec.n as usize, spec.data_type, spec.seed);
    let layout = Layout::new(accel.dram_base, spec);
    let (block1, block2) = pack_config_blocks(&layout.gemm_config(spec));
    let xs1 = align_up(layout.end);
    let xs2 = xs1 + 16;

    let writes = [
      MemReq::Write {
        addr: layout.a_addr,
        elem_bytes: spec.data_type.bytes(),
        values: data.a,
      },
      MemReq::Write {
        addr: layout.b_addr,
        elem_bytes: spec.data_type.bytes(),
        values: data.b,
      },
      MemReq::Write {
        addr: xs1,
        elem_bytes: 4,
        values: block1.iter().chain(block2.iter()).map(|w| *w as i32).collect(),
      },
    ];
    for req in writes {
      inject_message(&mut simulation, "gemm", None, None, Some("mem"), &to_json(&req)?);
    }

    let enable = MmioReq::Write {
      offset: REG_CTRL,
      value: CTRL_IRQ_EN,
    };
    inject_message(&mut simulation, "gemm", None, None, Some("mmio"), &to_json(&enable)?);

    let inst = InstReq {
      raw: GemmInst::new(10, 11, 12).encode(),
      xs1,
      xs2,
    };
    inject_message(&mut simulation, "gemm", None, None, Some("inst"), &to_json(&inst)?);

    log::info!("devs: staged {} at a={:#x} b={:#x} c={:#x}", spec.name, layout.a_addr, layout.b_addr, layout.c_addr);
    Ok(simulation)
  }

  /// Step until every model is passive, bounded by the watchdog. Returns the
  /// number of steps taken.
  pub fn run_devs(&self, simulation: &mut Simulation, trace: &mut Option<BufWriter<File>>) -> Result<u64> {
    let limit = self.config.simulation.watchdog_cycles;
    let mut steps = 0;
    while model_step(simulation, trace)? {
      steps += 1;
      if steps >= limit {
        return Err(io::Error::new(
          io::ErrorKind::TimedOut,
          format!("simulation still active after {} steps", steps),
        ));
      }
    }
    Ok(steps)
  }

  /// Ask the model for the packed C of `spec` and return what the host received.
  pub fn read_back_devs(&self, simulation: &mut Simulation, spec: &WorkloadSpec) -> Result<Vec<i32>> {
    let layout = Layout::new(self.config.accel.dram_base, spec);
    let req = MemReq::Read {
      addr: layout.c_addr,
      words: spec.m as usize * spec.n as usize,
    };
    inject_message(simulation, "gemm", None, None, Some("mem"), &to_json(&req)?);
    self.run_devs(simulation, &mut None)?;

    let models = simulation.models();
    let content = models
      .iter()
      .filter(|model| model.id() == "host")
      .flat_map(|model| model.records().iter())
      .filter(|record| record.action == "mem_resp")
      .map(|record| record.subject.clone())
      .last()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no mem_resp reached the host"))?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
  }

  fn run_step_mode(&self) -> Result<()> {
    let Some(spec) = self.config.workload.first() else {
      return Err(io::Error::new(io::ErrorKind::InvalidInput, "step mode needs a workload"));
    };
    let mut simulation = self.prepare_devs(spec)?;
    let mut trace = open_trace(&self.config.simulation.trace_file)?;
    let mut shell = Shell::new()?;

    println!("Step mode: Enter steps once, 'si N' steps N times, 'c' runs to completion, 'q' quits\n");
    'shell: loop {
      match shell.read_command()? {
        Command::Quit => break,
        Command::Step(n) => {
          for _ in 0..n {
            if !model_step(&mut simulation, &mut trace)? {
              println!("All models passive at t={:.1}", simulation.get_global_time());
              break 'shell;
            }
          }
        },
        Command::Continue => {
          self.run_devs(&mut simulation, &mut trace)?;
          println!("All models passive at t={:.1}", simulation.get_global_time());
          break;
        },
      }
    }

    print_simulation_records(&mut simulation);
    Ok(())
  }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
  serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemm::DataType;

  fn spec(m: u16, k: u16, n: u16, data_type: DataType) -> WorkloadSpec {
    WorkloadSpec {
      name: format!("t{}x{}x{}", m, k, n),
      m,
      k,
      n,
      data_type,
      seed: 42,
    }
  }

  #[test]
  fn test_layout_is_aligned() {
    let layout = Layout::new(0x1000, &spec(3, 5, 7, DataType::Int16));
    assert_eq!(layout.a_addr, 0x1000);
    assert_eq!(layout.b_addr, 0x1040);
    assert_eq!(layout.c_addr, 0x1080);
    assert_eq!(layout.end, 0x1080 + 3 * 7 * 4);
    assert_eq!(Layout::new(0x1001, &spec(1, 1, 1, DataType::Int8)).a_addr, 0x1040);
  }

  #[test]
  fn test_run_workload_passes() {
    let sim = Simulator::new(AppConfig::default());
    let report = sim.run_workload(&spec(8, 8, 8, DataType::Int8));
    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.ops, 1024);
    assert!(report.cycles > 0);
    assert!(report.gops > 0.0);
  }

  #[test]
  fn test_run_workload_reports_timeout() {
    let mut config = AppConfig::default();
    config.simulation.watchdog_cycles = 10;
    let report = Simulator::new(config).run_workload(&spec(8, 8, 8, DataType::Int8));
    assert!(!report.passed());
    assert!(report.error.is_some());
  }
}
