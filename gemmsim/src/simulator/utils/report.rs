use sim::models::{Model, Reportable};
use sim::simulator::Simulation;

use crate::simulator::config::WorkloadSpec;

pub fn print_simulation_records(simulation: &mut Simulation) {
  println!("\n--- Simulation Records ---");

  for model in simulation.models().iter() {
    print_model_records(model);
  }

  println!("--- End Records ---\n");
}

fn print_model_records(model: &Model) {
  let records = model.records();
  if records.is_empty() {
    return;
  }
  println!("\n[{}] {}", model.id(), model.status());
  for record in records {
    println!("  Time {:.1}: {} {}", record.time, record.action, record.subject);
  }
}

/// Outcome of one suite workload
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
  pub workload: WorkloadSpec,
  pub cycles: u64,
  pub ops: u64,
  pub latency_us: f64,
  pub gops: f64,
  pub mismatches: usize,
  pub error: Option<String>,
}

impl RunReport {
  pub fn passed(&self) -> bool {
    self.error.is_none() && self.mismatches == 0
  }
}

pub fn print_suite_report(reports: &[RunReport]) {
  println!(
    "\n{:<14} {:>4} {:>4} {:>4} {:>6} {:>10} {:>11} {:>8}  result",
    "workload", "m", "k", "n", "type", "cycles", "latency_us", "GOPS"
  );
  for r in reports {
    let w = &r.workload;
    let result = match &r.error {
      Some(e) => format!("FAIL ({})", e),
      None if r.mismatches > 0 => format!("FAIL ({} mismatches)", r.mismatches),
      None => "PASS".to_string(),
    };
    println!(
      "{:<14} {:>4} {:>4} {:>4} {:>6} {:>10} {:>11.2} {:>8.3}  {}",
      w.name,
      w.m,
      w.k,
      w.n,
      w.data_type.to_string(),
      r.cycles,
      r.latency_us,
      r.gops,
      result
    );
  }
  let passed = reports.iter().filter(|r| r.passed()).count();
  println!("\n{}/{} workloads passed\n", passed, reports.len());
}
