use sim::models::Model;
use sim::simulator::{Connector, Simulation};

use super::accel::GemmAccel;
use super::dram::Dram;
use super::model::{GemmModel, GemmPorts, HostModel};
use super::params::AccelParams;

/// Where the external memory sits and how slow it acknowledges.
#[derive(Debug, Clone, Copy)]
pub struct DramParams {
  pub base: u64,
  pub size: usize,
  pub ack_latency: u32,
}

impl Default for DramParams {
  fn default() -> Self {
    Self {
      base: 0,
      size: 1 << 20,
      ack_latency: 0,
    }
  }
}

pub fn create_simulation(params: AccelParams, dram: DramParams) -> Simulation {
  let ports = GemmPorts::default();

  let models = vec![
    Model::new(
      String::from("gemm"),
      Box::new(GemmModel::new(
        ports.clone(),
        GemmAccel::new(params),
        Dram::new(dram.base, dram.size).with_ack_latency(dram.ack_latency),
      )),
    ),
    Model::new(String::from("host"), Box::new(HostModel::new())),
  ];

  // Responses and the interrupt line all land on the host under the same port name
  let connectors = [&ports.mmio_resp, &ports.inst_resp, &ports.mem_resp, &ports.irq]
    .into_iter()
    .map(|port| {
      Connector::new(
        format!("gemm_host_{}", port),
        String::from("gemm"),
        String::from("host"),
        port.clone(),
        port.clone(),
      )
    })
    .collect();

  Simulation::post(models, connectors)
}
