use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::accel::GemmAccel;
use super::decoder::decode;
use super::dram::{Dram, ExtMem};
use crate::model_record;

/// Host -> accelerator register access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MmioReq {
  Read { offset: u32 },
  Write { offset: u32, value: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmioResp {
  pub offset: u32,
  pub value: u32,
}

/// A raw custom instruction with its two source register values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstReq {
  pub raw: u32,
  pub xs1: u64,
  pub xs2: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstResp {
  pub rd: u8,
  pub value: u64,
}

/// Host-side backdoor into external memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MemReq {
  Write { addr: u64, elem_bytes: usize, values: Vec<i32> },
  Read { addr: u64, words: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqEvent {
  pub cycle: u64,
  pub status: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GemmPorts {
  pub mmio: String,
  pub inst: String,
  pub mem: String,
  pub mmio_resp: String,
  pub inst_resp: String,
  pub mem_resp: String,
  pub irq: String,
}

impl Default for GemmPorts {
  fn default() -> Self {
    Self {
      mmio: String::from("mmio"),
      inst: String::from("inst"),
      mem: String::from("mem"),
      mmio_resp: String::from("mmio_resp"),
      inst_resp: String::from("inst_resp"),
      mem_resp: String::from("mem_resp"),
      irq: String::from("irq"),
    }
  }
}

/// DEVS wrapper: one time unit is one accelerator clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GemmModel {
  ports: GemmPorts,
  accel: GemmAccel,
  dram: Dram,
  // (port, content) pairs waiting for the next internal event
  outbox: Vec<(String, String)>,
  until_tick: f64,
  records: Vec<ModelRecord>,
}

impl GemmModel {
  pub fn new(ports: GemmPorts, accel: GemmAccel, dram: Dram) -> Self {
    Self {
      ports,
      accel,
      dram,
      outbox: Vec::new(),
      until_tick: INFINITY,
      records: Vec::new(),
    }
  }

  fn post<T: Serialize>(&mut self, port: String, payload: &T) -> Result<(), SimulationError> {
    let content = serde_json::to_string(payload).map_err(|_| SimulationError::InvalidModelState)?;
    self.outbox.push((port, content));
    Ok(())
  }

  fn schedule_clock(&mut self) {
    if self.accel.is_busy() {
      if self.until_tick == INFINITY {
        self.until_tick = 1.0;
      }
    } else {
      self.until_tick = INFINITY;
    }
  }

  fn handle_mmio(&mut self, req: MmioReq, services: &Services) -> Result<(), SimulationError> {
    match req {
      MmioReq::Read { offset } => {
        let value = self.accel.mmio_read(offset);
        self.post(self.ports.mmio_resp.clone(), &MmioResp { offset, value })?;
      },
      MmioReq::Write { offset, value } => {
        self.accel.mmio_write(offset, value);
        model_record!(self, services, "mmio_write", format!("{:#x} <- {:#x}", offset, value));
      },
    }
    Ok(())
  }

  fn handle_inst(&mut self, req: InstReq, services: &Services) -> Result<(), SimulationError> {
    let Some(inst) = decode(req.raw) else {
      log::warn!("gemm model: unrecognized instruction {:#010x}", req.raw);
      return Err(SimulationError::InvalidModelState);
    };
    let value = self.accel.execute(&inst, req.xs1, req.xs2, &mut self.dram);
    model_record!(self, services, "execute", format!("{:?} -> {:#x}", inst, value));
    self.post(self.ports.inst_resp.clone(), &InstResp { rd: inst.rd, value })
  }

  fn handle_mem(&mut self, req: MemReq) -> Result<(), SimulationError> {
    match req {
      MemReq::Write {
        addr,
        elem_bytes,
        values,
      } => {
        for (i, v) in values.iter().enumerate() {
          let a = addr + (i * elem_bytes) as u64;
          if !self.dram.write(a, elem_bytes, *v as u32) {
            log::error!("gemm model: backdoor write out of range at {:#x}", a);
            return Err(SimulationError::InvalidModelState);
          }
        }
      },
      MemReq::Read { addr, words } => {
        let values = self
          .dram
          .read_matrix_i32(addr, 1, words, words)
          .ok_or(SimulationError::InvalidModelState)?;
        self.post(self.ports.mem_resp.clone(), &values)?;
      },
    }
    Ok(())
  }
}

fn parse<'a, T: Deserialize<'a>>(content: &'a str) -> Result<T, SimulationError> {
  serde_json::from_str(content).map_err(|e| {
    log::error!("gemm model: bad message {:?}: {}", content, e);
    SimulationError::InvalidModelState
  })
}

impl DevsModel for GemmModel {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let port = incoming_message.port_name.as_str();
    let content = incoming_message.content.as_str();

    if port == self.ports.mmio {
      self.handle_mmio(parse(content)?, services)?;
    } else if port == self.ports.inst {
      self.handle_inst(parse(content)?, services)?;
    } else if port == self.ports.mem {
      self.handle_mem(parse(content)?)?;
    } else {
      log::warn!("gemm model: message on unknown port {}", port);
      return Err(SimulationError::InvalidModelState);
    }

    // A start or an enable write can raise the interrupt without a clock
    if self.accel.take_irq() {
      let status = self.accel.status().bits();
      self.post(self.ports.irq.clone(), &IrqEvent { cycle: self.accel.cycle(), status })?;
    }
    self.schedule_clock();
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    if self.until_tick <= 0.0 {
      self.accel.tick(&mut self.dram);
      self.until_tick = INFINITY;

      if self.accel.take_irq() {
        let status = self.accel.status().bits();
        self.post(self.ports.irq.clone(), &IrqEvent { cycle: self.accel.cycle(), status })?;
        model_record!(self, services, "irq", format!("cycle={}", self.accel.cycle()));
      }
      if !self.accel.is_busy() {
        model_record!(
          self,
          services,
          "idle",
          format!("status={:#x} cycles={}", self.accel.status().bits(), self.accel.cycle())
        );
      }
      self.schedule_clock();
    }

    Ok(
      self
        .outbox
        .drain(..)
        .map(|(port_name, content)| ModelMessage { content, port_name })
        .collect(),
    )
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_tick -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    if !self.outbox.is_empty() {
      return 0.0;
    }
    self.until_tick
  }
}

impl Reportable for GemmModel {
  fn status(&self) -> String {
    format!("state={:?} cycle={}", self.accel.state(), self.accel.cycle())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for GemmModel {}

impl SerializableModel for GemmModel {
  fn get_type(&self) -> &'static str {
    "GemmModel"
  }
}

/// Host-side sink: records every response and interrupt it receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostModel {
  irq_count: u64,
  records: Vec<ModelRecord>,
}

impl HostModel {
  pub fn new() -> Self {
    Self {
      irq_count: 0,
      records: Vec::new(),
    }
  }
}

impl Default for HostModel {
  fn default() -> Self {
    Self::new()
  }
}

impl DevsModel for HostModel {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == "irq" {
      self.irq_count += 1;
    }
    model_record!(self, services, incoming_message.port_name, incoming_message.content);
    Ok(())
  }

  fn events_int(&mut self, _services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    Ok(Vec::new())
  }

  fn time_advance(&mut self, _time_delta: f64) {}

  fn until_next_event(&self) -> f64 {
    INFINITY
  }
}

impl Reportable for HostModel {
  fn status(&self) -> String {
    format!("irqs={}", self.irq_count)
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for HostModel {}

impl SerializableModel for HostModel {
  fn get_type(&self) -> &'static str {
    "HostModel"
  }
}
