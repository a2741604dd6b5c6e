use log::LevelFilter;
use sim::models::model_trait::DevsModel;
use sim::simulator::Simulation;
use std::fs::File;
use std::io::{self, BufWriter, Result, Write};

/// Open the JSON-lines trace sink. An empty path disables tracing.
pub fn open_trace(path: &str) -> Result<Option<BufWriter<File>>> {
  if path.is_empty() {
    return Ok(None);
  }
  Ok(Some(BufWriter::new(File::create(path)?)))
}

fn trace_messages(simulation: &Simulation, trace_writer: &mut Option<BufWriter<File>>) -> Result<()> {
  let messages = simulation.get_messages();

  if log::max_level() >= LevelFilter::Info {
    for msg in messages.iter() {
      println!(
        "[MSG] t={:.1} {}:{} -> {}:{} | {}",
        msg.time(),
        msg.source_id(),
        msg.source_port(),
        msg.target_id(),
        msg.target_port(),
        msg.content()
      );
    }
  }

  if let Some(writer) = trace_writer {
    for msg in messages.iter() {
      let entry = serde_json::json!({
        "time": msg.time(),
        "source": msg.source_id(),
        "source_port": msg.source_port(),
        "target": msg.target_id(),
        "target_port": msg.target_port(),
        "content": msg.content()
      });
      writeln!(writer, "{}", entry)?;
    }
    writer.flush()?;
  }
  Ok(())
}

fn next_event(simulation: &mut Simulation) -> f64 {
  simulation
    .models()
    .iter()
    .fold(f64::INFINITY, |min, model| f64::min(min, model.until_next_event()))
}

// Returns true once global time has moved forward.
fn advance(simulation: &mut Simulation) -> Result<bool> {
  let time0 = simulation.get_global_time();
  simulation.step().map_err(|e| {
    log::error!("simulation step error: {:?}", e);
    io::Error::new(io::ErrorKind::Other, format!("simulation error: {:?}", e))
  })?;
  Ok(simulation.get_global_time() > time0)
}

/// Advance the simulation by at most one clock.
///
/// Pending messages are delivered first, then internal events run until time
/// moves or every model is passive. Returns false when nothing is scheduled.
pub fn model_step(simulation: &mut Simulation, trace_writer: &mut Option<BufWriter<File>>) -> Result<bool> {
  while !simulation.get_messages().is_empty() {
    trace_messages(simulation, trace_writer)?;
    if advance(simulation)? {
      return Ok(next_event(simulation) != f64::INFINITY);
    }
  }

  loop {
    if next_event(simulation) == f64::INFINITY {
      return Ok(false);
    }
    let moved = advance(simulation)?;
    if !simulation.get_messages().is_empty() {
      trace_messages(simulation, trace_writer)?;
    }
    if moved {
      return Ok(true);
    }
  }
}
