use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Step(u32),
  Quit,
  Continue,
}

/// Parse one shell line. Empty input steps once.
pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
  let trimmed = line.trim();
  match trimmed {
    "" => Ok(Command::Step(1)),
    "q" => Ok(Command::Quit),
    "c" => Ok(Command::Continue),
    _ if trimmed.starts_with("si") => {
      let num_str = trimmed[2..].trim();
      if num_str.is_empty() {
        return Err("'si' requires a number, e.g. 'si 100'".to_string());
      }
      match num_str.parse::<u32>() {
        Ok(0) => Err("step count must be greater than 0".to_string()),
        Ok(n) => Ok(Command::Step(n)),
        Err(e) => Err(format!("invalid number '{}': {}", num_str, e)),
      }
    },
    _ => Err(format!(
      "unknown command '{}'. Enter steps once, 'si N' steps N times, 'c' continues, 'q' quits",
      trimmed
    )),
  }
}

pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Self { editor })
  }

  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(gemmsim) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          match parse_command(trimmed) {
            Ok(cmd) => return Ok(cmd),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        },
        // Ctrl-C and Ctrl-D both quit
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err)),
      }
    }
  }
}
