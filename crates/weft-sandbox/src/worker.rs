//! Worker side of [`ProcessIsolation`](crate::isolation::ProcessIsolation).

use std::io::{BufRead, Write};

use crate::protocol::{ResultMessage, StartMessage};
use crate::script;

/// Serve exactly one start message: read a line, evaluate, write a line.
pub fn serve<R: BufRead, W: Write>(mut reader: R, mut writer: W) -> std::io::Result<()> {
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let result = match serde_json::from_str::<StartMessage>(line.trim()) {
        Ok(msg) => script::evaluate(&msg),
        Err(e) => ResultMessage::err(format!("invalid start message: {}", e)),
    };

    serde_json::to_writer(&mut writer, &result)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Serve one start message over the process's stdin and stdout.
pub fn serve_stdio() -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(stdin.lock(), stdout.lock())
}
