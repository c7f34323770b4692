// warden/src/ui.rs
//! Short status lines on stderr, colored when stderr is a terminal.

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::io::{self, Write};

fn colored() -> bool {
    io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

pub fn success_msg(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    let line = if colored() { msg.green().to_string() } else { msg.to_string() };
    let _ = writeln!(io::stderr(), "{}", line);
}

pub fn warn_msg(msg: impl AsRef<str>) {
    let msg = format!("Warning: {}", msg.as_ref());
    let line = if colored() { msg.yellow().to_string() } else { msg };
    let _ = writeln!(io::stderr(), "{}", line);
}

pub fn error_msg(msg: impl AsRef<str>) {
    let msg = format!("Error: {}", msg.as_ref());
    let line = if colored() { msg.red().bold().to_string() } else { msg };
    let _ = writeln!(io::stderr(), "{}", line);
}
