//! Shared styling utilities for the CLI.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Our side of a conflict (blue).
pub fn ours(value: &str) -> String {
    let style = Style::new().blue();
    style.apply_to(value).to_string()
}

/// Their side of a conflict (magenta).
pub fn theirs(value: &str) -> String {
    let style = Style::new().magenta();
    style.apply_to(value).to_string()
}

/// Resolution state marker: resolved (green dot) or open (yellow ring).
pub fn state(merged: bool) -> String {
    if merged {
        Style::new().green().apply_to("●").to_string()
    } else {
        Style::new().yellow().apply_to("○").to_string()
    }
}
