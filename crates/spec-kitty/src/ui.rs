//! Colored status lines for human output.
//!
//! JSON mode never goes through here; these helpers print ANSI-colored
//! lines only when stdout is a terminal.

use is_terminal::IsTerminal;

fn paint(code: &str, text: &str) -> String {
    if std::io::stdout().is_terminal() {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

pub fn success(message: &str) {
    println!("{} {message}", paint("32", "ok"));
}

pub fn status(message: &str) {
    println!("{} {message}", paint("36", "::"));
}

pub fn warn(message: &str) {
    eprintln!("{} {message}", paint("33", "warning:"));
}

pub fn error(message: &str) {
    eprintln!("{} {message}", paint("31", "error:"));
}

/// Render a small progress tree line for a WP.
pub fn tree_item(last: bool, label: &str, detail: &str) {
    let branch = if last { "`-" } else { "|-" };
    println!("  {branch} {label}  {}", paint("2", detail));
}
