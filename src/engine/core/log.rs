use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Append a timestamped entry to the engine transcript at `log_path`,
/// creating the file if needed. Multi-line messages keep one timestamp.
pub fn write_debug_log(log_path: &Path, message: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open debug log {}", log_path.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "[{}] {}", timestamp, message.trim_end())?;
    Ok(())
}
