//! Parser subprocess bridge
//!
//! The binary-document parser runs out of process. The bridge spawns it
//! with a deadline, captures stdout into a bounded buffer, and decodes the
//! single JSON object it prints. Anything else is a parse error.

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::parse::ParsedSource;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Refuse to buffer parser output beyond this (16 MB).
const MAX_STDOUT_BYTES: usize = 16 * 1024 * 1024;

/// Handle to the external extractor
pub struct ParserBridge {
    python_exe: String,
    script: String,
    timeout: Duration,
}

impl ParserBridge {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            python_exe: config.parser_python.clone(),
            script: config.parser_script.clone(),
            timeout: Duration::from_secs(config.parser_timeout_secs),
        }
    }

    /// Run the extractor on a saved source file.
    pub async fn extract(&self, input_path: &Path, out_dir: &Path) -> Result<ParsedSource> {
        debug!(
            "Spawning parser: {} {} {:?}",
            self.python_exe, self.script, input_path
        );

        let mut command = Command::new(&self.python_exe);
        command
            .arg(&self.script)
            .arg(input_path)
            .arg(out_dir)
            .env("PYTHONUTF8", "1")
            .env("LANG", "ko_KR.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                Error::Parse(format!(
                    "parser timed out after {:?} on {}",
                    self.timeout,
                    input_path.display()
                ))
            })?
            .map_err(|e| Error::Parse(format!("failed to spawn parser: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Parse(format!(
                "parser exited with {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>()
            )));
        }

        if output.stdout.len() > MAX_STDOUT_BYTES {
            return Err(Error::Parse(format!(
                "parser produced {} bytes of output, limit is {}",
                output.stdout.len(),
                MAX_STDOUT_BYTES
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if !trimmed.starts_with('{') {
            return Err(Error::Parse(format!(
                "parser stdout is not a JSON object: {}",
                trimmed.chars().take(200).collect::<String>()
            )));
        }

        serde_json::from_str(trimmed)
            .map_err(|e| Error::Parse(format!("unparsable parser output: {}", e)))
    }
}
