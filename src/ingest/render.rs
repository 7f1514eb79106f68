//! Best-effort PDF page rasterization
//!
//! Pages are rendered by an external `pdftoppm` at a fixed DPI into the
//! upload tree. Callers treat failure as non-fatal.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const RENDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Render every page of a PDF as JPEG under `out_dir`; returns the count.
pub async fn render_pdf_pages(pdf_path: &Path, out_dir: &Path, dpi: u32) -> Result<usize> {
    tokio::fs::create_dir_all(out_dir).await?;
    let prefix = out_dir.join("page");

    let mut command = Command::new("pdftoppm");
    command
        .arg("-jpeg")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf_path)
        .arg(&prefix)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(RENDER_TIMEOUT, command.output())
        .await
        .map_err(|_| Error::Parse(format!("page render timed out for {}", pdf_path.display())))?
        .map_err(|e| Error::Parse(format!("failed to spawn pdftoppm: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Parse(format!(
            "pdftoppm exited with {}: {}",
            output.status,
            stderr.chars().take(300).collect::<String>()
        )));
    }

    let mut pages = 0usize;
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry
            .path()
            .extension()
            .map(|e| e == "jpg" || e == "jpeg")
            .unwrap_or(false)
        {
            pages += 1;
        }
    }

    debug!("Rendered {} pages for {}", pages, pdf_path.display());
    Ok(pages)
}
