//! Subprocess-driven format conversion and page rendering.
//!
//! The office-suite binary converts documents to PDF (or spreadsheets to
//! XLSX); the renderer rasterizes PDF pages to PNG. Every invocation runs in
//! its own temp directory which is removed on all exit paths, has a
//! wall-clock timeout, and captures stderr for failure diagnostics.

use std::{path::Path, process::Stdio, time::Duration};

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ParserError, Result};
use crate::config::ConvertConfig;

/// Runs the office-suite and renderer subprocesses
#[derive(Debug, Clone)]
pub struct Converter {
  config: ConvertConfig,
}

impl Converter {
  pub fn new(config: ConvertConfig) -> Self {
    Self { config }
  }

  /// Convert an office document to PDF. Returns the PDF bytes.
  pub async fn to_pdf(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    self.convert(file_name, bytes, "pdf").await
  }

  /// Convert a legacy spreadsheet to XLSX. Returns the XLSX bytes.
  pub async fn to_xlsx(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    self.convert(file_name, bytes, "xlsx").await
  }

  async fn convert(&self, file_name: &str, bytes: &[u8], target: &str) -> Result<Vec<u8>> {
    let workdir = TempDir::new()?;
    let input_path = workdir.path().join(sanitize_file_name(file_name));
    tokio::fs::write(&input_path, bytes).await?;

    let mut command = Command::new(&self.config.soffice_path);
    command
      .arg("--headless")
      .arg("--convert-to")
      .arg(target)
      .arg("--outdir")
      .arg(workdir.path())
      .arg(&input_path);

    self.run(&self.config.soffice_path, command).await?;

    let expected = input_path.with_extension(target);
    match tokio::fs::read(&expected).await {
      Ok(output) => Ok(output),
      // Some document names confuse the converter's output naming; fall back
      // to the only file with the target extension
      Err(_) => {
        let found = find_by_extension(workdir.path(), target).await?;
        found.ok_or_else(|| ParserError::Subprocess {
          program: self.config.soffice_path.clone(),
          status: Some(0),
          stderr: format!("no .{target} output produced"),
        })
      }
    }
  }

  /// Rasterize every PDF page to a PNG at the configured DPI.
  /// Returns page images in page order.
  pub async fn render_pdf_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let workdir = TempDir::new()?;
    let input_path = workdir.path().join("input.pdf");
    tokio::fs::write(&input_path, pdf_bytes).await?;

    let mut command = Command::new(&self.config.pdftoppm_path);
    command
      .arg("-png")
      .arg("-r")
      .arg(self.config.render_dpi.to_string())
      .arg(&input_path)
      .arg(workdir.path().join("page"));

    self.run(&self.config.pdftoppm_path, command).await?;

    // Output files are page-1.png, page-2.png, ... (zero-padded for larger
    // documents); sort by the numeric component
    let mut pages: Vec<(u32, std::path::PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(workdir.path()).await?;
    while let Some(entry) = entries.next_entry().await? {
      let name = entry.file_name().to_string_lossy().into_owned();
      if let Some(number) = name
        .strip_prefix("page-")
        .and_then(|rest| rest.strip_suffix(".png"))
        .and_then(|n| n.parse::<u32>().ok())
      {
        pages.push((number, entry.path()));
      }
    }
    pages.sort_by_key(|(number, _)| *number);

    let mut images = Vec::with_capacity(pages.len());
    for (_, path) in pages {
      images.push(tokio::fs::read(path).await?);
    }

    debug!(page_count = images.len(), dpi = self.config.render_dpi, "Rendered PDF pages");
    Ok(images)
  }

  async fn run(&self, program: &str, mut command: Command) -> Result<()> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    let timeout = Duration::from_secs(self.config.timeout_secs);
    let output = match tokio::time::timeout(timeout, command.output()).await {
      Ok(result) => result?,
      Err(_) => {
        warn!(program, timeout_secs = self.config.timeout_secs, "Subprocess timed out");
        return Err(ParserError::SubprocessTimeout(program.to_string()));
      }
    };

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      warn!(program, status = ?output.status.code(), stderr = %stderr, "Subprocess failed");
      return Err(ParserError::Subprocess {
        program: program.to_string(),
        status: output.status.code(),
        stderr,
      });
    }

    Ok(())
  }
}

fn sanitize_file_name(file_name: &str) -> String {
  let name = file_name.rsplit('/').next().unwrap_or(file_name);
  name.replace(['\\', ':'], "_")
}

async fn find_by_extension(dir: &Path, extension: &str) -> Result<Option<Vec<u8>>> {
  let mut entries = tokio::fs::read_dir(dir).await?;
  while let Some(entry) = entries.next_entry().await? {
    let path = entry.path();
    if path.extension().and_then(|e| e.to_str()) == Some(extension) {
      return Ok(Some(tokio::fs::read(path).await?));
    }
  }
  Ok(None)
}
