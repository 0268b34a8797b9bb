//! HTML to PDF rendering through a headless Chromium process.
//!
//! The renderer writes the HTML into a temporary workspace, asks the browser to
//! print it, and reads the PDF back. Timeouts are applied by the caller; the child
//! process is killed when the render future is dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::OnceCell;

const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// A4 with 1cm margins on every side.
const PAGE_STYLE: &str = "<style>@page { size: A4; margin: 1cm; }</style>\n";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template rendering failed: {0}")]
    Template(String),
    #[error("no headless browser found, set CHROME_PATH")]
    BrowserNotFound,
    #[error("failed to prepare render workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("browser execution failed: {0}")]
    BrowserIo(#[source] io::Error),
    #[error("browser exited with status {0}")]
    BrowserExit(i32),
    #[error("failed to read generated PDF: {0}")]
    ReadPdf(#[source] io::Error),
    #[error("browser produced an empty PDF")]
    EmptyOutput,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError>;
}

pub struct ChromiumRenderer {
    configured_path: Option<PathBuf>,
    executable: OnceCell<PathBuf>,
}

impl ChromiumRenderer {
    pub fn new(configured_path: Option<PathBuf>) -> Self {
        Self {
            configured_path,
            executable: OnceCell::new(),
        }
    }

    /// Locate the browser once per process. A failed lookup is retried on the next call.
    async fn executable(&self) -> Result<&Path, RenderError> {
        let path = self
            .executable
            .get_or_try_init(|| async {
                let found = locate_browser(self.configured_path.as_deref())
                    .ok_or(RenderError::BrowserNotFound)?;
                log::info!("Using headless browser at {}", found.display());
                Ok::<_, RenderError>(found)
            })
            .await?;
        Ok(path.as_path())
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let browser = self.executable().await?;

        let workspace = tempfile::tempdir().map_err(RenderError::Workspace)?;
        let input_path = workspace.path().join("document.html");
        let output_path = workspace.path().join("document.pdf");

        let mut page = String::with_capacity(PAGE_STYLE.len() + html.len());
        page.push_str(PAGE_STYLE);
        page.push_str(html);
        fs::write(&input_path, page)
            .await
            .map_err(RenderError::Workspace)?;

        let output = Command::new(browser)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output_path.display()))
            .arg(format!("file://{}", input_path.display()))
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(RenderError::BrowserIo)?;

        if !output.status.success() {
            log::warn!(
                "Browser failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(RenderError::BrowserExit(output.status.code().unwrap_or(-1)));
        }

        let pdf = fs::read(&output_path).await.map_err(RenderError::ReadPdf)?;
        if pdf.is_empty() {
            return Err(RenderError::EmptyOutput);
        }
        Ok(pdf)
    }
}

fn locate_browser(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return path.is_file().then(|| path.to_path_buf());
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .flat_map(|dir| BROWSER_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}
