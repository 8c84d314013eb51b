use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::pipeline::processing::export::ReportBook;

/// Retrieves the raw case dataset as delimited text.
///
/// Implementations enforce their own timeout and surface
/// [`PipelineError::Network`](crate::error::PipelineError::Network) rather than hang.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String>;
}

/// Materializes a report book at a destination and returns the written path.
///
/// File layout and cell formatting belong to the renderer; failures are
/// [`PipelineError::Write`](crate::error::PipelineError::Write).
pub trait ReportRenderer: Send + Sync {
    fn render(&self, book: &ReportBook, destination: &Path) -> Result<PathBuf>;
}
