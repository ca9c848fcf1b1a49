//! Deployed tag history

use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;

/// Maximum number of tags kept in the ledger
pub const MAX_HISTORY: usize = 10;

/// Reject tags that would not read back as a single ledger line
pub fn validate_tag(tag: &str) -> Result<(), DeployError> {
    if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DeployError::ConfigError(format!(
            "invalid image tag {:?}",
            tag
        )));
    }
    Ok(())
}

/// Newline-delimited history of deployed tags, oldest first
#[derive(Debug, Clone)]
pub struct TagLedger {
    file: File,
}

impl TagLedger {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Read the full history. A missing file is an empty history.
    pub async fn read(&self) -> Result<Vec<String>, DeployError> {
        let contents = self.file.read_optional().await?.unwrap_or_default();
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Most recently deployed tag
    pub async fn current(&self) -> Result<Option<String>, DeployError> {
        Ok(self.read().await?.pop())
    }

    /// Tag deployed before the current one
    pub async fn previous(&self) -> Result<Option<String>, DeployError> {
        let mut tags = self.read().await?;
        if tags.len() < 2 {
            return Ok(None);
        }
        tags.pop();
        Ok(tags.pop())
    }

    /// Append a tag, keeping only the latest [`MAX_HISTORY`] entries.
    ///
    /// Callers must hold the deploy lock.
    pub async fn append(&self, tag: &str) -> Result<(), DeployError> {
        validate_tag(tag)?;
        let mut tags = self.read().await?;
        tags.push(tag.to_string());
        if tags.len() > MAX_HISTORY {
            tags.drain(..tags.len() - MAX_HISTORY);
        }

        let mut contents = tags.join("\n");
        contents.push('\n');
        self.file.write_atomic(contents.as_bytes()).await?;

        debug!("Recorded tag {} ({} in history)", tag, tags.len());
        Ok(())
    }
}
