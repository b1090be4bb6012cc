//! Atomic file writer — write-to-temp-then-rename, matching the token
//! file persistence pattern this crate's grounding codebase uses for its
//! own on-disk secrets: write content to a sibling temp path, fsync,
//! then rename over the destination so a crash or cancellation never
//! leaves a partially written artifact behind.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use super::FileWriter;
use crate::error::RunContext;

pub struct AtomicFileWriter {
    file_mode: u32,
}

impl AtomicFileWriter {
    pub fn new(file_mode: u32) -> Self {
        Self { file_mode }
    }
}

impl Default for AtomicFileWriter {
    fn default() -> Self {
        Self::new(0o644)
    }
}

#[async_trait]
impl FileWriter for AtomicFileWriter {
    async fn save_to_file(&self, ctx: &RunContext, content: &str, path: &Path) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            anyhow::bail!(crate::error::TaxonomyError::new(
                crate::error::ErrorKind::Cancelled,
                "file writer: cancelled before write"
            ));
        }

        let path = path.to_path_buf();
        let content = content.to_string();
        let file_mode = self.file_mode;

        tokio::task::spawn_blocking(move || write_atomic(&path, &content, file_mode))
            .await
            .context("file writer: write task panicked")??;

        Ok(())
    }
}

fn write_atomic(path: &Path, content: &str, file_mode: u32) -> anyhow::Result<()> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating parent directory for {}", path.display()))?;
    }

    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("creating temp file {}", tmp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(file_mode))?;
        }

        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path).with_context(|| format!("renaming {} into place", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(file_mode))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_to_file_writes_content_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpt-4o.md");
        let writer = AtomicFileWriter::default();
        let ctx = RunContext::new();

        writer.save_to_file(&ctx, "hello world", &path).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn save_to_file_overwrites_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "stale").unwrap();
        let writer = AtomicFileWriter::default();
        let ctx = RunContext::new();

        writer.save_to_file(&ctx, "fresh", &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh");
    }

    #[tokio::test]
    async fn save_to_file_rejects_a_cancelled_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let writer = AtomicFileWriter::default();
        let ctx = RunContext::new();
        ctx.cancellation.cancel();

        let err = writer.save_to_file(&ctx, "content", &path).await.unwrap_err();
        assert!(crate::error::is_cancelled(&err));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_to_file_applies_the_configured_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let writer = AtomicFileWriter::new(0o600);
        let ctx = RunContext::new();

        writer.save_to_file(&ctx, "content", &path).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
