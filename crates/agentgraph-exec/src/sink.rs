//! JSON-lines trace sink: one record per line, appended as events arrive.

use agentgraph_core::TraceEvent;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct JsonlTraceWriter {
    path: PathBuf,
}

impl JsonlTraceWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> std::io::Result<tokio::fs::File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }

    /// Append a batch of events.
    pub async fn write_all(&self, events: &[TraceEvent]) -> std::io::Result<()> {
        let mut file = self.open().await?;
        for event in events {
            let mut line = event.to_json_line();
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }
        file.flush().await
    }

    /// Drain a trace subscription into the file until the sender side closes.
    /// Resolves to the number of events written.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<TraceEvent>) -> JoinHandle<std::io::Result<usize>> {
        tokio::spawn(async move {
            let mut file = self.open().await?;
            let mut written = 0;
            while let Some(event) = rx.recv().await {
                let mut line = event.to_json_line();
                line.push('\n');
                file.write_all(line.as_bytes()).await?;
                written += 1;
            }
            file.flush().await?;
            tracing::debug!("wrote {} trace events to {}", written, self.path.display());
            Ok(written)
        })
    }

    /// Read a JSONL trace back. Blank lines are ignored.
    pub async fn read_events(path: impl AsRef<Path>) -> agentgraph_core::Result<Vec<TraceEvent>> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| TraceEvent::from_json_line(l).map_err(Into::into))
            .collect()
    }
}
