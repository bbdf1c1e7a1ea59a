//! Result sink: persists verified links, one per line
//!
//! Producers push through cloneable [`SinkAppender`] handles into an
//! unbounded channel. A single background task owns the file, so writes
//! never interleave, and each line is written with one `write_all`.

use crate::Result;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle for pushing verified links into the sink
#[derive(Debug, Clone)]
pub struct SinkAppender {
    tx: mpsc::UnboundedSender<String>,
}

impl SinkAppender {
    /// Queue a link for writing. Returns `false` if the writer is gone.
    pub fn append(&self, link: String) -> bool {
        self.tx.send(link).is_ok()
    }
}

/// Owner of the background writer
pub struct ResultSink {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<Result<usize>>,
}

impl ResultSink {
    /// Create (or truncate) the output file and start the writer.
    ///
    /// Every written link is also forwarded to `observer` when given.
    pub async fn create<P: AsRef<Path>>(
        path: P,
        observer: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<Self> {
        let file = File::create(path.as_ref()).await?;
        debug!(path = %path.as_ref().display(), "result sink opened");
        Ok(Self::from_writer(BufWriter::new(file), observer))
    }

    /// Start a sink over any async writer
    pub fn from_writer<W>(writer: W, observer: Option<mpsc::UnboundedSender<String>>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(writer, rx, observer));
        Self { tx, writer }
    }

    pub fn appender(&self) -> SinkAppender {
        SinkAppender {
            tx: self.tx.clone(),
        }
    }

    /// Close the sink and wait until everything queued is flushed.
    ///
    /// All appenders must have been dropped for this to return. Yields the
    /// number of lines written.
    pub async fn finalize(self) -> Result<usize> {
        drop(self.tx);
        let written = self.writer.await??;
        Ok(written)
    }
}

async fn write_lines<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    observer: Option<mpsc::UnboundedSender<String>>,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    while let Some(link) = rx.recv().await {
        let line = format!("{}\n", link);
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "error writing verified link");
            continue;
        }
        written += 1;

        if let Some(observer) = &observer {
            // A dropped observer only stops progress output
            let _ = observer.send(link);
        }
    }

    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_sink_writes_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = ResultSink::create(&path, None).await.unwrap();
        let appender = sink.appender();

        assert!(appender.append("vless://a@h:1".to_string()));
        assert!(appender.append("trojan://b@h:2".to_string()));
        drop(appender);

        assert_eq!(sink.finalize().await.unwrap(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "vless://a@h:1\ntrojan://b@h:2\n");
    }

    #[tokio::test]
    async fn test_sink_truncates_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "stale line\n").unwrap();

        let sink = ResultSink::create(&path, None).await.unwrap();
        assert_eq!(sink.finalize().await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_sink_forwards_to_observer() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ResultSink::create(dir.path().join("out.txt"), Some(tx))
            .await
            .unwrap();

        sink.appender().append("vmess://x".to_string());
        assert_eq!(rx.recv().await.as_deref(), Some("vmess://x"));

        sink.finalize().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = ResultSink::create(&path, None).await.unwrap();

        let handles: Vec<_> = (0..1000)
            .map(|i| {
                let appender = sink.appender();
                tokio::spawn(async move {
                    appender.append(format!("vless://user-{}@10.0.{}.{}:443?security=tls", i, i / 256, i % 256));
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(sink.finalize().await.unwrap(), 1000);
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1000);

        let expected: HashSet<String> = (0..1000)
            .map(|i| format!("vless://user-{}@10.0.{}.{}:443?security=tls", i, i / 256, i % 256))
            .collect();
        let actual: HashSet<String> = lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(actual, expected);
    }
}
