use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

/// Drains one child pipe on a background task.
///
/// Bytes land in a shared buffer as they arrive, so whatever was read before a
/// timeout kill is still available even if the pipe never reaches EOF (for
/// example when a grandchild keeps it open).
pub(crate) struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputCapture {
    pub(crate) fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!(error = %e, "Pipe read failed");
                            break;
                        }
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    /// Waits up to `grace` for EOF, then returns what was captured as lossy UTF-8.
    pub(crate) async fn finish(mut self, grace: Duration) -> String {
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(grace, &mut reader).await.is_err() {
                debug!("Pipe still open after process exit, abandoning reader");
                reader.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
