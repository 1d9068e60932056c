// process_watch.rs - Helpers for external helper processes (tor, cloudflared)
// Purpose: Spawn a child with piped output and wait until a line on it
//          satisfies a predicate, with a deadline

use anyhow::{anyhow, bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Read lines until `matcher` returns Some, or fail on EOF / timeout
pub async fn wait_for_line<R, T, F>(reader: R, wait: Duration, mut matcher: F) -> Result<T>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str) -> Option<T>,
{
    let mut lines = BufReader::new(reader).lines();
    let scan = async {
        while let Some(line) = lines.next_line().await? {
            tracing::debug!(line = %line, "child output");
            if let Some(found) = matcher(&line) {
                return Ok(found);
            }
        }
        bail!("process output ended before the expected line appeared")
    };

    tokio::time::timeout(wait, scan)
        .await
        .map_err(|_| anyhow!("timed out after {:?} waiting for process output", wait))?
}

/// Spawn `program args..` with stdout+stderr merged into one line channel
pub struct WatchedChild {
    pub child: Child,
    lines: mpsc::UnboundedReceiver<String>,
}

impl WatchedChild {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {} (is it installed and on PATH?)", program))?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Ok(Self { child, lines: rx })
    }

    /// Wait for a matching line on either stream
    pub async fn wait_for<T, F>(&mut self, wait: Duration, mut matcher: F) -> Result<T>
    where
        F: FnMut(&str) -> Option<T>,
    {
        let scan = async {
            while let Some(line) = self.lines.recv().await {
                tracing::debug!(line = %line, "child output");
                if let Some(found) = matcher(&line) {
                    return Ok(found);
                }
            }
            bail!("process exited before the expected line appeared")
        };

        tokio::time::timeout(wait, scan)
            .await
            .map_err(|_| anyhow!("timed out after {:?} waiting for process output", wait))?
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "child already exited");
        }
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_line_matches() {
        let output: &[u8] = b"starting\nBootstrapped 50%\nBootstrapped 100% (done): Done\n";
        let line = wait_for_line(output, Duration::from_secs(1), |l| {
            l.contains("Bootstrapped 100%").then(|| l.to_string())
        })
        .await
        .unwrap();
        assert!(line.ends_with("Done"));
    }

    #[tokio::test]
    async fn test_wait_for_line_eof() {
        let output: &[u8] = b"nothing useful\n";
        let err = wait_for_line(output, Duration::from_secs(1), |l| l.contains("never").then_some(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ended"));
    }

    #[tokio::test]
    async fn test_wait_for_line_timeout() {
        let (_writer, reader) = tokio::io::duplex(64);
        let err = wait_for_line(reader, Duration::from_millis(100), |_| Some(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watched_child_reads_stderr() {
        let mut child = WatchedChild::spawn(
            "sh",
            &["-c".to_string(), "echo hello; echo 'url https://x.trycloudflare.com' 1>&2; sleep 5".to_string()],
        )
        .unwrap();
        let found = child
            .wait_for(Duration::from_secs(3), |l| l.split_whitespace().find(|w| w.starts_with("https://")).map(str::to_string))
            .await
            .unwrap();
        assert_eq!(found, "https://x.trycloudflare.com");
        child.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let err = WatchedChild::spawn("definitely-not-a-real-binary-xyz", &[]).err().unwrap();
        assert!(err.to_string().contains("Failed to start"));
    }
}
