//! Workspace events read from stdin, one JSON object per line.

use saga_lsp::WorkspaceEvent;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// Forward every well-formed event line to `tx`; malformed lines are logged
/// and skipped.
///
/// Returns at EOF, after forwarding `Shutdown`, or once the receiver is gone.
pub async fn pump_events<R>(reader: R, tx: &mpsc::Sender<WorkspaceEvent>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event = match WorkspaceEvent::from_json_line(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping malformed event line: {e}");
                continue;
            }
        };
        let shutdown = matches!(event, WorkspaceEvent::Shutdown);
        if tx.send(event).await.is_err() {
            break;
        }
        forwarded += 1;
        if shutdown {
            break;
        }
    }
    Ok(forwarded)
}
