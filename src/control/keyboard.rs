//! Line-based keyboard producer

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use super::command::ControlError;
use super::queue::{CommandSender, Producer};

/// Read commands from stdin until EOF or the queue closes
pub fn spawn_keyboard_reader(sender: &CommandSender) -> JoinHandle<()> {
    let sender = sender.for_producer(Producer::Keyboard);
    tokio::spawn(async move {
        let queued = read_commands(BufReader::new(tokio::io::stdin()), sender).await;
        tracing::debug!(queued, "Keyboard reader finished");
    })
}

/// Queue one command per line. Returns how many were queued.
pub async fn read_commands<R>(reader: R, sender: CommandSender) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read keyboard input");
                break;
            }
        };
        match sender.send_text(&line) {
            Ok(_) => queued += 1,
            Err(ControlError::QueueClosed) => break,
            Err(e) => {
                tracing::warn!(input = %line.trim(), error = %e, "Ignoring keyboard input");
                eprintln!("{e}. Try: s(tep), a(uto), c(ontinue), p(ause), q(uit), note <text>");
            }
        }
    }
    queued
}
