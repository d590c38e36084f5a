//! Console command handling.

use std::io::BufRead;

use anyhow::Context;
use crossbeam_channel::Sender;
use tracing::{debug, info, instrument, warn};

use pipview_ipc::{ViewerCommand, ViewerEvent};

/// Parse one console line into a command.
pub fn parse_command(line: &str) -> Option<ViewerCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "start" | "pick" => Some(ViewerCommand::StartCapture),
        "stop" => Some(ViewerCommand::StopCapture),
        "state" => Some(ViewerCommand::GetState),
        "metrics" => Some(ViewerCommand::GetMetrics),
        "quit" | "exit" => Some(ViewerCommand::Shutdown),
        _ => None,
    }
}

/// Forward console commands to the engine until `quit` or end of input.
#[instrument(skip_all)]
pub fn forward_commands(
    input: impl BufRead,
    command_tx: &Sender<ViewerCommand>,
) -> anyhow::Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read console input")?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = parse_command(&line) else {
            warn!("Unknown command: {}", line.trim());
            continue;
        };

        let shutdown = command == ViewerCommand::Shutdown;
        debug!(?command, "Forwarding command");
        command_tx.send(command).context("Failed to send command")?;

        if shutdown {
            break;
        }
    }
    Ok(())
}

/// Log an engine event. Returns false once the engine has shut down.
pub fn log_event(event: &ViewerEvent) -> bool {
    match event {
        ViewerEvent::Ready => info!("Engine ready"),
        ViewerEvent::StateChanged { previous, current } => {
            info!(previous = %previous.name(), current = %current.name(), "State changed")
        }
        ViewerEvent::SourceResized { size } => info!(%size, "Source resized"),
        ViewerEvent::DeviceRecovered {
            attempts,
            device_recreated,
        } => info!(attempts, device_recreated, "Device recovered"),
        ViewerEvent::Metrics(metrics) => debug!(
            fps = metrics.fps,
            uptime = metrics.uptime_seconds,
            presented = metrics.stats.frames_presented,
            "Metrics"
        ),
        ViewerEvent::PerformanceWarning(warning) => warn!(?warning, "Performance warning"),
        ViewerEvent::Error {
            recoverable,
            message,
        } => warn!(recoverable, "Engine error: {}", message),
        ViewerEvent::Shutdown => {
            info!("Engine shut down");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("start"), Some(ViewerCommand::StartCapture));
        assert_eq!(parse_command("  STOP \n"), Some(ViewerCommand::StopCapture));
        assert_eq!(parse_command("quit"), Some(ViewerCommand::Shutdown));
        assert_eq!(parse_command("record"), None);
    }

    #[test]
    fn test_forward_stops_at_quit() {
        let (tx, rx) = pipview_ipc::command_channel();
        let input = Cursor::new("start\n\nbogus\nmetrics\nquit\nstop\n");

        forward_commands(input, &tx).unwrap();

        let sent: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            sent,
            vec![
                ViewerCommand::StartCapture,
                ViewerCommand::GetMetrics,
                ViewerCommand::Shutdown,
            ]
        );
    }

    #[test]
    fn test_log_event_reports_shutdown() {
        assert!(log_event(&ViewerEvent::Ready));
        assert!(!log_event(&ViewerEvent::Shutdown));
    }
}
