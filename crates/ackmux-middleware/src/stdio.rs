//! Newline-delimited JSON bridge between stdio and the [`TopicBus`].
//!
//! Inbound, every line on stdin names a topic and carries one message:
//!
//! ```text
//! {"topic": "nav_vel", "message": {"drive": {"speed": 0.5, "steering_angle": 0.1}}}
//! {"topic": "e_stop",  "message": {"lock": true}}
//! ```
//!
//! Outbound, every command forwarded on the output topic is written to
//! stdout as one JSON object per line.  Lines that fail to parse are logged
//! and skipped; they never reach the bus.

use std::io;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::bus::{BusMessage, TopicBus, TopicReceiver};

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundLine {
    pub topic: String,
    pub message: BusMessage,
}

/// Parse one line.  Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<InboundLine>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Read lines from `reader` until EOF and publish each on the bus.
pub async fn pump_input<R>(bus: TopicBus, reader: R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(&line) {
            Ok(Some(inbound)) => {
                if let Err(e) = bus.publish(&inbound.topic, inbound.message) {
                    debug!(topic = %inbound.topic, error = %e, "input not delivered");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed input line"),
        }
    }
    debug!(lines = line_no, "input closed");
    Ok(())
}

/// Write every drive command received on `rx` to `writer` as a JSON line.
pub async fn pump_output<W>(mut rx: TopicReceiver, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let BusMessage::Drive(command) = message {
            let mut json = serde_json::to_string(&command)?;
            json.push('\n');
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ackmux_types::AckermannDrive;

    #[test]
    fn parses_drive_and_lock_lines() {
        let drive = parse_line(r#"{"topic":"nav_vel","message":{"drive":{"speed":0.5}}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(drive.topic, "nav_vel");
        assert_eq!(drive.message, BusMessage::Drive(AckermannDrive::new(0.5, 0.0)));

        let lock = parse_line(r#" {"topic":"e_stop","message":{"lock":false}} "#)
            .unwrap()
            .unwrap();
        assert_eq!(lock.message, BusMessage::Lock(false));
    }

    #[test]
    fn blank_lines_are_skipped_and_garbage_is_rejected() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"topic":"e_stop","message":{"lock":"yes"}}"#).is_err());
    }

    #[tokio::test]
    async fn input_lines_are_published() -> Result<(), Box<dyn std::error::Error>> {
        let bus = TopicBus::default();
        let mut nav = bus.subscribe("nav_vel");
        let input = concat!(
            "{\"topic\":\"nav_vel\",\"message\":{\"drive\":{\"speed\":1.0}}}\n",
            "garbage\n",
            "\n",
            "{\"topic\":\"nav_vel\",\"message\":{\"drive\":{\"speed\":2.0}}}\n",
        );

        pump_input(bus.clone(), input.as_bytes()).await?;

        assert_eq!(nav.recv().await, Some(BusMessage::Drive(AckermannDrive::new(1.0, 0.0))));
        assert_eq!(nav.recv().await, Some(BusMessage::Drive(AckermannDrive::new(2.0, 0.0))));
        Ok(())
    }

    #[tokio::test]
    async fn forwarded_commands_are_written_as_json_lines() -> Result<(), Box<dyn std::error::Error>> {
        let bus = TopicBus::default();
        let rx = bus.subscribe("cmd_vel_out");
        bus.publish("cmd_vel_out", BusMessage::Drive(AckermannDrive::new(0.5, 0.1)))?;
        bus.publish("cmd_vel_out", BusMessage::Drive(AckermannDrive::new(0.0, 0.0)))?;
        drop(bus);

        let mut out = Vec::new();
        pump_output(rx, &mut out).await?;

        let text = String::from_utf8(out)?;
        let lines: Vec<AckermannDrive> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines, vec![AckermannDrive::new(0.5, 0.1), AckermannDrive::new(0.0, 0.0)]);
        Ok(())
    }
}
