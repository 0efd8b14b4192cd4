//! Various MAVLink utils used by the lib
//!
//! These functionalities are currently all private, some might be useful for the user code as well, lets make them
//! public when needed.

use crate::link::MavLink;
use crate::{Error, Result};
use flume as channel;
use flume::{Receiver, Sender};
use mavlink::common::{MavMessage, COMMAND_ACK_DATA};
use mavlink::MavHeader;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) struct MavDispatch {
    link: Arc<MavLink>,
    telemetry: Option<Sender<(MavHeader, MavMessage)>>,
    command_ack: Option<Sender<COMMAND_ACK_DATA>>,
    disconnect: Arc<AtomicBool>,
}

impl MavDispatch {
    pub fn new(link: Arc<MavLink>, disconnect: Arc<AtomicBool>) -> Self {
        MavDispatch {
            link,
            telemetry: None,
            command_ack: None,
            disconnect,
        }
    }

    /// Receiver for all decoded messages with their header. Only one telemetry receiver can exist.
    pub fn telemetry_receiver(&mut self) -> Option<Receiver<(MavHeader, MavMessage)>> {
        if self.telemetry.is_some() {
            return None;
        }
        let (tx, rx) = channel::unbounded();
        self.telemetry = Some(tx);
        Some(rx)
    }

    /// Receiver for command acknowledgements. Only one ack receiver can exist.
    pub fn command_ack_receiver(&mut self) -> Option<Receiver<COMMAND_ACK_DATA>> {
        if self.command_ack.is_some() {
            return None;
        }
        let (tx, rx) = channel::unbounded();
        self.command_ack = Some(tx);
        Some(rx)
    }

    pub fn run(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while !self.disconnect.load(Relaxed) {
                match tokio::time::timeout(Duration::from_millis(200), self.link.recv()).await {
                    Ok(Ok(messages)) => {
                        for (header, msg) in messages {
                            self.route(header, msg);
                        }
                    }
                    Ok(Err(Error::IoError(e))) => {
                        // ICMP port unreachable surfaces as a receive error on some platforms, keep listening
                        log::debug!("Vehicle link receive error: {}", e);
                    }
                    Ok(Err(_)) => return,
                    Err(_) => continue,
                }
            }
        })
    }

    fn route(&self, header: MavHeader, msg: MavMessage) {
        if let (Some(acks), MavMessage::COMMAND_ACK(ack)) = (self.command_ack.as_ref(), &msg) {
            let _ = acks.send(ack.clone());
        }
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.send((header, msg));
        }
    }
}

/// Wait on an ack receiver for the acknowledgement of a given command.
///
/// Returns `Ok(None)` if nothing matching arrives within `timeout`.
pub(crate) async fn wait_command_ack(
    acks: &Receiver<COMMAND_ACK_DATA>,
    command: mavlink::common::MavCmd,
    timeout: Duration,
) -> Result<Option<COMMAND_ACK_DATA>> {
    let wait = async {
        loop {
            let ack = acks.recv_async().await.map_err(Error::from)?;
            if ack.command == command {
                return Ok::<_, Error>(ack);
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(ack)) => Ok(Some(ack)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{MavCmd, MavResult};

    fn ack(command: MavCmd, result: MavResult) -> COMMAND_ACK_DATA {
        COMMAND_ACK_DATA {
            command,
            result,
            progress: 0,
            result_param2: 0,
            target_system: 255,
            target_component: 0,
        }
    }

    #[tokio::test]
    async fn ack_wait_skips_other_commands() -> Result<()> {
        let (tx, rx) = channel::unbounded();
        tx.send(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_ACCEPTED))
            .map_err(|_| Error::Disconnected)?;
        tx.send(ack(MavCmd::MAV_CMD_DO_SET_MODE, MavResult::MAV_RESULT_DENIED))
            .map_err(|_| Error::Disconnected)?;

        let got = wait_command_ack(&rx, MavCmd::MAV_CMD_DO_SET_MODE, Duration::from_millis(100)).await?;
        assert_eq!(got.map(|a| a.result), Some(MavResult::MAV_RESULT_DENIED));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ack_wait_times_out_quietly() -> Result<()> {
        let (_tx, rx) = channel::unbounded::<COMMAND_ACK_DATA>();

        let got = wait_command_ack(&rx, MavCmd::MAV_CMD_DO_SET_MODE, Duration::from_secs(1)).await?;
        assert!(got.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn ack_wait_reports_closed_channel() {
        let (tx, rx) = channel::unbounded::<COMMAND_ACK_DATA>();
        drop(tx);

        let got = wait_command_ack(&rx, MavCmd::MAV_CMD_DO_SET_MODE, Duration::from_secs(1)).await;
        assert!(matches!(got, Err(Error::Disconnected)));
    }
}
