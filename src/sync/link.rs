use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{self, Command, Report};
use super::timekeeper::{ClientId, Inbound};
use crate::actions::Action;
use crate::error::LinkError;

/// A client's raw connection to the timekeeper: frames out, frames in
#[derive(Debug)]
pub struct Connection {
    client: ClientId,
    inbox: mpsc::UnboundedSender<Inbound>,
    reports: mpsc::UnboundedReceiver<String>,
}

impl Connection {
    pub fn new(
        client: ClientId,
        inbox: mpsc::UnboundedSender<Inbound>,
        reports: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            client,
            inbox,
            reports,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn send(&self, command: &Command) -> Result<(), LinkError> {
        let frame = protocol::encode(command)?;
        self.send_raw(&frame)
    }

    pub fn send_raw(&self, frame: &str) -> Result<(), LinkError> {
        self.inbox
            .send(Inbound::Frame {
                client: self.client,
                frame: frame.to_string(),
            })
            .map_err(|_| LinkError::Unreachable)
    }

    pub async fn recv_frame(&mut self) -> Option<String> {
        self.reports.recv().await
    }
}

/// The controller's live link to the timekeeper.
///
/// Incoming frames are decoded by a forwarding task and posted to the
/// controller's action channel. Dropping the link stops the forwarder, so a
/// detached timekeeper can no longer reach the controller.
pub struct Link {
    client: ClientId,
    inbox: mpsc::UnboundedSender<Inbound>,
    forwarder: JoinHandle<()>,
}

impl Link {
    pub fn attach(connection: Connection, events: mpsc::UnboundedSender<Action>) -> Self {
        let Connection {
            client,
            inbox,
            mut reports,
        } = connection;

        let forwarder = tokio::spawn(async move {
            while let Some(frame) = reports.recv().await {
                match protocol::decode::<Report>(&frame) {
                    Ok(report) => {
                        if events.send(Action::Report(report)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%client, error = %e, "Dropping undecodable report"),
                }
            }
            debug!(%client, "Report stream closed");
        });

        Self {
            client,
            inbox,
            forwarder,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn send(&self, command: &Command) -> Result<(), LinkError> {
        let frame = protocol::encode(command)?;
        self.inbox
            .send(Inbound::Frame {
                client: self.client,
                frame,
            })
            .map_err(|_| LinkError::Unreachable)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.forwarder.abort();
        let _ = self.inbox.send(Inbound::Disconnect {
            client: self.client,
        });
    }
}
