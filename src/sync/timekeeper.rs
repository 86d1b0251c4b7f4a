use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::link::Connection;
use super::protocol::{self, Command, Report, DEFAULT_TICK_INTERVAL_MS};
use crate::countdown::{Clock, Countdown};
use crate::error::{LinkError, ProtocolError, TimekeeperError};
use crate::ticker::TickLoop;

/// Identifies one connected client of the timekeeper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Messages accepted by the timekeeper's mailbox
#[derive(Debug)]
pub enum Inbound {
    Connect {
        outbox: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<ClientId>,
    },
    Frame {
        client: ClientId,
        frame: String,
    },
    Disconnect {
        client: ClientId,
    },
    /// The host tears the timekeeper down; its countdown is lost
    Terminate,
}

/// Cheap handle for reaching a spawned timekeeper
#[derive(Debug, Clone)]
pub struct TimekeeperHandle {
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl TimekeeperHandle {
    /// Register a new client and get its connection
    pub async fn connect(&self) -> Result<Connection, LinkError> {
        let (outbox, reports) = mpsc::unbounded_channel();
        let (reply, assigned) = oneshot::channel();
        self.inbox
            .send(Inbound::Connect { outbox, reply })
            .map_err(|_| LinkError::Unreachable)?;
        let client = assigned.await.map_err(|_| LinkError::Unreachable)?;
        Ok(Connection::new(client, self.inbox.clone(), reports))
    }

    pub fn terminate(&self) {
        let _ = self.inbox.send(Inbound::Terminate);
    }
}

/// Background owner of the single authoritative countdown.
///
/// One countdown is shared by every connected client. Ticks are produced by a
/// [`TickLoop`] feeding back into the same task, so all state changes happen
/// on one task.
pub struct Timekeeper {
    clients: HashMap<ClientId, mpsc::UnboundedSender<String>>,
    next_client: u64,
    remaining: u64,
    countdown: Option<Countdown>,
    interval: Duration,
    tick_loop: TickLoop,
    ticks: mpsc::UnboundedSender<u64>,
    clock: Arc<dyn Clock>,
    tolerance: u64,
}

impl Timekeeper {
    pub fn spawn(clock: Arc<dyn Clock>, tolerance: u64) -> TimekeeperHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();

        let keeper = Self {
            clients: HashMap::new(),
            next_client: 0,
            remaining: 0,
            countdown: None,
            interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            tick_loop: TickLoop::new(),
            ticks: ticks_tx,
            clock,
            tolerance,
        };
        tokio::spawn(keeper.run(inbox_rx, ticks_rx));

        TimekeeperHandle { inbox: inbox_tx }
    }

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Inbound>,
        mut ticks: mpsc::UnboundedReceiver<u64>,
    ) {
        info!("Timekeeper started");
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(Inbound::Terminate) | None => break,
                    Some(message) => self.on_inbound(message),
                },
                Some(generation) = ticks.recv() => {
                    if self.tick_loop.is_current(generation) {
                        if let Err(e) = self.on_tick() {
                            error!(error = %e, "Tick failed, reinstalling tick loop");
                            self.tick_loop.cancel();
                            if self.countdown.is_some() {
                                self.install_tick_loop();
                            }
                        }
                    } else {
                        trace!(generation, "Dropping tick from cancelled loop");
                    }
                }
            }
        }
        self.tick_loop.cancel();
        info!(remaining = self.remaining, "Timekeeper stopped");
    }

    fn on_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Connect { outbox, reply } => {
                self.next_client += 1;
                let client = ClientId(self.next_client);
                self.clients.insert(client, outbox);
                if reply.send(client).is_err() {
                    self.clients.remove(&client);
                } else {
                    debug!(%client, clients = self.clients.len(), "Client connected");
                }
            }
            Inbound::Frame { client, frame } => match protocol::decode::<Command>(&frame) {
                Ok(command) => self.on_command(client, command),
                Err(e) => {
                    warn!(%client, error = %e, "Rejecting malformed command");
                    self.reply(client, &Report::Error {
                        message: e.to_string(),
                    });
                }
            },
            Inbound::Disconnect { client } => {
                self.clients.remove(&client);
                debug!(%client, clients = self.clients.len(), "Client disconnected");
            }
            Inbound::Terminate => {}
        }
    }

    fn on_command(&mut self, client: ClientId, command: Command) {
        debug!(%client, ?command, "Command received");
        match command {
            Command::Start {
                initial_seconds,
                tick_interval_ms,
            } => {
                if tick_interval_ms == 0 || initial_seconds == 0 {
                    self.reply(client, &Report::Error {
                        message: format!(
                            "cannot start {}s countdown ticking every {}ms",
                            initial_seconds, tick_interval_ms
                        ),
                    });
                    return;
                }
                self.remaining = initial_seconds;
                self.interval = Duration::from_millis(tick_interval_ms);
                self.countdown = Some(Countdown::begin(initial_seconds, self.clock.now()));
                self.install_tick_loop();
                info!(remaining = initial_seconds, interval_ms = tick_interval_ms, "Countdown started");
            }
            Command::Stop => {
                self.halt();
                info!(remaining = self.remaining, "Countdown stopped");
                self.broadcast_logged(&Report::tick(self.remaining, false));
            }
            Command::Reset { initial_seconds } => {
                self.halt();
                self.remaining = initial_seconds;
                info!(remaining = initial_seconds, "Countdown reset");
                self.broadcast_logged(&Report::tick(self.remaining, false));
            }
            Command::Sync => {
                self.reply(client, &Report::Tick {
                    remaining_seconds: self.remaining,
                    running: self.countdown.is_some(),
                    resync: true,
                });
            }
            Command::Ping => self.reply(client, &Report::Pong),
        }
    }

    fn on_tick(&mut self) -> Result<(), TimekeeperError> {
        let Some(countdown) = self.countdown else {
            self.tick_loop.cancel();
            return Ok(());
        };
        self.remaining = countdown.step(self.remaining, self.clock.now(), self.tolerance);
        if self.remaining == 0 {
            self.halt();
            info!("Countdown completed");
            self.broadcast(&Report::completed())?;
        } else {
            self.broadcast(&Report::tick(self.remaining, true))?;
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.tick_loop.cancel();
        self.countdown = None;
    }

    fn install_tick_loop(&mut self) {
        let ticks = self.ticks.clone();
        self.tick_loop
            .install(self.interval, move |generation| ticks.send(generation).is_ok());
    }

    /// Deliver to every client, dropping the ones that went away
    fn broadcast(&mut self, report: &Report) -> Result<(), ProtocolError> {
        let frame = protocol::encode(report)?;
        self.clients.retain(|client, outbox| {
            let delivered = outbox.send(frame.clone()).is_ok();
            if !delivered {
                debug!(%client, "Pruning disconnected client");
            }
            delivered
        });
        Ok(())
    }

    fn broadcast_logged(&mut self, report: &Report) {
        if let Err(e) = self.broadcast(report) {
            error!(error = %e, "Broadcast failed");
        }
    }

    fn reply(&mut self, client: ClientId, report: &Report) {
        let frame = match protocol::encode(report) {
            Ok(frame) => frame,
            Err(e) => {
                error!(%client, error = %e, "Reply failed");
                return;
            }
        };
        let delivered = self
            .clients
            .get(&client)
            .is_some_and(|outbox| outbox.send(frame).is_ok());
        if !delivered {
            self.clients.remove(&client);
        }
    }
}
