//! Worker message protocol
//!
//! In parallel mode the coordinator and its workers share nothing but a
//! [`MessageBus`]. Every participant registers under a fixed logical
//! [`Address`] and owns the [`Mailbox`] for that address; a receive only ever
//! returns messages addressed to the caller.
//!
//! ## Delivery
//!
//! - Messages between one sender and one recipient arrive in send order.
//!   There is no ordering across different sender/recipient pairs.
//! - Worker inboxes are bounded, so a send blocks once the recipient is
//!   `capacity` messages behind. The coordinator's inbox is unbounded so
//!   that replies never block a worker.
//!
//! ## Termination rules
//!
//! The bus enforces the shutdown handshake:
//!
//! - `Terminate` is accepted only from the recipient's registered parent,
//!   and only once per worker.
//! - `TerminateAck` is accepted only from a worker with a pending
//!   `Terminate`, addressed to that worker's parent.
//! - Once an ack has been delivered the worker is deregistered; any further
//!   message to it, including a second `Terminate`, is a protocol violation.
//!
//! ```text
//!  coordinator(1) --ListDirectory--> lister(2|3) --AnalyzeFile--> analyzer(16..)
//!        ^                               |                            |
//!        +---------- ListComplete -------+                            |
//!        +---------------------- FileAnalyzed / Failed ---------------+
//! ```

use crate::error::{Result, SyncError};
use crate::scanner::DiscoveredPath;
use crate::types::FileEntry;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Stable logical address of a protocol participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u32);

impl Address {
    /// The coordinator
    pub const COORDINATOR: Address = Address(1);

    /// First address handed out to analyzers
    const FIRST_ANALYZER: u32 = 16;

    /// Address of the lister serving `side`
    pub fn lister(side: Side) -> Address {
        match side {
            Side::Source => Address(2),
            Side::Destination => Address(3),
        }
    }

    /// Address of analyzer `index` (0-based) serving `side`
    pub fn analyzer(side: Side, index: usize, per_side: usize) -> Address {
        let offset = match side {
            Side::Source => index,
            Side::Destination => per_side + index,
        };
        Address(Self::FIRST_ANALYZER + offset as u32)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Which tree a worker builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The tree being copied from
    Source,
    /// The tree being copied into
    Destination,
}

impl Side {
    /// Both sides, source first
    pub const ALL: [Side; 2] = [Side::Source, Side::Destination];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// Role a participant plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Spawns workers, routes requests, collects results
    Coordinator,
    /// Enumerates one side's directory tree
    Lister(Side),
    /// Reads metadata and fingerprints for one side
    Analyzer(Side),
}

/// Message payload
#[derive(Debug, Clone)]
pub enum Command {
    /// Enumerate the tree under this root
    ListDirectory(PathBuf),
    /// Read metadata for a discovered path
    AnalyzeFile(DiscoveredPath),
    /// Fully populated entry produced by an analyzer
    FileAnalyzed(FileEntry),
    /// An analyzed path was left out of the tree (vanished or not a file/directory)
    EntrySkipped(PathBuf),
    /// A lister finished; `dispatched` analyze requests were sent
    ListComplete {
        /// Number of `AnalyzeFile` messages sent for this listing
        dispatched: usize,
    },
    /// A worker hit a fatal error for this path
    Failed {
        /// Path being processed
        path: PathBuf,
        /// Error description
        reason: String,
    },
    /// Stop and acknowledge
    Terminate,
    /// Acknowledgement of `Terminate`
    TerminateAck,
}

impl Command {
    /// Short tag used in logs and violation messages
    pub fn tag(&self) -> &'static str {
        match self {
            Command::ListDirectory(_) => "ListDirectory",
            Command::AnalyzeFile(_) => "AnalyzeFile",
            Command::FileAnalyzed(_) => "FileAnalyzed",
            Command::EntrySkipped(_) => "EntrySkipped",
            Command::ListComplete { .. } => "ListComplete",
            Command::Failed { .. } => "Failed",
            Command::Terminate => "Terminate",
            Command::TerminateAck => "TerminateAck",
        }
    }
}

/// An addressed message
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sender
    pub from: Address,
    /// Recipient
    pub to: Address,
    /// Payload
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Live,
    Terminating,
}

#[derive(Debug)]
struct Registration {
    role: WorkerRole,
    parent: Option<Address>,
    sender: Sender<Envelope>,
    lifecycle: Lifecycle,
}

/// Shared, addressed message channel
///
/// Owned by the coordinator; workers hold it through their [`Mailbox`].
#[derive(Debug)]
pub struct MessageBus {
    capacity: usize,
    registry: RwLock<HashMap<Address, Registration>>,
}

impl MessageBus {
    /// Create a bus whose worker inboxes hold up to `capacity` messages
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            registry: RwLock::new(HashMap::new()),
        })
    }

    /// Register `address` and return its mailbox
    ///
    /// `parent` is the only participant allowed to terminate it.
    pub fn register(
        self: &Arc<Self>,
        address: Address,
        role: WorkerRole,
        parent: Option<Address>,
    ) -> Result<Mailbox> {
        let mut registry = self.registry.write();
        if registry.contains_key(&address) {
            return Err(SyncError::protocol(format!("address {} is already registered", address)));
        }
        if let Some(parent) = parent {
            if !registry.contains_key(&parent) {
                return Err(SyncError::protocol(format!(
                    "parent {} of {} is not registered",
                    parent, address
                )));
            }
        }

        let (sender, receiver) = match role {
            WorkerRole::Coordinator => crossbeam_channel::unbounded(),
            _ => crossbeam_channel::bounded(self.capacity),
        };
        registry.insert(
            address,
            Registration {
                role,
                parent,
                sender,
                lifecycle: Lifecycle::Live,
            },
        );
        trace!("Registered {:?} at {}", role, address);

        Ok(Mailbox {
            address,
            receiver,
            bus: Arc::clone(self),
        })
    }

    /// Deliver `command` from `from` to `to`
    ///
    /// Blocks only while a bounded recipient inbox is full.
    ///
    /// # Errors
    ///
    /// [`SyncError::ProtocolViolation`] if either endpoint is unknown, the
    /// termination rules are broken, or the recipient has gone away.
    pub fn send(&self, from: Address, to: Address, command: Command) -> Result<()> {
        let sender = match &command {
            Command::Terminate => self.authorize_terminate(from, to)?,
            Command::TerminateAck => self.authorize_ack(from, to)?,
            _ => self.route(from, to)?,
        };

        trace!("{} -> {}: {}", from, to, command.tag());
        let tag = command.tag();
        sender
            .send(Envelope { from, to, command })
            .map_err(|_| SyncError::protocol(format!("{} has dropped its mailbox ({} from {})", to, tag, from)))
    }

    /// Whether `address` is currently registered
    pub fn is_registered(&self, address: Address) -> bool {
        self.registry.read().contains_key(&address)
    }

    /// Role registered at `address`
    pub fn role(&self, address: Address) -> Option<WorkerRole> {
        self.registry.read().get(&address).map(|r| r.role)
    }

    /// Registered children of `parent`
    pub fn children(&self, parent: Address) -> Vec<Address> {
        let mut children: Vec<Address> = self
            .registry
            .read()
            .iter()
            .filter(|(_, r)| r.parent == Some(parent))
            .map(|(a, _)| *a)
            .collect();
        children.sort();
        children
    }

    fn route(&self, from: Address, to: Address) -> Result<Sender<Envelope>> {
        let registry = self.registry.read();
        if !registry.contains_key(&from) {
            return Err(SyncError::protocol(format!("sender {} is not registered", from)));
        }
        registry
            .get(&to)
            .map(|r| r.sender.clone())
            .ok_or_else(|| SyncError::protocol(format!("no live endpoint at {}", to)))
    }

    fn authorize_terminate(&self, from: Address, to: Address) -> Result<Sender<Envelope>> {
        let mut registry = self.registry.write();
        let target = registry
            .get_mut(&to)
            .ok_or_else(|| SyncError::protocol(format!("Terminate to {}: not a live worker", to)))?;

        if target.parent != Some(from) {
            return Err(SyncError::protocol(format!(
                "Terminate to {} rejected: {} is not its parent",
                to, from
            )));
        }
        if target.lifecycle == Lifecycle::Terminating {
            return Err(SyncError::protocol(format!(
                "Terminate to {} rejected: already terminating",
                to
            )));
        }

        target.lifecycle = Lifecycle::Terminating;
        Ok(target.sender.clone())
    }

    fn authorize_ack(&self, from: Address, to: Address) -> Result<Sender<Envelope>> {
        let mut registry = self.registry.write();
        let sender_reg = registry
            .get(&from)
            .ok_or_else(|| SyncError::protocol(format!("TerminateAck from unknown {}", from)))?;

        if sender_reg.parent != Some(to) {
            return Err(SyncError::protocol(format!(
                "TerminateAck from {} rejected: {} is not its parent",
                from, to
            )));
        }
        if sender_reg.lifecycle != Lifecycle::Terminating {
            return Err(SyncError::protocol(format!(
                "TerminateAck from {} rejected: no Terminate pending",
                from
            )));
        }

        let recipient = registry
            .get(&to)
            .map(|r| r.sender.clone())
            .ok_or_else(|| SyncError::protocol(format!("no live endpoint at {}", to)))?;

        registry.remove(&from);
        trace!("Deregistered {}", from);
        Ok(recipient)
    }
}

/// A participant's inbox and send handle
#[derive(Debug)]
pub struct Mailbox {
    address: Address,
    receiver: Receiver<Envelope>,
    bus: Arc<MessageBus>,
}

impl Mailbox {
    /// Address this mailbox receives for
    pub fn address(&self) -> Address {
        self.address
    }

    /// The bus this mailbox belongs to
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Send `command` to `to` from this mailbox's address
    pub fn send(&self, to: Address, command: Command) -> Result<()> {
        self.bus.send(self.address, to, command)
    }

    /// Block until a message for this address arrives
    pub fn recv(&self) -> Result<Envelope> {
        self.receiver
            .recv()
            .map_err(|_| SyncError::protocol(format!("mailbox {} disconnected", self.address)))
    }

    /// Wait up to `timeout` for a message; `Ok(None)` on timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::protocol(format!(
                "mailbox {} disconnected",
                self.address
            ))),
        }
    }

    /// Take a queued message without blocking
    pub fn try_recv(&self) -> Option<Envelope> {
        match self.receiver.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
