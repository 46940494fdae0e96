//! Lister and analyzer workers
//!
//! Workers run on their own threads and talk to the rest of the system only
//! through their [`Mailbox`]. Each loop blocks on its own inbox, handles one
//! message at a time and exits after acknowledging `Terminate`.
//!
//! - A [`ListerWorker`] walks one side's root and spreads `AnalyzeFile`
//!   requests round-robin over that side's analyzers, then reports
//!   `ListComplete` with the number of requests it sent.
//! - An [`AnalyzerWorker`] turns each request into a `FileEntry` and replies
//!   to the coordinator.
//!
//! Once a worker observes `Terminate` it does not serve any request still
//! queued behind it; those are discarded before the ack is sent.

use crate::error::{Result, SyncError};
use crate::protocol::{Address, Command, Envelope, Mailbox, Side};
use crate::scanner::{self, DiscoveredPath};
use crate::utils;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, trace, warn};

/// How a listing ended
enum ListOutcome {
    /// Every path was dispatched
    Completed(usize),
    /// `Terminate` arrived mid-walk; carries the sender to acknowledge
    Interrupted(Address),
}

/// Worker enumerating one side's directory tree
pub struct ListerWorker {
    mailbox: Mailbox,
    side: Side,
    analyzers: Vec<Address>,
    next_analyzer: usize,
    pending: VecDeque<Envelope>,
}

impl ListerWorker {
    /// Create a lister feeding `analyzers`
    pub fn new(mailbox: Mailbox, side: Side, analyzers: Vec<Address>) -> Self {
        Self {
            mailbox,
            side,
            analyzers,
            next_analyzer: 0,
            pending: VecDeque::new(),
        }
    }

    /// Serve requests until terminated
    pub fn run(mut self) -> Result<()> {
        debug!("Lister {} ({}) started with {} analyzers", self.mailbox.address(), self.side, self.analyzers.len());

        loop {
            let envelope = match self.pending.pop_front() {
                Some(envelope) => envelope,
                None => self.mailbox.recv()?,
            };

            match envelope.command {
                Command::ListDirectory(root) => match self.list(&root) {
                    Ok(ListOutcome::Completed(dispatched)) => {
                        debug!("Lister {} dispatched {} paths under {:?}", self.side, dispatched, root);
                        self.mailbox.send(envelope.from, Command::ListComplete { dispatched })?;
                    }
                    Ok(ListOutcome::Interrupted(parent)) => {
                        debug!("Lister {} interrupted while walking {:?}", self.side, root);
                        return self.acknowledge(parent);
                    }
                    Err(e) => {
                        warn!("Lister {} failed on {:?}: {}", self.side, root, e);
                        self.mailbox.send(
                            envelope.from,
                            Command::Failed { path: root, reason: e.to_string() },
                        )?;
                    }
                },
                Command::Terminate => return self.acknowledge(envelope.from),
                other => {
                    warn!("Lister {} received unexpected {} from {}", self.side, other.tag(), envelope.from);
                    self.mailbox.send(
                        envelope.from,
                        Command::Failed {
                            path: Default::default(),
                            reason: format!("lister cannot handle {}", other.tag()),
                        },
                    )?;
                }
            }
        }
    }

    /// Walk `root` and dispatch every path to an analyzer
    fn list(&mut self, root: &Path) -> Result<ListOutcome> {
        if self.analyzers.is_empty() {
            return Err(SyncError::internal("lister has no analyzers"));
        }
        if !scanner::check_root(root, self.side == Side::Destination)? {
            return Ok(ListOutcome::Completed(0));
        }

        let mut dispatched = 0usize;
        let mut interrupted_by = None;

        let walk = scanner::enumerate(root, |found| {
            // Terminate takes effect mid-walk; anything else waits its turn
            while let Some(envelope) = self.mailbox.try_recv() {
                if matches!(envelope.command, Command::Terminate) {
                    interrupted_by = Some(envelope.from);
                    return Err(SyncError::internal("listing interrupted"));
                }
                self.pending.push_back(envelope);
            }

            let target = self.analyzers[self.next_analyzer % self.analyzers.len()];
            self.next_analyzer = self.next_analyzer.wrapping_add(1);
            trace!("Dispatching {:?} to {}", found.relative_path, target);
            self.mailbox.send(target, Command::AnalyzeFile(found))?;
            dispatched += 1;
            Ok(())
        });

        match (walk, interrupted_by) {
            (_, Some(parent)) => Ok(ListOutcome::Interrupted(parent)),
            (Ok(_), None) => Ok(ListOutcome::Completed(dispatched)),
            (Err(e), None) => Err(e),
        }
    }

    fn acknowledge(self, parent: Address) -> Result<()> {
        let discarded = drain(&self.mailbox) + self.pending.len();
        if discarded > 0 {
            debug!("Lister {} discarded {} queued messages", self.side, discarded);
        }
        self.mailbox.send(parent, Command::TerminateAck)
    }
}

/// Worker reading metadata and fingerprints for one side
pub struct AnalyzerWorker {
    mailbox: Mailbox,
    side: Side,
    reply_to: Address,
    use_content_hash: bool,
}

impl AnalyzerWorker {
    /// Create an analyzer replying to `reply_to`
    pub fn new(mailbox: Mailbox, side: Side, reply_to: Address, use_content_hash: bool) -> Self {
        Self {
            mailbox,
            side,
            reply_to,
            use_content_hash,
        }
    }

    /// Serve requests until terminated
    pub fn run(self) -> Result<()> {
        let mut analyzed = 0usize;

        loop {
            let envelope = self.mailbox.recv()?;
            match envelope.command {
                Command::AnalyzeFile(stub) => {
                    let reply = self.analyze(stub);
                    analyzed += 1;
                    self.mailbox.send(self.reply_to, reply)?;
                }
                Command::Terminate => {
                    let discarded = drain(&self.mailbox);
                    debug!(
                        "Analyzer {} ({}) stopping after {} entries, {} discarded",
                        self.mailbox.address(),
                        self.side,
                        analyzed,
                        discarded
                    );
                    return self.mailbox.send(envelope.from, Command::TerminateAck);
                }
                other => {
                    warn!("Analyzer {} received unexpected {} from {}", self.side, other.tag(), envelope.from);
                    self.mailbox.send(
                        self.reply_to,
                        Command::Failed {
                            path: Default::default(),
                            reason: format!("analyzer cannot handle {}", other.tag()),
                        },
                    )?;
                }
            }
        }
    }

    fn analyze(&self, stub: DiscoveredPath) -> Command {
        match utils::analyze_entry(&stub.absolute_path, &stub.relative_path, self.use_content_hash) {
            Ok(Some(entry)) => Command::FileAnalyzed(entry),
            Ok(None) => Command::EntrySkipped(stub.relative_path),
            Err(SyncError::PathNotFound { .. }) => {
                warn!("Entry vanished before it could be read: {:?}", stub.absolute_path);
                Command::EntrySkipped(stub.relative_path)
            }
            Err(e) => Command::Failed {
                path: stub.absolute_path,
                reason: e.to_string(),
            },
        }
    }
}

/// Discard everything queued in `mailbox`, returning how many were dropped
fn drain(mailbox: &Mailbox) -> usize {
    let mut discarded = 0;
    while let Some(envelope) = mailbox.try_recv() {
        trace!("Discarding {} from {}", envelope.command.tag(), envelope.from);
        discarded += 1;
    }
    discarded
}
