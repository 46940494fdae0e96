//! Worker coordination for parallel tree building
//!
//! The [`Coordinator`] owns the [`MessageBus`], spawns one lister and a pool
//! of analyzers per side, and reassembles the analyzed entries into two
//! [`FileTree`]s.
//!
//! ## Completion
//!
//! Replies from different analyzers interleave arbitrarily, so the trees are
//! rebuilt by sorted insertion rather than arrival order. A side is complete
//! once its lister has reported `ListComplete { dispatched }` and exactly
//! `dispatched` replies (`FileAnalyzed` or `EntrySkipped`) have arrived for
//! it; the two events may happen in either order.
//!
//! ## Shutdown
//!
//! Every worker is sent `Terminate` and must answer with one `TerminateAck`
//! before its thread is joined. The bus is dropped only after all workers
//! have been accounted for. Any `Failed` message or unexpected tag during a
//! build aborts the run and triggers the same shutdown.
//!
//! There are no protocol timeouts: a worker that hangs stalls the run. A
//! worker thread that dies without acknowledging is detected and reported.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::coordinator::Coordinator;
//! use treesync::types::SyncConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig { worker_count: 6, ..Default::default() };
//! let mut coordinator = Coordinator::spawn(&config)?;
//! let (source, destination) = coordinator.build_trees(Path::new("./src"), Path::new("./dst"))?;
//! let report = coordinator.shutdown()?;
//! assert_eq!(report.workers, report.acknowledged);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SyncError};
use crate::protocol::{Address, Command, Envelope, Mailbox, MessageBus, Side, WorkerRole};
use crate::tree::FileTree;
use crate::types::{ShutdownReport, SyncConfig};
use crate::worker::{AnalyzerWorker, ListerWorker};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

/// Capacity of each worker inbox
const WORKER_INBOX_CAPACITY: usize = 1024;

/// How often a blocked receive checks whether worker threads are still alive
const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// A spawned worker and its bookkeeping
#[derive(Debug)]
struct WorkerHandle {
    address: Address,
    role: WorkerRole,
    thread: Option<JoinHandle<Result<()>>>,
    acknowledged: bool,
}

impl WorkerHandle {
    fn is_finished(&self) -> bool {
        self.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

/// Per-side reassembly state
#[derive(Debug)]
struct SideProgress {
    tree: FileTree,
    dispatched: Option<usize>,
    received: usize,
}

impl SideProgress {
    fn is_complete(&self) -> bool {
        self.dispatched == Some(self.received)
    }
}

/// Owner of the message bus and every worker thread
#[derive(Debug)]
pub struct Coordinator {
    bus: Option<Arc<MessageBus>>,
    mailbox: Option<Mailbox>,
    workers: Vec<WorkerHandle>,
    analyzers_per_side: usize,
    shut_down: bool,
}

impl Coordinator {
    /// Create the bus and spawn listers and analyzers for both sides
    ///
    /// Spawns two listers plus `config.analyzers_per_side()` analyzers per
    /// side.
    ///
    /// # Errors
    ///
    /// [`SyncError::ResourceExhausted`] if a worker thread cannot be spawned.
    /// Workers that were already started are shut down before returning.
    #[instrument(skip(config), fields(workers = config.worker_count))]
    pub fn spawn(config: &SyncConfig) -> Result<Self> {
        let bus = MessageBus::new(WORKER_INBOX_CAPACITY);
        let mailbox = bus.register(Address::COORDINATOR, WorkerRole::Coordinator, None)?;
        let per_side = config.analyzers_per_side();

        let mut coordinator = Self {
            bus: Some(Arc::clone(&bus)),
            mailbox: Some(mailbox),
            workers: Vec::with_capacity(2 + 2 * per_side),
            analyzers_per_side: per_side,
            shut_down: false,
        };

        for side in Side::ALL {
            let mut analyzers = Vec::with_capacity(per_side);
            for index in 0..per_side {
                let address = Address::analyzer(side, index, per_side);
                let role = WorkerRole::Analyzer(side);
                let inbox = bus.register(address, role, Some(Address::COORDINATOR))?;
                let worker = AnalyzerWorker::new(inbox, side, Address::COORDINATOR, config.use_content_hash);
                coordinator.launch(address, role, format!("analyzer-{}-{}", side, index), move || worker.run())?;
                analyzers.push(address);
            }

            let address = Address::lister(side);
            let role = WorkerRole::Lister(side);
            let inbox = bus.register(address, role, Some(Address::COORDINATOR))?;
            let worker = ListerWorker::new(inbox, side, analyzers);
            coordinator.launch(address, role, format!("lister-{}", side), move || worker.run())?;
        }

        info!(
            "Spawned {} workers (2 listers, {} analyzers per side)",
            coordinator.workers.len(),
            per_side
        );
        Ok(coordinator)
    }

    fn launch<F>(&mut self, address: Address, role: WorkerRole, name: String, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let thread = thread::Builder::new()
            .name(name)
            .spawn(body)
            .map_err(|e| SyncError::ResourceExhausted(format!("cannot spawn worker thread: {}", e)))?;

        self.workers.push(WorkerHandle {
            address,
            role,
            thread: Some(thread),
            acknowledged: false,
        });
        Ok(())
    }

    /// Number of spawned workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Analyzers serving each side
    pub fn analyzers_per_side(&self) -> usize {
        self.analyzers_per_side
    }

    /// Addresses of every spawned worker
    pub fn worker_addresses(&self) -> Vec<Address> {
        self.workers.iter().map(|w| w.address).collect()
    }

    /// Build the source and destination trees with the worker pool
    ///
    /// A missing destination root produces an empty tree. On any failure the
    /// workers are shut down and the error is returned; no partial tree is
    /// ever handed out.
    #[instrument(skip(self))]
    pub fn build_trees(&mut self, source_root: &Path, destination_root: &Path) -> Result<(FileTree, FileTree)> {
        let start = Instant::now();
        match self.collect_trees(source_root, destination_root) {
            Ok(trees) => {
                debug!(
                    "Parallel build finished in {:?}: {} source, {} destination entries",
                    start.elapsed(),
                    trees.0.len(),
                    trees.1.len()
                );
                Ok(trees)
            }
            Err(e) => {
                error!("Aborting parallel build: {}", e);
                if let Err(shutdown_err) = self.shutdown_workers() {
                    warn!("Shutdown after abort failed: {}", shutdown_err);
                }
                Err(e)
            }
        }
    }

    fn collect_trees(&mut self, source_root: &Path, destination_root: &Path) -> Result<(FileTree, FileTree)> {
        if self.shut_down {
            return Err(SyncError::protocol("coordinator has already been shut down"));
        }

        let mut progress = [
            SideProgress {
                tree: FileTree::new(source_root.to_path_buf()),
                dispatched: None,
                received: 0,
            },
            SideProgress {
                tree: FileTree::new(destination_root.to_path_buf()),
                dispatched: None,
                received: 0,
            },
        ];

        {
            let mailbox = self.mailbox()?;
            mailbox.send(Address::lister(Side::Source), Command::ListDirectory(source_root.to_path_buf()))?;
            mailbox.send(
                Address::lister(Side::Destination),
                Command::ListDirectory(destination_root.to_path_buf()),
            )?;
        }

        while !progress.iter().all(SideProgress::is_complete) {
            let envelope = self.next_message()?;
            let role = self
                .role_of(envelope.from)
                .ok_or_else(|| SyncError::protocol(format!("message from unknown sender {}", envelope.from)))?;

            match (envelope.command, role) {
                (Command::FileAnalyzed(entry), WorkerRole::Analyzer(side)) => {
                    let side_progress = &mut progress[side_index(side)];
                    side_progress.received += 1;
                    trace!("{} entry {:?} from {}", side, entry.relative_path, envelope.from);
                    let path = entry.relative_path.clone();
                    if !side_progress.tree.insert(entry) {
                        return Err(SyncError::protocol(format!("duplicate {} entry {:?}", side, path)));
                    }
                    check_overrun(side, side_progress)?;
                }
                (Command::EntrySkipped(path), WorkerRole::Analyzer(side)) => {
                    let side_progress = &mut progress[side_index(side)];
                    side_progress.received += 1;
                    trace!("{} entry {:?} skipped", side, path);
                    check_overrun(side, side_progress)?;
                }
                (Command::ListComplete { dispatched }, WorkerRole::Lister(side)) => {
                    let side_progress = &mut progress[side_index(side)];
                    if side_progress.dispatched.is_some() {
                        return Err(SyncError::protocol(format!("second ListComplete from {} lister", side)));
                    }
                    debug!("{} lister complete: {} paths dispatched", side, dispatched);
                    side_progress.dispatched = Some(dispatched);
                    check_overrun(side, side_progress)?;
                }
                (Command::Failed { path, reason }, _) => {
                    return Err(SyncError::build_failed(path, reason));
                }
                (command, role) => {
                    return Err(SyncError::protocol(format!(
                        "unexpected {} from {:?} at {}",
                        command.tag(),
                        role,
                        envelope.from
                    )));
                }
            }
        }

        let [source, destination] = progress;
        Ok((source.tree, destination.tree))
    }

    /// Terminate one worker and wait for its acknowledgement
    ///
    /// # Errors
    ///
    /// [`SyncError::ProtocolViolation`] if `address` is not a live child of
    /// this coordinator, including a worker that has already acknowledged.
    pub fn terminate(&mut self, address: Address) -> Result<()> {
        self.mailbox()?.send(address, Command::Terminate)?;
        let mut outstanding = HashSet::from([address]);
        self.await_acks(&mut outstanding)
    }

    /// Terminate every worker, collect all acknowledgements and release the bus
    #[instrument(skip(self))]
    pub fn shutdown(mut self) -> Result<ShutdownReport> {
        self.shutdown_workers()
    }

    fn shutdown_workers(&mut self) -> Result<ShutdownReport> {
        let workers = self.workers.len();
        if self.shut_down {
            return Ok(ShutdownReport {
                workers,
                acknowledged: self.acknowledged(),
            });
        }
        self.shut_down = true;

        let mut first_error: Option<SyncError> = None;
        let mut outstanding = HashSet::new();

        if let Some(mailbox) = &self.mailbox {
            for worker in self.workers.iter().filter(|w| !w.acknowledged) {
                match mailbox.send(worker.address, Command::Terminate) {
                    Ok(()) => {
                        outstanding.insert(worker.address);
                    }
                    Err(e) => {
                        warn!("Could not terminate {}: {}", worker.address, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        if let Err(e) = self.await_acks(&mut outstanding) {
            first_error.get_or_insert(e);
        }

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                match thread.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Worker {} exited with error: {}", worker.address, e);
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error.get_or_insert(SyncError::WorkerPanicked(format!(
                            "{:?} at {}",
                            worker.role, worker.address
                        )));
                    }
                }
            }
        }

        // Every worker is joined; nothing can use the channel any more
        self.mailbox = None;
        self.bus = None;

        let report = ShutdownReport {
            workers,
            acknowledged: self.acknowledged(),
        };
        info!("Shut down {}/{} workers", report.acknowledged, report.workers);

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Wait until every address in `outstanding` has acknowledged
    fn await_acks(&mut self, outstanding: &mut HashSet<Address>) -> Result<()> {
        while !outstanding.is_empty() {
            let envelope = match self.mailbox()?.recv_timeout(LIVENESS_POLL)? {
                Some(envelope) => envelope,
                None => {
                    // Drain anything that raced with the timeout before declaring a worker dead
                    while let Some(envelope) = self.mailbox()?.try_recv() {
                        self.record_ack(envelope, outstanding)?;
                    }
                    if let Some(dead) = self
                        .workers
                        .iter()
                        .find(|w| outstanding.contains(&w.address) && w.is_finished())
                    {
                        let address = dead.address;
                        outstanding.remove(&address);
                        return Err(SyncError::WorkerPanicked(format!(
                            "{} exited without acknowledging Terminate",
                            address
                        )));
                    }
                    continue;
                }
            };
            self.record_ack(envelope, outstanding)?;
        }
        Ok(())
    }

    fn record_ack(&mut self, envelope: Envelope, outstanding: &mut HashSet<Address>) -> Result<()> {
        match envelope.command {
            Command::TerminateAck => {
                if !outstanding.remove(&envelope.from) {
                    return Err(SyncError::protocol(format!("unexpected TerminateAck from {}", envelope.from)));
                }
                if let Some(worker) = self.workers.iter_mut().find(|w| w.address == envelope.from) {
                    worker.acknowledged = true;
                }
                trace!("TerminateAck from {}", envelope.from);
            }
            other => trace!("Discarding late {} from {}", other.tag(), envelope.from),
        }
        Ok(())
    }

    /// Receive the next message, failing if a worker died while we wait
    fn next_message(&self) -> Result<Envelope> {
        let mailbox = self.mailbox()?;
        loop {
            if let Some(envelope) = mailbox.recv_timeout(LIVENESS_POLL)? {
                return Ok(envelope);
            }
            if let Some(dead) = self.workers.iter().find(|w| !w.acknowledged && w.is_finished()) {
                return Err(SyncError::WorkerPanicked(format!(
                    "{:?} at {} stopped unexpectedly",
                    dead.role, dead.address
                )));
            }
        }
    }

    fn role_of(&self, address: Address) -> Option<WorkerRole> {
        self.workers.iter().find(|w| w.address == address).map(|w| w.role)
    }

    fn acknowledged(&self) -> usize {
        self.workers.iter().filter(|w| w.acknowledged).count()
    }

    fn mailbox(&self) -> Result<&Mailbox> {
        self.mailbox
            .as_ref()
            .ok_or_else(|| SyncError::protocol("coordinator mailbox already released"))
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(e) = self.shutdown_workers() {
                warn!("Best-effort worker shutdown failed: {}", e);
            }
        }
    }
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Source => 0,
        Side::Destination => 1,
    }
}

fn check_overrun(side: Side, progress: &SideProgress) -> Result<()> {
    match progress.dispatched {
        Some(dispatched) if progress.received > dispatched => Err(SyncError::protocol(format!(
            "{} side received {} replies for {} dispatched paths",
            side, progress.received, dispatched
        ))),
        _ => Ok(()),
    }
}
