//! Worker protocol tests
//!
//! Drives real worker threads over a `MessageBus` to check delivery,
//! authorization and the terminate/acknowledge handshake.

use ::treesync::protocol::{Address, Command, MessageBus, Side, WorkerRole};
use ::treesync::scanner::DiscoveredPath;
use ::treesync::worker::{AnalyzerWorker, ListerWorker};
use ::treesync::*;
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn test_shutdown_collects_one_ack_per_worker() {
    for workers in [1, 2, 5, 12] {
        let coordinator = Coordinator::spawn(&SyncConfig {
            worker_count: workers,
            ..Default::default()
        })
        .unwrap();
        let spawned = coordinator.worker_count();
        assert_eq!(spawned, 2 + 2 * coordinator.analyzers_per_side());

        let report = coordinator.shutdown().unwrap();
        assert_eq!(report.workers, spawned);
        assert_eq!(report.acknowledged, spawned);
    }
}

#[test]
fn test_terminate_after_ack_is_rejected() {
    let mut coordinator = Coordinator::spawn(&SyncConfig {
        worker_count: 6,
        ..Default::default()
    })
    .unwrap();

    for address in coordinator.worker_addresses() {
        coordinator.terminate(address).unwrap();
        let err = coordinator.terminate(address).unwrap_err();
        assert!(err.is_protocol_violation(), "{} accepted a second Terminate", address);
    }

    // Everything already acknowledged; nothing left to wait for
    let report = coordinator.shutdown().unwrap();
    assert_eq!(report.acknowledged, report.workers);
}

#[test]
fn test_repeated_parallel_builds() {
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("src");
    for i in 0..30 {
        let dir = src.join(format!("d{}", i % 4));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("f{}", i)), vec![b'z'; i]).unwrap();
    }
    let expected = TreeBuilder::new(&src).build().unwrap();

    for _ in 0..10 {
        let mut coordinator = Coordinator::spawn(&SyncConfig {
            worker_count: 10,
            use_content_hash: false,
            ..Default::default()
        })
        .unwrap();
        let (tree, _) = coordinator.build_trees(&src, &temp_dir.path().join("dst")).unwrap();
        assert_eq!(tree, expected);
        coordinator.shutdown().unwrap();
    }
}

#[test]
fn test_build_failure_shuts_workers_down() {
    let temp_dir = TempDir::new().unwrap();
    let not_a_dir = temp_dir.path().join("file");
    fs::write(&not_a_dir, b"x").unwrap();

    let mut coordinator = Coordinator::spawn(&SyncConfig {
        worker_count: 4,
        ..Default::default()
    })
    .unwrap();
    let err = coordinator.build_trees(&not_a_dir, temp_dir.path()).unwrap_err();
    assert!(matches!(err, SyncError::BuildFailed { .. }));

    // A second build on a torn-down pool is refused
    assert!(coordinator
        .build_trees(temp_dir.path(), temp_dir.path())
        .unwrap_err()
        .is_protocol_violation());
}

#[test]
fn test_analyzer_discards_work_queued_after_terminate() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f");
    fs::write(&file, b"data").unwrap();

    let bus = MessageBus::new(16);
    let coordinator = bus
        .register(Address::COORDINATOR, WorkerRole::Coordinator, None)
        .unwrap();
    let lister = bus
        .register(Address::lister(Side::Source), WorkerRole::Lister(Side::Source), Some(Address::COORDINATOR))
        .unwrap();
    let analyzer_addr = Address::analyzer(Side::Source, 0, 1);
    let inbox = bus
        .register(analyzer_addr, WorkerRole::Analyzer(Side::Source), Some(Address::COORDINATOR))
        .unwrap();

    let stub = DiscoveredPath {
        absolute_path: file.clone(),
        relative_path: "f".into(),
        entry_type: EntryType::RegularFile,
    };

    // Queue: one request, Terminate, then a request that must never be served
    lister.send(analyzer_addr, Command::AnalyzeFile(stub.clone())).unwrap();
    coordinator.send(analyzer_addr, Command::Terminate).unwrap();
    lister.send(analyzer_addr, Command::AnalyzeFile(stub)).unwrap();

    let handle = thread::spawn(move || AnalyzerWorker::new(inbox, Side::Source, Address::COORDINATOR, false).run());

    let first = coordinator.recv_timeout(WAIT).unwrap().unwrap();
    assert!(matches!(first.command, Command::FileAnalyzed(_)));
    let second = coordinator.recv_timeout(WAIT).unwrap().unwrap();
    assert!(matches!(second.command, Command::TerminateAck));
    assert_eq!(second.from, analyzer_addr);

    handle.join().unwrap().unwrap();
    assert!(coordinator.try_recv().is_none());
    assert!(!bus.is_registered(analyzer_addr));
}

#[test]
fn test_lister_interrupted_by_terminate() {
    let temp_dir = TempDir::new().unwrap();
    for i in 0..50 {
        fs::write(temp_dir.path().join(format!("f{:02}", i)), b"x").unwrap();
    }

    // Tiny inboxes so the lister blocks on its analyzer quickly
    let bus = MessageBus::new(2);
    let coordinator = bus
        .register(Address::COORDINATOR, WorkerRole::Coordinator, None)
        .unwrap();
    let lister_addr = Address::lister(Side::Source);
    let lister_inbox = bus
        .register(lister_addr, WorkerRole::Lister(Side::Source), Some(Address::COORDINATOR))
        .unwrap();
    let analyzer_addr = Address::analyzer(Side::Source, 0, 1);
    let analyzer_inbox = bus
        .register(analyzer_addr, WorkerRole::Analyzer(Side::Source), Some(Address::COORDINATOR))
        .unwrap();

    let lister = thread::spawn(move || ListerWorker::new(lister_inbox, Side::Source, vec![analyzer_addr]).run());
    let analyzer = thread::spawn(move || {
        AnalyzerWorker::new(analyzer_inbox, Side::Source, Address::COORDINATOR, false).run()
    });

    coordinator
        .send(lister_addr, Command::ListDirectory(temp_dir.path().to_path_buf()))
        .unwrap();
    coordinator.send(lister_addr, Command::Terminate).unwrap();
    coordinator.send(analyzer_addr, Command::Terminate).unwrap();

    // Collect until both acks are in; analysis replies may interleave
    let mut acks = Vec::new();
    let mut analyzed = 0;
    while acks.len() < 2 {
        let envelope = coordinator.recv_timeout(WAIT).unwrap().expect("worker stalled");
        match envelope.command {
            Command::TerminateAck => acks.push(envelope.from),
            Command::FileAnalyzed(_) | Command::EntrySkipped(_) => analyzed += 1,
            // The lister may finish, or trip over the departed analyzer, before it sees Terminate
            Command::ListComplete { .. } | Command::Failed { .. } => {}
            other => panic!("unexpected {}", other.tag()),
        }
    }
    acks.sort();
    assert_eq!(acks, vec![lister_addr, analyzer_addr]);
    assert!(analyzed <= 50);

    lister.join().unwrap().unwrap();
    analyzer.join().unwrap().unwrap();
    assert!(bus.children(Address::COORDINATOR).is_empty());
}

#[test]
fn test_foreign_terminate_rejected() {
    let bus = MessageBus::new(4);
    let _coordinator = bus
        .register(Address::COORDINATOR, WorkerRole::Coordinator, None)
        .unwrap();
    let source_lister = bus
        .register(Address::lister(Side::Source), WorkerRole::Lister(Side::Source), Some(Address::COORDINATOR))
        .unwrap();
    let destination_lister = bus
        .register(
            Address::lister(Side::Destination),
            WorkerRole::Lister(Side::Destination),
            Some(Address::COORDINATOR),
        )
        .unwrap();

    let err = source_lister
        .send(destination_lister.address(), Command::Terminate)
        .unwrap_err();
    assert!(err.is_protocol_violation());

    let err = destination_lister
        .send(Address::COORDINATOR, Command::TerminateAck)
        .unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(bus.role(Address::COORDINATOR), Some(WorkerRole::Coordinator));
}
