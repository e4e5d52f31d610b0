//! Watch loops and the registry, end to end.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bw_core::{Backend, ChangeSet, WatchTarget};
use bw_watcher::{
    ChangeConsumer, DirectoryWatcher, LoopState, Readiness, ReadinessFlag, StartupBarrier,
    UpsertOutcome, WatchContext, WatchRegistry,
};
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender};
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(40);
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(400);

/// Forwards every delivery to a channel.
struct Collector {
    tx: Sender<(String, Vec<Utf8PathBuf>)>,
}

impl ChangeConsumer for Collector {
    fn on_changes(&self, identity: &str, changes: &ChangeSet) -> anyhow::Result<()> {
        let paths = changes.iter().cloned().collect();
        self.tx.send((identity.to_owned(), paths))?;
        Ok(())
    }
}

fn collector() -> (Arc<Collector>, Receiver<(String, Vec<Utf8PathBuf>)>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Arc::new(Collector { tx }), rx)
}

fn temp_root() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().canonicalize().unwrap()).unwrap();
    (temp, root)
}

fn target(root: &Utf8Path) -> WatchTarget {
    WatchTarget::new("test", root.to_owned())
        .with_poll_interval(POLL)
        .with_backend(Backend::Poll)
}

#[test]
fn test_initial_scan_is_delivered_before_start_returns() {
    let (_temp, root) = temp_root();
    fs::write(root.join("a.jar"), "a").unwrap();
    let (consumer, rx) = collector();

    let watcher = DirectoryWatcher::new(target(&root), WatchContext::new(consumer)).unwrap();
    watcher.start().unwrap();

    let (identity, paths) = rx.try_recv().unwrap();
    assert_eq!(identity, "test");
    assert_eq!(paths, vec![root.join("a.jar")]);
    watcher.close();
}

#[test]
fn test_running_loop_delivers_stable_files_and_removals() {
    let (_temp, root) = temp_root();
    let (consumer, rx) = collector();
    let watcher = DirectoryWatcher::new(target(&root), WatchContext::new(consumer)).unwrap();
    watcher.start().unwrap();

    fs::write(root.join("b.jar"), "b").unwrap();
    let (_, paths) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(paths, vec![root.join("b.jar")]);

    fs::remove_file(root.join("b.jar")).unwrap();
    let (_, paths) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(paths, vec![root.join("b.jar")]);

    assert!(rx.recv_timeout(QUIET).is_err());
    watcher.close();
    assert_eq!(watcher.state(), LoopState::Closed);
}

#[test]
fn test_loop_waits_for_startup_barrier() {
    let (_temp, root) = temp_root();
    fs::write(root.join("a.jar"), "a").unwrap();
    let (consumer, rx) = collector();
    let barrier = Arc::new(StartupBarrier::new());
    let context = WatchContext::new(consumer).with_barrier(Arc::clone(&barrier));

    let startup = barrier.hold();
    let watcher = DirectoryWatcher::new(target(&root), context).unwrap();
    // The initial delivery runs on this thread, which holds the write side.
    watcher.start().unwrap();
    assert!(rx.try_recv().is_ok());

    fs::write(root.join("b.jar"), "b").unwrap();
    assert!(rx.recv_timeout(QUIET).is_err());

    drop(startup);
    let (_, paths) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(paths, vec![root.join("b.jar")]);
    watcher.close();
}

#[test]
fn test_loop_skips_scans_until_host_is_ready() {
    let (_temp, root) = temp_root();
    let (consumer, rx) = collector();
    let ready = Arc::new(ReadinessFlag::new());
    let gate: Arc<dyn Readiness> = Arc::<ReadinessFlag>::clone(&ready);
    let context = WatchContext::new(consumer).with_readiness(gate);

    let watcher = DirectoryWatcher::new(target(&root), context).unwrap();
    watcher.start().unwrap();

    fs::write(root.join("a.jar"), "a").unwrap();
    assert!(rx.recv_timeout(QUIET).is_err());

    ready.set_ready(true);
    let (_, paths) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(paths, vec![root.join("a.jar")]);
    watcher.close();
}

#[test]
fn test_consumer_failures_do_not_stop_the_loop() {
    let (_temp, root) = temp_root();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = crossbeam_channel::unbounded();

    let counter = Arc::clone(&calls);
    let consumer = move |_: &str, changes: &ChangeSet| -> anyhow::Result<()> {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => anyhow::bail!("repository unavailable"),
            1 => panic!("consumer bug"),
            _ => {
                tx.send(changes.len())?;
                Ok(())
            }
        }
    };

    let watcher = DirectoryWatcher::new(target(&root), WatchContext::new(Arc::new(consumer))).unwrap();
    watcher.start().unwrap();

    let mut delivered = false;
    for index in 0..20 {
        fs::write(root.join(format!("{index}.jar")), "x").unwrap();
        if rx.recv_timeout(POLL * 5).is_ok() {
            delivered = true;
            break;
        }
    }

    assert!(delivered);
    assert!(calls.load(Ordering::SeqCst) >= 3);
    watcher.close();
}

#[test]
fn test_registry_rebaseline_suppresses_redelivery() {
    let (_temp, root) = temp_root();
    let file = root.join("a.jar");
    fs::write(&file, "a").unwrap();
    let (consumer, rx) = collector();

    let registry = WatchRegistry::new(WatchContext::new(consumer));
    assert_eq!(registry.upsert_target(target(&root)).unwrap(), UpsertOutcome::Created);
    assert!(rx.try_recv().is_ok());

    // Simulates a consumer rewriting the artifact it was handed.
    fs::write(&file, "rewritten by consumer").unwrap();
    registry.update_checksum(&file);
    assert!(rx.recv_timeout(QUIET).is_err());

    registry.shutdown();
}

#[test]
fn test_registry_replacement_restarts_with_initial_scan() {
    let (_temp, root) = temp_root();
    fs::write(root.join("a.jar"), "a").unwrap();
    let (consumer, rx) = collector();
    let registry = WatchRegistry::new(WatchContext::new(consumer));

    registry.upsert_target(target(&root)).unwrap();
    assert!(rx.try_recv().is_ok());

    let slower = target(&root).with_poll_interval(POLL * 2);
    assert_eq!(registry.upsert_target(slower).unwrap(), UpsertOutcome::Replaced);
    let (_, paths) = rx.try_recv().unwrap();
    assert_eq!(paths, vec![root.join("a.jar")]);

    registry.shutdown();
    assert!(registry.is_empty());
}

#[test]
fn test_event_backend_loop_delivers_changes() {
    let (_temp, root) = temp_root();
    let (consumer, rx) = collector();
    let target = target(&root).with_backend(Backend::Event);

    let watcher = DirectoryWatcher::new(target, WatchContext::new(consumer)).unwrap();
    assert_eq!(watcher.backend(), Backend::Event);
    watcher.start().unwrap();

    fs::write(root.join("a.jar"), "a").unwrap();
    let (_, paths) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(paths, vec![root.join("a.jar")]);
    watcher.close();
}

#[test]
fn test_close_is_prompt() {
    let (_temp, root) = temp_root();
    let (consumer, _rx) = collector();
    let slow = target(&root).with_poll_interval(Duration::from_secs(3600));
    let watcher = DirectoryWatcher::new(slow, WatchContext::new(consumer)).unwrap();
    watcher.start().unwrap();

    let started = std::time::Instant::now();
    watcher.close();
    assert!(started.elapsed() < Duration::from_secs(2));
}
