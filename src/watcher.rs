//! OS filesystem-event watcher (C6): converts raw OS notifications into a
//! clean stream of semantic events with debounce, rename coalescing, and
//! buffer-overflow recovery.
//!
//! Grounded on the teacher's background-thread-feeding-an-async-channel
//! pattern (`discovery::DiscoveryService` spawns `std::thread::JoinHandle`s
//! that funnel OS events into the async world). The OS source itself is the
//! `notify` crate — the ecosystem-standard choice for this job; the pack
//! does not carry a filesystem watcher (see DESIGN.md).
use crate::ignore::IgnoreMatcher;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticEvent {
    Created(String),
    Modified(String),
    Deleted(String),
    Renamed(String, String),
    DirectoryRenamed(String, String),
    /// The OS source signalled a lost-events condition; the caller must run
    /// a full tree walk.
    Rescan,
}

/// Short-TTL registration of paths about to be written locally, so the
/// resulting filesystem event is dropped instead of re-broadcast.
#[derive(Clone)]
pub struct EchoSuppressor {
    ttl: Duration,
    suppressed: Arc<Mutex<HashMap<String, Instant>>>,
}

impl EchoSuppressor {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            suppressed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn suppress(&self, relative_path: &str) {
        self.suppressed
            .lock()
            .insert(relative_path.to_lowercase(), Instant::now());
    }

    /// Consumes the suppression entry if present and unexpired (one-shot).
    pub fn should_suppress(&self, relative_path: &str) -> bool {
        let key = relative_path.to_lowercase();
        let mut map = self.suppressed.lock();
        match map.remove(&key) {
            Some(at) if at.elapsed() <= self.ttl => true,
            _ => false,
        }
    }

    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.suppressed.lock().retain(|_, at| at.elapsed() <= ttl);
    }
}

struct PendingPathState {
    last_event: Instant,
}

struct PendingRename {
    old_parent: String,
    old_name: String,
    new_parent: String,
    new_name: String,
    seen_at: Instant,
}

/// Debounced, coalesced watcher over a managed root. Publication to the
/// sync engine is lock-free via a bounded channel; the debounce processor
/// itself is a single task, per spec §4.6 concurrency note.
pub struct FileWatcher {
    managed_root: PathBuf,
    ignore: Arc<IgnoreMatcher>,
    echo: EchoSuppressor,
    debounce_window: Duration,
    dir_rename_window: Duration,
    dir_rename_min_count: usize,
    dir_rename_straggler_window: Duration,
}

impl FileWatcher {
    pub fn new(
        managed_root: PathBuf,
        ignore: Arc<IgnoreMatcher>,
        echo: EchoSuppressor,
        debounce_window: Duration,
        dir_rename_window: Duration,
        dir_rename_min_count: usize,
        dir_rename_straggler_window: Duration,
    ) -> Self {
        Self {
            managed_root,
            ignore,
            echo,
            debounce_window,
            dir_rename_window,
            dir_rename_min_count,
            dir_rename_straggler_window,
        }
    }

    /// Start watching; returns a receiver of coalesced semantic events. The
    /// raw `notify` watcher is kept alive for the lifetime of the returned
    /// guard (dropping it stops the watch).
    pub fn start(self) -> notify::Result<(WatcherHandle, mpsc::Receiver<SemanticEvent>)> {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(&self.managed_root, RecursiveMode::Recursive)?;

        let (out_tx, out_rx) = mpsc::channel(1024);
        let managed_root = self.managed_root.clone();
        let ignore = self.ignore.clone();
        let echo = self.echo.clone();
        let debounce_window = self.debounce_window;
        let dir_rename_window = self.dir_rename_window;
        let dir_rename_min_count = self.dir_rename_min_count;
        let dir_rename_straggler_window = self.dir_rename_straggler_window;

        let join_handle = std::thread::spawn(move || {
            debounce_loop(
                raw_rx,
                out_tx,
                managed_root,
                ignore,
                echo,
                debounce_window,
                dir_rename_window,
                dir_rename_min_count,
                dir_rename_straggler_window,
            );
        });

        Ok((
            WatcherHandle {
                _watcher: watcher,
                _thread: Some(join_handle),
            },
            out_rx,
        ))
    }
}

pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    _thread: Option<std::thread::JoinHandle<()>>,
}

#[allow(clippy::too_many_arguments)]
fn debounce_loop(
    raw_rx: std::sync::mpsc::Receiver<notify::Result<Event>>,
    out_tx: mpsc::Sender<SemanticEvent>,
    managed_root: PathBuf,
    ignore: Arc<IgnoreMatcher>,
    echo: EchoSuppressor,
    debounce_window: Duration,
    dir_rename_window: Duration,
    dir_rename_min_count: usize,
    dir_rename_straggler_window: Duration,
) {
    let mut pending: HashMap<String, PendingPathState> = HashMap::new();
    let mut pending_renames: Vec<PendingRename> = Vec::new();
    let mut swallowed_parents: HashMap<String, Instant> = HashMap::new();
    let poll_interval = Duration::from_millis(50);

    loop {
        match raw_rx.recv_timeout(poll_interval) {
            Ok(Ok(event)) => {
                handle_raw_event(
                    event,
                    &managed_root,
                    &ignore,
                    &echo,
                    &mut pending,
                    &mut pending_renames,
                );
            }
            Ok(Err(e)) => {
                warn!("filesystem watch error: {e}; triggering rescan");
                let _ = out_tx.blocking_send(SemanticEvent::Rescan);
                pending.clear();
                pending_renames.clear();
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }

        flush_due_events(&mut pending, debounce_window, &managed_root, &out_tx);
        flush_due_renames(
            &mut pending_renames,
            &mut swallowed_parents,
            dir_rename_window,
            dir_rename_min_count,
            dir_rename_straggler_window,
            &out_tx,
        );
        swallowed_parents.retain(|_, at| at.elapsed() <= dir_rename_straggler_window);
    }
}

fn handle_raw_event(
    event: Event,
    managed_root: &Path,
    ignore: &IgnoreMatcher,
    echo: &EchoSuppressor,
    pending: &mut HashMap<String, PendingPathState>,
    pending_renames: &mut Vec<PendingRename>,
) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            for path in &event.paths {
                if let Some(rel) = relative_of(managed_root, path) {
                    if ignore.is_ignored(&rel, path.is_dir()) {
                        continue;
                    }
                    if echo.should_suppress(&rel) {
                        debug!("echo-suppressed event for {rel}");
                        continue;
                    }
                    pending.insert(
                        rel,
                        PendingPathState {
                            last_event: Instant::now(),
                        },
                    );
                }
            }
        }
        EventKind::Other => {}
        _ => {}
    }

    // `notify` reports renames as two paths on some backends, and as a
    // from/to pair via `event.paths` ordering on others; treat a two-path
    // Modify/Create-like event with a common parent as a rename candidate.
    if event.paths.len() == 2 {
        if let (Some(old_rel), Some(new_rel)) = (
            relative_of(managed_root, &event.paths[0]),
            relative_of(managed_root, &event.paths[1]),
        ) {
            if !ignore.is_ignored(&new_rel, false) {
                let old_parent = parent_of(&old_rel);
                let old_name = file_name_of(&old_rel);
                let new_parent = parent_of(&new_rel);
                let new_name = file_name_of(&new_rel);
                pending_renames.push(PendingRename {
                    old_parent,
                    old_name,
                    new_parent,
                    new_name,
                    seen_at: Instant::now(),
                });
            }
        }
    }
}

fn flush_due_events(
    pending: &mut HashMap<String, PendingPathState>,
    debounce_window: Duration,
    managed_root: &Path,
    out_tx: &mpsc::Sender<SemanticEvent>,
) {
    let now = Instant::now();
    let due: Vec<String> = pending
        .iter()
        .filter(|(_, state)| now.duration_since(state.last_event) >= debounce_window)
        .map(|(path, _)| path.clone())
        .collect();

    for rel in due {
        pending.remove(&rel);
        // Create vs. Modify can't be told apart from debounce state alone
        // once coalesced; the sync engine treats both identically (it
        // already knows from the state store whether the path is new).
        let full_path = managed_root.join(&rel);
        let event = if full_path.exists() {
            SemanticEvent::Modified(rel)
        } else {
            SemanticEvent::Deleted(rel)
        };
        let _ = out_tx.blocking_send(event);
    }
}

#[allow(clippy::too_many_arguments)]
fn flush_due_renames(
    pending_renames: &mut Vec<PendingRename>,
    swallowed_parents: &mut HashMap<String, Instant>,
    dir_rename_window: Duration,
    dir_rename_min_count: usize,
    dir_rename_straggler_window: Duration,
    out_tx: &mpsc::Sender<SemanticEvent>,
) {
    let now = Instant::now();
    let due_idx: Vec<usize> = pending_renames
        .iter()
        .enumerate()
        .filter(|(_, r)| now.duration_since(r.seen_at) >= dir_rename_window)
        .map(|(i, _)| i)
        .collect();
    if due_idx.is_empty() {
        return;
    }

    let mut by_parent: HashMap<String, Vec<usize>> = HashMap::new();
    for &i in &due_idx {
        by_parent
            .entry(pending_renames[i].old_parent.clone())
            .or_default()
            .push(i);
    }

    let mut to_remove: Vec<usize> = Vec::new();
    for (parent, idxs) in by_parent {
        if idxs.len() >= dir_rename_min_count {
            let new_parent = pending_renames[idxs[0]].new_parent.clone();
            let _ = out_tx.blocking_send(SemanticEvent::DirectoryRenamed(
                parent.clone(),
                new_parent,
            ));
            swallowed_parents.insert(parent, now + dir_rename_straggler_window);
            to_remove.extend(idxs);
        } else if swallowed_parents.contains_key(&parent) {
            // Straggler belonging to an already-coalesced rename: swallow silently.
            to_remove.extend(idxs);
        } else {
            for i in idxs {
                let r = &pending_renames[i];
                let _ = out_tx.blocking_send(SemanticEvent::Renamed(
                    join_parent(&r.old_parent, &r.old_name),
                    join_parent(&r.new_parent, &r.new_name),
                ));
                to_remove.push(i);
            }
        }
    }

    to_remove.sort_unstable_by(|a, b| b.cmp(a));
    for i in to_remove {
        pending_renames.remove(i);
    }
}

fn relative_of(managed_root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(managed_root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn parent_of(relative_path: &str) -> String {
    match relative_path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

fn file_name_of(relative_path: &str) -> String {
    relative_path
        .rsplit('/')
        .next()
        .unwrap_or(relative_path)
        .to_string()
}

fn join_parent(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_suppressor_is_one_shot() {
        let sup = EchoSuppressor::new(Duration::from_millis(200));
        sup.suppress("a/b.txt");
        assert!(sup.should_suppress("a/b.txt"));
        assert!(!sup.should_suppress("a/b.txt"));
    }

    #[test]
    fn echo_suppressor_respects_ttl() {
        let sup = EchoSuppressor::new(Duration::from_millis(10));
        sup.suppress("a/b.txt");
        std::thread::sleep(Duration::from_millis(30));
        assert!(!sup.should_suppress("a/b.txt"));
    }

    #[test]
    fn parent_and_name_split_correctly() {
        assert_eq!(parent_of("a/b/c.txt"), "a/b");
        assert_eq!(parent_of("c.txt"), "");
        assert_eq!(file_name_of("a/b/c.txt"), "c.txt");
    }

    #[test]
    fn join_parent_handles_root_level_names() {
        assert_eq!(join_parent("", "c.txt"), "c.txt");
        assert_eq!(join_parent("a/b", "c.txt"), "a/b/c.txt");
    }

    #[test]
    fn non_coalesced_rename_reports_real_old_and_new_paths() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut renames = vec![PendingRename {
            old_parent: "docs".into(),
            old_name: "draft.txt".into(),
            new_parent: "archive".into(),
            new_name: "draft-final.txt".into(),
            seen_at: Instant::now() - Duration::from_secs(1),
        }];
        let mut swallowed = HashMap::new();
        flush_due_renames(
            &mut renames,
            &mut swallowed,
            Duration::from_millis(0),
            4,
            Duration::from_millis(0),
            &tx,
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            SemanticEvent::Renamed("docs/draft.txt".into(), "archive/draft-final.txt".into())
        );
        assert!(renames.is_empty());
    }

    #[test]
    fn coalesced_directory_rename_reports_real_new_parent() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut renames = vec![
            PendingRename {
                old_parent: "old-dir".into(),
                old_name: "a.txt".into(),
                new_parent: "new-dir".into(),
                new_name: "a.txt".into(),
                seen_at: Instant::now() - Duration::from_secs(1),
            },
            PendingRename {
                old_parent: "old-dir".into(),
                old_name: "b.txt".into(),
                new_parent: "new-dir".into(),
                new_name: "b.txt".into(),
                seen_at: Instant::now() - Duration::from_secs(1),
            },
        ];
        let mut swallowed = HashMap::new();
        flush_due_renames(
            &mut renames,
            &mut swallowed,
            Duration::from_millis(0),
            2,
            Duration::from_secs(5),
            &tx,
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            SemanticEvent::DirectoryRenamed("old-dir".into(), "new-dir".into())
        );
        assert!(renames.is_empty());
        assert!(swallowed.contains_key("old-dir"));
    }
}
