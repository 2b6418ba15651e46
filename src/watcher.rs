//! Directory watcher for the explorer panel.
//!
//! notify delivers raw events on its own thread. Each relevant event re-arms a
//! debounce task (held under its own lock); once the directory has been quiet
//! for the debounce window the task drops a unit into a single-slot channel.
//! A full slot means a notification is already pending, so the new one is
//! dropped. The controller only ever sees the receiving end.
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ControllerError;
use crate::explorer::is_noise;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

type DebounceSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

pub struct DirWatcher {
    watcher: Mutex<Option<RecommendedWatcher>>,
    debounce: DebounceSlot,
    tx: mpsc::Sender<()>,
    rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl DirWatcher {
    /// Watch `root` recursively. Must be called from inside a tokio runtime.
    pub fn start(root: &Path, window: Duration) -> Result<Self, ControllerError> {
        let handle = Handle::try_current()
            .map_err(|e| ControllerError::FileSystem(format!("no runtime for watcher: {e}")))?;
        let (tx, rx) = mpsc::channel(1);
        let debounce: DebounceSlot = Arc::new(Mutex::new(None));

        let cb_tx = tx.clone();
        let cb_debounce = debounce.clone();
        let cb_root = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if should_process_event(&event, &cb_root) => {
                    rearm(&handle, &cb_debounce, &cb_tx, window);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("watcher error: {e}"),
            },
            notify::Config::default(),
        )
        .map_err(|e| ControllerError::FileSystem(format!("creating watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| ControllerError::FileSystem(format!("watching {}: {e}", root.display())))?;

        tracing::debug!(root = %root.display(), "directory watcher started");
        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            debounce,
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// The single-slot notification channel. Handed out once; later calls get `None`.
    pub fn on_change(&self) -> Option<mpsc::Receiver<()>> {
        self.rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Request a notification now, bypassing the debounce window.
    pub fn refresh(&self) {
        if self.is_closed() {
            return;
        }
        let _ = self.tx.try_send(());
    }

    pub fn is_closed(&self) -> bool {
        self.watcher.lock().map(|w| w.is_none()).unwrap_or(true)
    }

    /// Stop watching and abort any pending debounce. Idempotent.
    pub fn close(&self) {
        if let Ok(mut w) = self.watcher.lock() {
            // dropping the notify watcher joins its event thread
            w.take();
        }
        if let Ok(mut pending) = self.debounce.lock()
            && let Some(task) = pending.take()
        {
            task.abort();
        }
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn rearm(handle: &Handle, slot: &DebounceSlot, tx: &mpsc::Sender<()>, window: Duration) {
    let Ok(mut pending) = slot.lock() else { return };
    if let Some(task) = pending.take() {
        task.abort();
    }
    let tx = tx.clone();
    *pending = Some(handle.spawn(async move {
        tokio::time::sleep(window).await;
        // drop-latest: a pending notification already covers this change
        let _ = tx.try_send(());
    }));
}

/// Create/modify/remove of at least one path that isn't under a noise
/// directory (judged relative to the watched root).
fn should_process_event(event: &Event, root: &Path) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant
        && event.paths.iter().any(|p| {
            let rel = p.strip_prefix(root).unwrap_or(p);
            !rel.components()
                .any(|c| is_noise(&c.as_os_str().to_string_lossy()))
        })
}
