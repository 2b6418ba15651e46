//! Task dispatcher. Runs blocking or long-running work off the control thread.
//!
//! `submit` returns immediately with the task's abort handle. The work runs on
//! its own tokio task and its outcome is posted back to the controller inbox
//! as exactly one event. A task
//! that panics or gets aborted still produces a terminal event through its
//! `on_failure` builder, so the controller never waits on a task that
//! silently vanished.
use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub struct Dispatcher<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E: Send + 'static> Dispatcher<E> {
    pub fn new(tx: mpsc::UnboundedSender<E>) -> Self {
        Self { tx }
    }

    /// Post an event straight into the inbox.
    pub fn post(&self, event: E) {
        // Closed inbox means the controller is shutting down.
        let _ = self.tx.send(event);
    }

    /// The controller dropped its inbox.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Run an async task. `on_failure` receives a description of the panic/abort.
    pub fn submit<F, P>(&self, label: &str, task: F, on_failure: P) -> AbortHandle
    where
        F: Future<Output = E> + Send + 'static,
        P: FnOnce(String) -> E + Send + 'static,
    {
        let inner = tokio::spawn(task);
        let abort = inner.abort_handle();
        let tx = self.tx.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let event = match inner.await {
                Ok(event) => event,
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    tracing::error!(task = %label, "task panicked: {msg}");
                    on_failure(format!("task '{label}' panicked: {msg}"))
                }
                Err(_) => {
                    tracing::warn!(task = %label, "task aborted");
                    on_failure(format!("task '{label}' was aborted"))
                }
            };
            let _ = tx.send(event);
        });
        abort
    }

    /// Run synchronous blocking work (shell exec, file reads, clipboard) on the
    /// blocking pool.
    pub fn submit_blocking<F, P>(&self, label: &str, work: F, on_failure: P) -> AbortHandle
    where
        F: FnOnce() -> E + Send + 'static,
        P: FnOnce(String) -> E + Send + 'static,
    {
        let inner = tokio::task::spawn_blocking(work);
        let abort = inner.abort_handle();
        let tx = self.tx.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let event = match inner.await {
                Ok(event) => event,
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    tracing::error!(task = %label, "blocking task panicked: {msg}");
                    on_failure(format!("task '{label}' panicked: {msg}"))
                }
                Err(_) => on_failure(format!("task '{label}' was aborted")),
            };
            let _ = tx.send(event);
        });
        abort
    }

    /// Post `event` after `delay`. Used for timeouts the controller must observe
    /// as events (panel-nav expiry).
    pub fn schedule(&self, delay: Duration, event: E) -> AbortHandle {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        })
        .abort_handle()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
