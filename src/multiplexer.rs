//! Bus → controller bridge.
//!
//! A single background task subscribes to the event bus, blocks for the first
//! event, then keeps draining until the debounce window closes or the batch
//! cap is hit. One flush becomes exactly one controller message: a lone event
//! is posted as-is, anything more as a batch in arrival order. The listener
//! only exits when the bus itself is gone or the controller inbox is closed;
//! lagged receivers and unfamiliar events never stop it.
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::coalesce::{Coalescer, Flush};
use crate::dispatch::Dispatcher;
use crate::events::{BusEvent, EventBus};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
pub const DEFAULT_BATCH_CAP: usize = 50;

/// Start the listener. `wrap` turns a flush into the controller's event type.
pub fn spawn<E, W>(
    bus: &EventBus,
    inbox: Dispatcher<E>,
    debounce: Duration,
    batch_cap: usize,
    wrap: W,
) -> JoinHandle<()>
where
    E: Send + 'static,
    W: Fn(Flush<BusEvent>) -> E + Send + 'static,
{
    // Subscribe before spawning so nothing published after this call is missed.
    let rx = bus.subscribe();
    tokio::spawn(listen(rx, inbox, Coalescer::new(debounce, batch_cap), wrap))
}

async fn listen<E, W>(
    mut rx: broadcast::Receiver<BusEvent>,
    inbox: Dispatcher<E>,
    mut buf: Coalescer<BusEvent>,
    wrap: W,
) where
    E: Send + 'static,
    W: Fn(Flush<BusEvent>) -> E,
{
    loop {
        let first = match rx.recv().await {
            Ok(ev) => ev,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("event multiplexer lagged, {n} events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let mut closed = false;
        let mut flushed = buf.push(first, Instant::now().into_std());
        while flushed.is_none() {
            let Some(deadline) = buf.deadline() else {
                break;
            };
            tokio::select! {
                _ = tokio::time::sleep_until(Instant::from_std(deadline)) => {
                    flushed = buf.poll(Instant::now().into_std());
                }
                next = rx.recv() => match next {
                    Ok(ev) => flushed = buf.push(ev, Instant::now().into_std()),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("event multiplexer lagged, {n} events dropped");
                    }
                    Err(RecvError::Closed) => {
                        flushed = buf.flush();
                        closed = true;
                    }
                },
            }
        }

        if let Some(flush) = flushed {
            tracing::trace!(events = flush.len(), "bus flush");
            inbox.post(wrap(flush));
        }
        if closed || inbox.is_closed() {
            break;
        }
    }
    tracing::debug!("event multiplexer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::LogLevel;
    use tokio::sync::mpsc;

    fn start(bus: &EventBus, cap: usize) -> mpsc::UnboundedReceiver<Flush<BusEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn(bus, Dispatcher::new(tx), DEFAULT_DEBOUNCE, cap, |f| f);
        rx
    }

    fn messages(flush: Flush<BusEvent>) -> Vec<String> {
        let events = match flush {
            Flush::Single(ev) => vec![ev],
            Flush::Batch(evs) => evs,
        };
        events
            .into_iter()
            .map(|ev| match ev {
                BusEvent::Log(l) => l.message,
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_becomes_one_ordered_batch() {
        let bus = EventBus::new(64);
        let mut rx = start(&bus, DEFAULT_BATCH_CAP);
        for i in 0..5 {
            bus.log(LogLevel::Info, "t", format!("e{i}"));
        }
        let flush = rx.recv().await.map(messages);
        assert_eq!(
            flush,
            Some(vec!["e0".into(), "e1".into(), "e2".into(), "e3".into(), "e4".into()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_events_arrive_individually_and_listener_survives() {
        let bus = EventBus::new(64);
        let mut rx = start(&bus, DEFAULT_BATCH_CAP);
        for i in 0..3 {
            bus.log(LogLevel::Info, "t", format!("s{i}"));
            match rx.recv().await {
                Some(Flush::Single(BusEvent::Log(l))) => assert_eq!(l.message, format!("s{i}")),
                other => panic!("expected single event, got {other:?}"),
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        bus.log(LogLevel::Warn, "t", "still here");
        assert!(matches!(rx.recv().await, Some(Flush::Single(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_splits_large_bursts() {
        let bus = EventBus::new(1024);
        let mut rx = start(&bus, DEFAULT_BATCH_CAP);
        for i in 0..120 {
            bus.log(LogLevel::Debug, "t", format!("{i}"));
        }
        let mut sizes = Vec::new();
        let mut all = Vec::new();
        while all.len() < 120 {
            let flush = rx.recv().await.expect("listener alive");
            sizes.push(flush.len());
            all.extend(messages(flush));
        }
        assert_eq!(sizes, vec![50, 50, 20]);
        let expected: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_is_survivable() {
        let bus = EventBus::new(16);
        let mut rx = start(&bus, DEFAULT_BATCH_CAP);
        // overflow the receiver before the listener gets to run
        for i in 0..40 {
            bus.log(LogLevel::Info, "t", format!("{i}"));
        }
        let first = rx.recv().await.expect("listener alive");
        assert_eq!(first.len(), 16);
        bus.log(LogLevel::Info, "t", "after lag");
        match rx.recv().await {
            Some(Flush::Single(BusEvent::Log(l))) => assert_eq!(l.message, "after lag"),
            other => panic!("expected single event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_bus_dropped() {
        let bus = EventBus::new(16);
        let (tx, _rx) = mpsc::unbounded_channel::<Flush<BusEvent>>();
        let handle = spawn(&bus, Dispatcher::new(tx), DEFAULT_DEBOUNCE, 50, |f| f);
        drop(bus);
        assert!(handle.await.is_ok());
    }
}
