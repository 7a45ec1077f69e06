use parking_lot::Mutex;
use tether_dap::StoppedEventBody;
use tokio::sync::oneshot;

use crate::error::{DebugError, Result};

/// How an outstanding execution operation ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StopSignal {
    Stopped { seq: i64, body: StoppedEventBody },
    Exited { exit_code: Option<i64> },
    Disconnected,
}

struct Waiter {
    tx: oneshot::Sender<StopSignal>,
    /// Seq of the control response; only later stops resolve the waiter.
    armed_after: Option<i64>,
    /// Stops seen before the control response was read.
    early: Vec<(i64, StoppedEventBody)>,
}

/// The single outstanding stop waiter of a session.
#[derive(Default)]
pub(crate) struct PendingStop {
    slot: Mutex<Option<Waiter>>,
}

impl PendingStop {
    /// Start waiting for the next stop. Fails with [`DebugError::Busy`] while
    /// another operation still waits; a waiter whose caller went away is
    /// replaced.
    pub(crate) fn open(&self) -> Result<oneshot::Receiver<StopSignal>> {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|waiter| !waiter.tx.is_closed()) {
            return Err(DebugError::Busy);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(Waiter {
            tx,
            armed_after: None,
            early: Vec::new(),
        });
        Ok(rx)
    }

    /// Record the control response and replay stops that raced ahead of it.
    pub(crate) fn arm(&self, response_seq: i64) {
        let mut slot = self.slot.lock();
        let Some(waiter) = slot.as_mut() else {
            return;
        };
        waiter.armed_after = Some(response_seq);
        let early = std::mem::take(&mut waiter.early);
        if let Some((seq, body)) = early.into_iter().find(|(seq, _)| *seq > response_seq) {
            if let Some(waiter) = slot.take() {
                let _ = waiter.tx.send(StopSignal::Stopped { seq, body });
            }
        }
    }

    /// Offer a stop event. Returns whether it resolved the waiter.
    pub(crate) fn offer_stop(&self, seq: i64, body: &StoppedEventBody) -> bool {
        let mut slot = self.slot.lock();
        let Some(waiter) = slot.as_mut() else {
            return false;
        };
        let armed_after = waiter.armed_after;
        match armed_after {
            None => {
                waiter.early.push((seq, body.clone()));
                false
            }
            Some(response_seq) if seq > response_seq => {
                if let Some(waiter) = slot.take() {
                    let _ = waiter.tx.send(StopSignal::Stopped {
                        seq,
                        body: body.clone(),
                    });
                }
                true
            }
            Some(response_seq) => {
                tracing::debug!(
                    target: "tether.debug",
                    seq,
                    response_seq,
                    "ignoring stop that precedes the control response"
                );
                false
            }
        }
    }

    /// Resolve the waiter with a terminal signal regardless of ordering.
    pub(crate) fn finish(&self, signal: StopSignal) {
        if let Some(waiter) = self.slot.lock().take() {
            let _ = waiter.tx.send(signal);
        }
    }

    pub(crate) fn cancel(&self) {
        self.slot.lock().take();
    }

    pub(crate) fn is_outstanding(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(reason: &str) -> StoppedEventBody {
        StoppedEventBody {
            reason: reason.to_string(),
            thread_id: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stop_after_response_resolves() {
        let pending = PendingStop::default();
        let rx = pending.open().unwrap();
        pending.arm(5);
        assert!(pending.offer_stop(6, &body("step")));
        assert_eq!(
            rx.await.unwrap(),
            StopSignal::Stopped {
                seq: 6,
                body: body("step")
            }
        );
        assert!(!pending.is_outstanding());
    }

    #[tokio::test]
    async fn stale_stop_is_ignored() {
        let pending = PendingStop::default();
        let mut rx = pending.open().unwrap();
        pending.arm(5);
        assert!(!pending.offer_stop(4, &body("step")));
        assert!(rx.try_recv().is_err());
        assert!(pending.is_outstanding());
    }

    #[tokio::test]
    async fn early_stops_are_replayed_against_response_seq() {
        let pending = PendingStop::default();
        let rx = pending.open().unwrap();
        // One stop raced ahead of the response, the other followed it.
        pending.offer_stop(3, &body("stale"));
        pending.offer_stop(8, &body("breakpoint"));
        pending.arm(5);
        let StopSignal::Stopped { seq, body } = rx.await.unwrap() else {
            panic!("expected stop");
        };
        assert_eq!(seq, 8);
        assert_eq!(body.reason, "breakpoint");
    }

    #[tokio::test]
    async fn finish_delivers_terminal_signal_without_arming() {
        let pending = PendingStop::default();
        let rx = pending.open().unwrap();
        pending.finish(StopSignal::Exited { exit_code: Some(3) });
        assert_eq!(rx.await.unwrap(), StopSignal::Exited { exit_code: Some(3) });
    }

    #[tokio::test]
    async fn cancel_drops_the_sender() {
        let pending = PendingStop::default();
        let rx = pending.open().unwrap();
        pending.cancel();
        assert!(rx.await.is_err());
        assert!(!pending.offer_stop(1, &body("step")));
    }

    #[tokio::test]
    async fn open_refuses_while_a_waiter_is_live() {
        let pending = PendingStop::default();
        let first = pending.open().unwrap();
        assert!(matches!(pending.open(), Err(DebugError::Busy)));
        assert!(pending.is_outstanding());

        drop(first);
        let second = pending.open().unwrap();
        pending.arm(1);
        assert!(pending.offer_stop(2, &body("step")));
        assert!(second.await.is_ok());
    }
}
