// chat-queue: in-process stand-in for the topic/consumer-group message queue
// the transfer pipeline sits behind.
//
// The gateway's `conversation.chat` and `conversation.markRead` handlers are
// producers; `chat-transfer` and `read-transfer` (see the `server::consumers`
// module) are single-consumer-group subscribers. The only contract that
// matters to the rest of the crate is at-least-once delivery: a consumer
// that fails a payload calls `requeue` and the payload is handed to the next
// `recv` instead of being lost, mirroring how a real broker redelivers an
// unacked message. There is no ordering guarantee across requeues relative
// to freshly published payloads.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// The publishing half of a topic. Cheap to clone; all clones share one
/// underlying channel.
#[derive(Clone)]
pub struct Topic<T> {
    tx: mpsc::UnboundedSender<T>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed, no subscriber is consuming")]
    Closed,
}

impl<T> Topic<T> {
    pub fn publish(&self, payload: T) -> Result<(), QueueError> {
        self.tx.send(payload).map_err(|_| QueueError::Closed)
    }
}

/// The consuming half of a topic. Not `Clone` -- one logical consumer group
/// per topic, matching the spec's two independent consumer groups.
pub struct Subscriber<T> {
    rx: mpsc::UnboundedReceiver<T>,
    requeue_tx: mpsc::UnboundedSender<T>,
}

impl<T> Subscriber<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Puts a payload back on the queue for redelivery after a processing
    /// failure. The producer side is never aware this happened.
    pub fn requeue(&self, payload: T) {
        let _ = self.requeue_tx.send(payload);
    }
}

/// Creates a fresh topic with its single consumer-group subscriber.
pub fn topic<T>() -> (Topic<T>, Subscriber<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Topic { tx: tx.clone() },
        Subscriber {
            rx,
            requeue_tx: tx,
        },
    )
}

/// Runs `process` over every payload a subscriber receives, forever.
///
/// On `Err`, the payload is requeued and the loop backs off briefly before
/// taking the next delivery (which, under a single subscriber, is usually
/// the same redelivered payload) -- this keeps a poison payload from
/// spinning the consumer at full CPU.
pub async fn run_consumer<T, F, Fut, E>(mut sub: Subscriber<T>, label: &str, mut process: F)
where
    T: Clone,
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    while let Some(payload) = sub.recv().await {
        let retry_payload = payload.clone();
        if let Err(e) = process(payload).await {
            warn!(consumer = label, error = %e, "consume failed, requeueing for redelivery");
            sub.requeue(retry_payload);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    error!(consumer = label, "topic closed, consumer loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_published_payloads_in_order() {
        let (topic, mut sub) = topic::<i32>();
        topic.publish(1).unwrap();
        topic.publish(2).unwrap();
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
    }

    #[tokio::test]
    async fn requeue_redelivers_after_recv() {
        let (topic, mut sub) = topic::<&'static str>();
        topic.publish("first").unwrap();
        let got = sub.recv().await.unwrap();
        assert_eq!(got, "first");
        sub.requeue(got);
        assert_eq!(sub.recv().await, Some("first"));
    }

    #[tokio::test]
    async fn run_consumer_requeues_on_error_and_eventually_succeeds() {
        let (topic, sub) = topic::<i32>();
        topic.publish(42).unwrap();
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            run_consumer(sub, "test", move |payload: i32| {
                let attempts = attempts2.clone();
                let done_tx = done_tx.clone();
                async move {
                    let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if n < 2 {
                        return Err("not yet");
                    }
                    let _ = done_tx.send(payload);
                    Ok(())
                }
            })
            .await;
        });

        let result = tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .expect("consumer should eventually succeed");
        assert_eq!(result, Some(42));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
