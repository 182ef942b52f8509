// Ack scheduler (§4.4.4): drains a connection's `read_queue`, running either
// the OnlyAck or RigorAck strategy depending on the process-wide `AckMode`.
// Runs as its own task per connection; never touches the socket directly
// except to send Ack frames -- dispatched messages go through `dispatch_tx`
// to the writer task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_protocol::Message;
use tokio::sync::watch;

use crate::config::{AckMode, GatewayConfig};
use crate::gateway::ConnHandle;

const EMPTY_QUEUE_POLL: Duration = Duration::from_micros(100);
const RIGOR_RETRY_INTERVAL: Duration = Duration::from_micros(300);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

pub async fn run(conn: Arc<ConnHandle>, config: GatewayConfig, mut done_rx: watch::Receiver<bool>) {
    loop {
        if *done_rx.borrow() {
            return;
        }

        let has_head = {
            let queue = conn.queue_state.lock().await;
            !queue.is_empty()
        };
        if !has_head {
            tokio::select! {
                _ = tokio::time::sleep(EMPTY_QUEUE_POLL) => {}
                _ = done_rx.changed() => {}
            }
            continue;
        }

        let exceeded_errors = {
            let queue = conn.queue_state.lock().await;
            queue.front().is_some_and(|p| p.err_count > config.max_err_count)
        };
        if exceeded_errors {
            let mut queue = conn.queue_state.lock().await;
            queue.pop_front_and_forget();
            continue;
        }

        match config.ack_mode {
            AckMode::NoAck => {
                // The scheduler only runs under an ack mode; if the mode
                // flips at runtime there's nothing ack-tracked to drain.
                tokio::time::sleep(EMPTY_QUEUE_POLL).await;
            }
            AckMode::OnlyAck => only_ack_step(&conn).await,
            AckMode::RigorAck => rigor_ack_step(&conn, config.ack_timeout).await,
        }
    }
}

async fn only_ack_step(conn: &Arc<ConnHandle>) {
    let (id, next_seq, err_count) = {
        let queue = conn.queue_state.lock().await;
        let p = queue.front().expect("checked non-empty above");
        (
            p.id().expect("ack-tracked message always has an id").to_owned(),
            p.message.ack_seq + 1,
            p.err_count,
        )
    };

    let ack = Message::ack(id.clone(), next_seq);
    match conn.write(&ack).await {
        Ok(()) => {
            let popped = {
                let mut queue = conn.queue_state.lock().await;
                queue.pop_front_and_forget()
            };
            if let Some(pending) = popped {
                let _ = conn.dispatch_tx.send(pending.message).await;
            }
        }
        Err(_) => {
            let mut queue = conn.queue_state.lock().await;
            if let Some(p) = queue.front_mut() {
                p.err_count += 1;
            }
            drop(queue);
            backoff(err_count + 1).await;
        }
    }
}

async fn rigor_ack_step(conn: &Arc<ConnHandle>, ack_timeout: Duration) {
    enum Action {
        Solicit(Message),
        ResendSolicit(Message),
        Confirmed,
        Expired,
        WaitRemaining(Duration),
    }

    let (id, action) = {
        let mut queue = conn.queue_state.lock().await;
        let id = queue
            .front()
            .and_then(|p| p.id())
            .expect("checked non-empty above")
            .to_owned();

        if queue.front().map(|p| p.message.ack_seq) == Some(0) {
            let p = queue.front_mut().expect("front exists");
            p.message.ack_seq = 1;
            p.ack_time = Some(Instant::now());
            let ack = Message::ack(id.clone(), 1);
            (id, Action::Solicit(ack))
        } else {
            let observed = queue.observed_ack_seq(&id);
            let current_seq = queue.front().map(|p| p.message.ack_seq).unwrap_or(0);
            if observed.is_some_and(|seq| seq > current_seq) {
                (id, Action::Confirmed)
            } else {
                let ack_time = queue.front().and_then(|p| p.ack_time);
                let elapsed = ack_time.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= ack_timeout {
                    (id, Action::Expired)
                } else {
                    let remaining = ack_timeout - elapsed;
                    if remaining > RIGOR_RETRY_INTERVAL {
                        let ack = Message::ack(id.clone(), current_seq);
                        (id, Action::ResendSolicit(ack))
                    } else {
                        (id, Action::WaitRemaining(remaining))
                    }
                }
            }
        }
    };

    match action {
        Action::Solicit(ack) | Action::ResendSolicit(ack) => {
            if conn.write(&ack).await.is_err() {
                let mut queue = conn.queue_state.lock().await;
                if let Some(p) = queue.front_mut() {
                    p.err_count += 1;
                    let backoff_count = p.err_count;
                    drop(queue);
                    backoff(backoff_count).await;
                    return;
                }
            }
            tokio::time::sleep(RIGOR_RETRY_INTERVAL).await;
        }
        Action::Confirmed => {
            let popped = {
                let mut queue = conn.queue_state.lock().await;
                queue.pop_front_and_forget()
            };
            if let Some(pending) = popped {
                let _ = conn.dispatch_tx.send(pending.message).await;
            }
        }
        Action::Expired => {
            let mut queue = conn.queue_state.lock().await;
            let _ = id;
            queue.pop_front_and_forget();
        }
        Action::WaitRemaining(remaining) => {
            tokio::time::sleep(remaining).await;
        }
    }
}

async fn backoff(err_count: u32) {
    let millis = (200u64.saturating_mul(u64::from(err_count))).min(MAX_BACKOFF.as_millis() as u64);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
