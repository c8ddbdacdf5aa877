//! Sharded delivery dispatcher.
//!
//! Deliveries are routed to one of N worker tasks by a hash of the message
//! id. Each worker drains its queue in order, so all hops of one message are
//! processed sequentially, while distinct messages spread across workers.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Monitor;
use super::event::{DeliveryEvent, Message};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("monitor dispatcher is shut down")]
    Closed,
    #[error("monitor dispatcher dropped the delivery before completing it")]
    Dropped,
}

struct Delivery {
    event: DeliveryEvent,
    reply: oneshot::Sender<Message>,
}

/// Cloneable entry point used by host adapters to submit deliveries.
#[derive(Clone)]
pub struct MonitorHandle {
    shards: Arc<[mpsc::Sender<Delivery>]>,
}

impl MonitorHandle {
    /// Submits a delivery and waits until it has been observed and
    /// persisted, returning the message as it should continue through the
    /// flow (with its `log` cleared).
    pub async fn deliver(&self, event: DeliveryEvent) -> Result<Message, DispatchError> {
        let (reply, done) = oneshot::channel();
        let shard = shard_index(event.message_id(), self.shards.len());
        self.shards[shard]
            .send(Delivery { event, reply })
            .await
            .map_err(|_| DispatchError::Closed)?;
        done.await.map_err(|_| DispatchError::Dropped)
    }
}

fn shard_index(message_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    message_id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Spawns `workers` worker tasks and returns the handle feeding them.
///
/// Workers stop when `shutdown` is cancelled, after finishing whatever was
/// already queued.
pub fn spawn_dispatcher(
    monitor: Arc<Monitor>,
    workers: usize,
    queue_capacity: usize,
    shutdown: CancellationToken,
) -> (MonitorHandle, Vec<JoinHandle<()>>) {
    let workers = workers.max(1);
    let mut senders = Vec::with_capacity(workers);
    let mut tasks = Vec::with_capacity(workers);

    for index in 0..workers {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        senders.push(tx);
        tasks.push(tokio::spawn(run_worker(
            index,
            monitor.clone(),
            rx,
            shutdown.clone(),
        )));
    }

    let handle = MonitorHandle {
        shards: senders.into(),
    };
    (handle, tasks)
}

async fn run_worker(
    index: usize,
    monitor: Arc<Monitor>,
    mut queue: mpsc::Receiver<Delivery>,
    shutdown: CancellationToken,
) {
    debug!(worker = index, "Monitor worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(worker = index, "Monitor worker shutdown requested");
                break;
            }
            next = queue.recv() => match next {
                Some(delivery) => process(&monitor, delivery).await,
                None => break,
            }
        }
    }

    queue.close();
    while let Some(delivery) = queue.recv().await {
        process(&monitor, delivery).await;
    }

    debug!(worker = index, "Monitor worker stopped");
}

async fn process(monitor: &Monitor, delivery: Delivery) {
    let Delivery { mut event, reply } = delivery;
    monitor.deliver(&mut event).await;
    // The submitter may have stopped waiting; nothing to do then.
    let _ = reply.send(event.msg);
}
