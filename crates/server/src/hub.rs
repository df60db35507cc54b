//! Per-stream broadcast channels with a short replay history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tender_stream_shared::{PublishResponse, StreamTarget};
use tokio::sync::{broadcast, RwLock};

const CHANNEL_CAPACITY: usize = 100;

/// One published frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u64,
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Frame(Frame),
    /// The stream was closed; receivers should end their responses.
    Close,
}

struct Channel {
    tx: broadcast::Sender<HubEvent>,
    history: VecDeque<Frame>,
}

/// Registry of live streams, keyed by target.
pub struct StreamHub {
    channels: RwLock<HashMap<StreamTarget, Channel>>,
    next_id: AtomicU64,
    history: usize,
}

impl StreamHub {
    pub fn new(history: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            history,
        }
    }

    /// Join a stream. Frames newer than `after` that are still in the history
    /// are returned for replay; everything published later arrives on the
    /// receiver, without gaps or duplicates.
    pub async fn subscribe(
        &self,
        target: &StreamTarget,
        after: Option<u64>,
    ) -> (Vec<Frame>, broadcast::Receiver<HubEvent>) {
        let mut channels = self.channels.write().await;
        let channel = channels.entry(target.clone()).or_insert_with(|| Channel {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
            history: VecDeque::new(),
        });

        let backlog = match after {
            Some(after) => channel
                .history
                .iter()
                .filter(|frame| frame.id > after)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        (backlog, channel.tx.subscribe())
    }

    /// Publish a frame to every open stream of `target`.
    pub async fn publish(
        &self,
        target: &StreamTarget,
        event: Option<String>,
        data: String,
    ) -> PublishResponse {
        // Ids are taken under the write lock so history and broadcast order
        // match id order.
        let mut channels = self.channels.write().await;
        let frame = Frame {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            event,
            data,
        };
        let id = frame.id;

        let Some(channel) = channels.get_mut(target) else {
            tracing::debug!("no stream open for {target}, frame #{id} dropped");
            return PublishResponse { id, receivers: 0 };
        };

        if self.history > 0 {
            if channel.history.len() == self.history {
                channel.history.pop_front();
            }
            channel.history.push_back(frame.clone());
        }
        let receivers = channel.tx.send(HubEvent::Frame(frame)).unwrap_or(0);
        PublishResponse { id, receivers }
    }

    /// End every open stream of `target` and forget its history. Returns
    /// whether the stream existed.
    pub async fn close(&self, target: &StreamTarget) -> bool {
        let Some(channel) = self.channels.write().await.remove(target) else {
            return false;
        };
        let _ = channel.tx.send(HubEvent::Close);
        true
    }

    pub async fn receiver_count(&self, target: &StreamTarget) -> usize {
        self.channels
            .read()
            .await
            .get(target)
            .map_or(0, |channel| channel.tx.receiver_count())
    }
}
