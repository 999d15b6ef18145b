// 进程内广播器实现
use crate::broadcaster::{BroadcastError, MatchBroadcast, MatchBroadcaster};
use async_trait::async_trait;
use domain::MatchId;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct LocalMatchBroadcaster {
    sender: broadcast::Sender<MatchBroadcast>,
}

impl LocalMatchBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 订阅某个配对频道的事件流
    pub fn subscribe(&self, match_id: MatchId) -> MatchStream {
        MatchStream {
            receiver: self.sender.subscribe(),
            match_id,
        }
    }
}

impl Default for LocalMatchBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl MatchBroadcaster for LocalMatchBroadcaster {
    async fn broadcast(&self, payload: MatchBroadcast) -> Result<(), BroadcastError> {
        // 没有任何订阅者时 send 会报错，但对端离线本来就是合法状态，
        // 投递给离线对端是 no-op
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(payload)
            .map(|_| ())
            .map_err(|err| BroadcastError::failed(err.to_string()))
    }
}

/// 按配对过滤后的事件流
pub struct MatchStream {
    receiver: broadcast::Receiver<MatchBroadcast>,
    match_id: MatchId,
}

impl MatchStream {
    pub async fn recv(&mut self) -> Option<MatchBroadcast> {
        loop {
            match self.receiver.recv().await {
                Ok(broadcast) => {
                    if broadcast.match_id == self.match_id {
                        return Some(broadcast);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(match_id = %self.match_id, skipped, "事件流滞后，跳过旧事件");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
