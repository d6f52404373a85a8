//! Messenger that only logs what it would send.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use folder_courier_core::batch::size_mb;
use folder_courier_core::contract::{
    BatchSend, MessageId, Messenger, SingleSend, TopicId, TransportError,
};
use tracing::info;

/// Accepts every call and hands out increasing ids.
#[derive(Debug, Default)]
pub struct DryRunMessenger {
    next_id: AtomicI64,
}

impl DryRunMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Messenger for DryRunMessenger {
    async fn send_single(&self, req: SingleSend) -> Result<MessageId, TransportError> {
        info!(
            kind = ?req.kind,
            file = %req.media.file_name,
            size_mb = format!("{:.2}", size_mb(req.media.size_bytes)),
            caption = ?req.media.caption,
            topic = ?req.topic.map(|t| t.0),
            "[DRY-RUN] Would send file"
        );
        Ok(MessageId(self.next()))
    }

    async fn send_batch(&self, req: BatchSend) -> Result<Vec<MessageId>, TransportError> {
        let files: Vec<&str> = req.media.iter().map(|m| m.file_name.as_str()).collect();
        info!(
            kind = ?req.kind,
            count = files.len(),
            ?files,
            topic = ?req.topic.map(|t| t.0),
            "[DRY-RUN] Would send group"
        );
        Ok(req.media.iter().map(|_| MessageId(self.next())).collect())
    }

    async fn create_topic(&self, name: String) -> Result<TopicId, TransportError> {
        info!(%name, "[DRY-RUN] Would create topic");
        Ok(TopicId(self.next()))
    }

    async fn send_text(
        &self,
        text: String,
        topic: Option<TopicId>,
    ) -> Result<MessageId, TransportError> {
        info!(%text, topic = ?topic.map(|t| t.0), "[DRY-RUN] Would send message");
        Ok(MessageId(self.next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hands_out_increasing_ids() {
        let messenger = DryRunMessenger::new();
        let topic = messenger.create_topic("docs".into()).await.unwrap();
        let msg = messenger.send_text("hello".into(), Some(topic)).await.unwrap();
        assert_eq!(topic, TopicId(1));
        assert_eq!(msg, MessageId(2));
    }
}
