use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::api::VkApi;
use crate::commands::CommandHandler;
use crate::events::MessageEvent;
use crate::queue::QueueReceiver;

/// Drains the dispatch queue and routes messages.
pub struct MessageWorker {
    api: Arc<dyn VkApi>,
    handler: Arc<dyn CommandHandler>,
    prefix: char,
    echo: bool,
}

impl MessageWorker {
    pub fn new(
        api: Arc<dyn VkApi>,
        handler: Arc<dyn CommandHandler>,
        prefix: char,
        echo: bool,
    ) -> Self {
        Self {
            api,
            handler,
            prefix,
            echo,
        }
    }

    /// Runs until the queue is closed.
    pub async fn run(self, mut queue: QueueReceiver) {
        info!("Message worker started");
        while let Some(message) = queue.pop().await {
            self.process(message).await;
        }
        info!("Message worker stopped");
    }

    async fn process(&self, message: MessageEvent) {
        if message.is_outbox() {
            debug!("Skipping own message {}", message.message_id);
            return;
        }

        let sender = message.sender_id();
        info!(
            "Message {} from {:?} in {:?} at {:?}: {}",
            message.message_id,
            sender,
            message.peer_id,
            message.sent_at(),
            message.text()
        );

        match message.chat_id() {
            Some(chat_id) if message.text().starts_with(self.prefix) => {
                self.dispatch_command(chat_id, &message).await;
            }
            Some(_) => {}
            None => {
                if self.echo {
                    self.echo_back(&message).await;
                }
            }
        }
    }

    async fn dispatch_command(&self, chat_id: i64, message: &MessageEvent) {
        let handled = AssertUnwindSafe(self.handler.handle(self.api.as_ref(), chat_id, message))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Command handler failed for message {}: {:#}", message.message_id, e),
            Err(_) => error!("Command handler panicked on message {}", message.message_id),
        }
    }

    async fn echo_back(&self, message: &MessageEvent) {
        let (Some(peer_id), Some(text)) = (message.peer_id, message.text.as_deref()) else {
            return;
        };
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.api.send_message(peer_id, text, &[]).await {
            warn!("Failed to echo message {}: {}", message.message_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::dispatch_queue;
    use crate::testing::MockApi;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every invocation; fails or panics on request.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(i64, i64)>>,
    }

    #[async_trait]
    impl CommandHandler for RecordingHandler {
        async fn handle(
            &self,
            _api: &dyn VkApi,
            chat_id: i64,
            message: &MessageEvent,
        ) -> Result<()> {
            self.seen.lock().unwrap().push((chat_id, message.message_id));
            match message.text() {
                "/fail" => bail!("boom"),
                "/panic" => panic!("handler exploded"),
                _ => Ok(()),
            }
        }
    }

    fn chat(id: i64, text: &str) -> MessageEvent {
        MessageEvent {
            message_id: id,
            flags: 1,
            peer_id: Some(2_000_000_007),
            text: Some(text.to_string()),
            extra: json!({"from": "42"}).as_object().cloned(),
            ..Default::default()
        }
    }

    fn direct(id: i64, text: &str) -> MessageEvent {
        MessageEvent {
            message_id: id,
            flags: 1,
            peer_id: Some(42),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    async fn run_worker(
        api: Arc<MockApi>,
        handler: Arc<RecordingHandler>,
        echo: bool,
        messages: Vec<MessageEvent>,
    ) {
        let (tx, rx) = dispatch_queue(16);
        let worker = MessageWorker::new(api, handler, '/', echo);
        let task = tokio::spawn(worker.run(rx));
        for message in messages {
            tx.push(message).await.unwrap();
        }
        tx.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_command_forwarded_with_chat_id() {
        let api = Arc::new(MockApi::new());
        let handler = Arc::new(RecordingHandler::default());

        run_worker(api, handler.clone(), false, vec![chat(1, "/help")]).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![(7, 1)]);
    }

    #[tokio::test]
    async fn test_outbox_never_reaches_handler() {
        let api = Arc::new(MockApi::new());
        let handler = Arc::new(RecordingHandler::default());

        let mut own = chat(1, "/help");
        own.flags = 2;
        let mut own_direct = direct(2, "hello");
        own_direct.flags = 3;

        run_worker(api.clone(), handler.clone(), true, vec![own, own_direct]).await;

        assert!(handler.seen.lock().unwrap().is_empty());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_and_direct_commands_ignored() {
        let api = Arc::new(MockApi::new());
        let handler = Arc::new(RecordingHandler::default());

        run_worker(
            api.clone(),
            handler.clone(),
            false,
            vec![chat(1, "just chatting"), direct(2, "/help")],
        )
        .await;

        assert!(handler.seen.lock().unwrap().is_empty());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_handler_failures_do_not_stop_worker() {
        let api = Arc::new(MockApi::new());
        let handler = Arc::new(RecordingHandler::default());

        run_worker(
            api,
            handler.clone(),
            false,
            vec![chat(1, "/fail"), chat(2, "/panic"), chat(3, "/help")],
        )
        .await;

        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec![(7, 1), (7, 2), (7, 3)]
        );
    }

    #[tokio::test]
    async fn test_echo_replies_to_direct_messages() {
        let api = Arc::new(MockApi::new());
        let handler = Arc::new(RecordingHandler::default());

        run_worker(
            api.clone(),
            handler,
            true,
            vec![direct(1, "ping"), chat(2, "not echoed")],
        )
        .await;

        assert_eq!(api.sent_messages(), vec![(42, "ping".to_string())]);
    }

    #[tokio::test]
    async fn test_echo_send_failure_is_dropped() {
        let api = Arc::new(MockApi::new());
        api.fail_sends();
        let handler = Arc::new(RecordingHandler::default());

        run_worker(
            api.clone(),
            handler,
            true,
            vec![direct(1, "one"), direct(2, "two")],
        )
        .await;

        assert_eq!(api.sent_messages().len(), 2);
    }
}
