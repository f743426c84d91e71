use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::api::VkApi;
use crate::commands::CommandHandler;
use crate::config::Config;
use crate::error::ApiError;
use crate::events::Event;
use crate::longpoll::LongPollClient;
use crate::queue::{dispatch_queue, QueueSender};
use crate::session::LongPollSession;
use crate::worker::MessageWorker;

/// Exponential delay between restarts, reset by any successful poll.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Owns the polling session and restarts the whole pipeline when polling
/// fails. Each run gets a fresh session, queue and worker.
pub struct Supervisor {
    api: Arc<dyn VkApi>,
    handler: Arc<dyn CommandHandler>,
    config: Config,
}

impl Supervisor {
    pub fn new(api: Arc<dyn VkApi>, handler: Arc<dyn CommandHandler>, config: Config) -> Self {
        Self {
            api,
            handler,
            config,
        }
    }

    /// Runs forever. Returns only when a session cannot be acquired: any
    /// handshake failure at first start, or a remote API error later on.
    pub async fn run(self) -> Result<()> {
        let client = LongPollClient::new(
            self.api.clone(),
            self.config.longpoll.mode,
            self.config.longpoll.need_pts,
        );
        let mut backoff = Backoff::new(
            self.config.supervisor.initial_backoff(),
            self.config.supervisor.max_backoff(),
        );
        let mut first_start = true;

        loop {
            let session = match client.acquire_session().await {
                Ok(session) => session,
                Err(e) if first_start || matches!(e, ApiError::Remote { .. }) => {
                    error!("Long-poll handshake failed: {}", e);
                    return Err(e).context("Failed to acquire long-poll session");
                }
                Err(e) => {
                    if e.is_transport() {
                        warn!("VK unreachable during handshake, will retry: {}", e);
                    } else {
                        warn!("Unexpected handshake response, will retry: {}", e);
                    }
                    pause(backoff.next_delay()).await;
                    continue;
                }
            };
            first_start = false;

            let e = self.run_session(&client, session, &mut backoff).await;
            error!("Polling stopped: {:#}", e);

            let delay = backoff.next_delay();
            warn!("Restarting long-poll session in {:?}", delay);
            pause(delay).await;
        }
    }

    /// One RUNNING phase. Returns the error that ended it.
    async fn run_session(
        &self,
        client: &LongPollClient,
        mut session: LongPollSession,
        backoff: &mut Backoff,
    ) -> anyhow::Error {
        let (queue, receiver) = dispatch_queue(self.config.dispatch.queue_capacity);
        let worker = MessageWorker::new(
            self.api.clone(),
            self.handler.clone(),
            self.config.dispatch.command_prefix,
            self.config.dispatch.echo,
        );
        let worker_task = tokio::spawn(worker.run(receiver));

        info!("Polling {} from ts {}", session.server, session.ts);
        let e = match self.poll_loop(client, &mut session, &queue, backoff).await {
            Ok(never) => match never {},
            Err(e) => e,
        };

        // Let the old worker finish what was already queued so messages are
        // never handled out of order by two workers.
        queue.close();
        let drain_timeout = self.config.supervisor.drain_timeout();
        let abort = worker_task.abort_handle();
        match tokio::time::timeout(drain_timeout, worker_task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => error!("Message worker crashed: {}", join_err),
            Err(_) => {
                warn!(
                    "Message worker did not drain within {:?}, aborting it",
                    drain_timeout
                );
                abort.abort();
            }
        }
        e
    }

    async fn poll_loop(
        &self,
        client: &LongPollClient,
        session: &mut LongPollSession,
        queue: &QueueSender,
        backoff: &mut Backoff,
    ) -> Result<Infallible> {
        loop {
            let outcome = client
                .poll_once(session)
                .await
                .context("Long poll failed")?;
            backoff.reset();
            session.advance(outcome.ts, outcome.pts);

            for event in outcome.events {
                match event {
                    Event::Message(message) => queue.push(message).await?,
                    other => debug!("Ignoring event code {}", other.code()),
                }
            }
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
