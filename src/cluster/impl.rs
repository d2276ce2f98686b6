use super::bootstrap::{self, SessionStartLimit};
use super::config::Config;
use super::error::{Error, Result};
use crate::event::{ClusterEvent, ShardEvent};
use crate::shard::{config::Config as ShardConfig, error::Error as ShardError, session, Shard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;

/// How long a shard's driving task waits between consecutive identifies it
/// paces through the cluster-wide gate.
const IDENTIFY_PACING: Duration = Duration::from_secs(5);
/// How long a failed connect or an ordinary (non-fatal) close is retried
/// after, before the next attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Gateway close code meaning the authorization token itself is invalid.
const AUTHORIZATION_INVALID_CODE: u16 = 4004;

struct Inner {
    config: Config,
    limit: Mutex<Option<SessionStartLimit>>,
    identify_gate: Semaphore,
    shard_count: AtomicU64,
    ready_shards: Mutex<HashSet<u64>>,
    ready_emitted: AtomicBool,
    destroyed: AtomicBool,
    events: mpsc::UnboundedSender<ClusterEvent>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// A manager for multiple shards: fetches gateway connection info, brings
/// shards up under the identify-quota pacing the gateway requires, and
/// reacts to each shard's close code according to a shared reconnect
/// policy.
///
/// Cloning a `Cluster` gives another handle to the same underlying shard
/// set; it does not start a second cluster.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<Inner>,
}

impl Cluster {
    /// Build a new, not-yet-started cluster and the receiver for the
    /// events it will emit.
    #[must_use]
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<ClusterEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let cluster = Self {
            inner: Arc::new(Inner {
                config,
                limit: Mutex::new(None),
                identify_gate: Semaphore::new(1),
                shard_count: AtomicU64::new(0),
                ready_shards: Mutex::new(HashSet::new()),
                ready_emitted: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                events,
                handles: Mutex::new(Vec::new()),
            }),
        };

        (cluster, rx)
    }

    /// Fetch gateway connection info, compute the shard range to run, and
    /// spawn one driving task per shard. Each task independently connects,
    /// runs its shard's protocol loop, and reconnects according to the
    /// close code it observes, until [`Self::down`] is called or the shard
    /// hits an unrecoverable condition.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap request fails or the bot's
    /// authorization token is rejected.
    pub async fn up(&self) -> Result<()> {
        let bot = bootstrap::get_gateway_bot(self.inner.config.token())
            .await
            .map_err(|source| match source {
                bootstrap::Error::Unauthorized => Error::AuthorizationInvalid,
                source => Error::from(source),
            })?;

        let gateway_url: Arc<str> = self
            .inner
            .config
            .gateway_url
            .clone()
            .unwrap_or_else(|| Arc::from(bot.url.as_str()));

        let shard_count = self.inner.config.shard_count().unwrap_or(bot.shards);
        self.inner.shard_count.store(shard_count, Ordering::SeqCst);
        *self.inner.limit.lock().await = Some(bot.session_start_limit);

        let shard_ids: Vec<u64> = self
            .inner
            .config
            .shard_ids()
            .map_or_else(|| (0..shard_count).collect(), <[u64]>::to_vec);

        for shard_id in shard_ids {
            let shard_config = ShardConfig::builder(self.inner.config.token())
                .shard(shard_id, shard_count)
                .intents(self.inner.config.intents)
                .large_threshold(self.inner.config.large_threshold)
                .use_etf(self.inner.config.use_etf)
                .compression(self.inner.config.compression)
                .gateway_url(gateway_url.to_string())
                .version(self.inner.config.version())
                .build()?;

            let shard = Shard::new(shard_config);
            let inner = Arc::clone(&self.inner);
            let url = Arc::clone(&gateway_url);

            let handle = tokio::spawn(async move {
                Self::drive(inner, shard, url).await;
            });

            self.inner.handles.lock().await.push(handle);
        }

        Ok(())
    }

    /// Stop managing every shard. Already-running connection attempts are
    /// aborted; this does not attempt a graceful close handshake.
    pub async fn down(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);

        for handle in self.inner.handles.lock().await.drain(..) {
            handle.abort();
        }
    }

    /// The total number of shards this cluster is configured to run, once
    /// [`Self::up`] has resolved it.
    #[must_use]
    pub fn shard_count(&self) -> u64 {
        self.inner.shard_count.load(Ordering::SeqCst)
    }

    async fn drive(inner: Arc<Inner>, mut shard: Shard, gateway_url: Arc<str>) {
        let shard_id = shard.id();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ShardEvent>();

        let forwarder_inner = Arc::clone(&inner);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                Self::handle_shard_event(&forwarder_inner, shard_id, event).await;
            }
        });

        let mut needs_quota = true;

        while !inner.destroyed.load(Ordering::SeqCst) {
            if needs_quota {
                Self::await_identify_quota(&inner).await;
            }

            if let Err(source) = shard.connect(&gateway_url).await {
                let _ = inner.events.send(ClusterEvent::ShardError {
                    shard_id,
                    message: source.to_string(),
                });
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }

            let _ = inner.events.send(ClusterEvent::ShardReconnecting { shard_id });

            let outcome = shard.run(&events_tx).await;

            let _ = inner.events.send(ClusterEvent::ShardDisconnected { shard_id });

            if let Some(code) = outcome.code {
                if code == AUTHORIZATION_INVALID_CODE {
                    let _ = inner.events.send(ClusterEvent::Debug(
                        ShardError::AuthorizationInvalid { shard_id }.to_string(),
                    ));
                    let _ = inner.events.send(ClusterEvent::Invalidated);
                    break;
                }

                if session::is_unrecoverable(code) {
                    let message = Self::unrecoverable_close_message(shard_id, code);
                    let _ = inner.events.send(ClusterEvent::ShardError { shard_id, message });
                    break;
                }
            }

            needs_quota = !outcome.resumable;

            if !needs_quota {
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }

        drop(events_tx);
        let _ = forwarder.await;
    }

    /// Acquire the cluster-wide identify gate, consuming one unit of
    /// quota (sleeping out `reset_after` and refetching the limit if it's
    /// exhausted), then hold the gate for the mandated pacing interval
    /// before releasing it so the next shard's identify doesn't start
    /// early.
    async fn await_identify_quota(inner: &Arc<Inner>) {
        let _permit = inner
            .identify_gate
            .acquire()
            .await
            .expect("identify gate is never closed");

        loop {
            let wait = {
                let mut limit = inner.limit.lock().await;

                match limit.as_mut() {
                    Some(limit) if limit.remaining > 0 => {
                        limit.remaining -= 1;
                        None
                    }
                    Some(limit) => Some(limit.reset_after_duration()),
                    None => None,
                }
            };

            match wait {
                Some(duration) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(?duration, "identify quota exhausted, waiting for reset");
                    let _ = inner.events.send(ClusterEvent::Debug(format!(
                        "identify quota exhausted, waiting {duration:?} for reset"
                    )));

                    tokio::time::sleep(duration).await;
                    Self::refresh_identify_quota(inner).await;
                }
                None => break,
            }
        }

        tokio::time::sleep(IDENTIFY_PACING).await;
    }

    /// Re-fetch `session_start_limit` from the bootstrap endpoint after a
    /// sleep for `reset_after` has elapsed, so the next loop iteration sees
    /// a live `remaining` count instead of the stale, already-exhausted
    /// value captured at [`Self::up`] time.
    async fn refresh_identify_quota(inner: &Arc<Inner>) {
        match bootstrap::get_gateway_bot(inner.config.token()).await {
            Ok(bot) => {
                *inner.limit.lock().await = Some(bot.session_start_limit);
            }
            Err(source) => {
                let _ = inner.events.send(ClusterEvent::Debug(format!(
                    "failed to refresh identify quota: {source}"
                )));
            }
        }
    }

    /// Describe an unrecoverable gateway close as the typed [`ShardError`]
    /// variant it corresponds to, where one exists, falling back to a
    /// generic description for the rest of the unrecoverable range.
    fn unrecoverable_close_message(shard_id: u64, code: u16) -> String {
        match code {
            4013 => ShardError::IntentsInvalid { shard_id }.to_string(),
            4014 => ShardError::IntentsDisallowed { shard_id }.to_string(),
            _ => format!("shard {shard_id} closed with unrecoverable code {code}"),
        }
    }

    async fn handle_shard_event(inner: &Arc<Inner>, shard_id: u64, event: ShardEvent) {
        match event {
            ShardEvent::FullReady { missing_guilds } => {
                let all_ready = {
                    let mut ready = inner.ready_shards.lock().await;
                    ready.insert(shard_id);
                    let total = inner.shard_count.load(Ordering::SeqCst);
                    total > 0 && ready.len() as u64 >= total
                };

                let _ = inner.events.send(ClusterEvent::ShardReady {
                    shard_id,
                    guilds: missing_guilds,
                });

                if all_ready && inner.ready_emitted.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    let _ = inner.events.send(ClusterEvent::Ready);
                }
            }
            ShardEvent::Error(message) => {
                let _ = inner.events.send(ClusterEvent::ShardError { shard_id, message });
            }
            ShardEvent::Dispatch { event_type, payload } => {
                let _ = inner.events.send(ClusterEvent::Raw {
                    shard_id,
                    event_type,
                    payload,
                });
            }
            ShardEvent::Close { code, reason } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(shard_id, ?code, %reason, "shard socket closed");

                let _ = inner.events.send(ClusterEvent::Debug(format!(
                    "shard {shard_id} socket closed, code={code:?}, reason={reason:?}"
                )));
            }
            ShardEvent::Ready { .. } | ShardEvent::Resumed | ShardEvent::InvalidSession | ShardEvent::Destroyed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{bootstrap::SessionStartLimit, Inner};
    use crate::cluster::Config;
    use crate::event::{ClusterEvent, ShardEvent};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, Semaphore};

    fn inner_with(config: Config, shard_count: u64) -> (Arc<Inner>, mpsc::UnboundedReceiver<ClusterEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            limit: Mutex::new(None),
            identify_gate: Semaphore::new(1),
            shard_count: AtomicU64::new(shard_count),
            ready_shards: Mutex::new(HashSet::new()),
            ready_emitted: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            events,
            handles: Mutex::new(Vec::new()),
        });

        (inner, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn identify_quota_is_consumed_one_unit_per_acquire() {
        let (inner, _rx) = inner_with(Config::builder("t").build().unwrap(), 1);
        *inner.limit.lock().await = Some(SessionStartLimit {
            total: 2,
            remaining: 2,
            reset_after: 60_000,
            max_concurrency: 1,
        });

        super::Cluster::await_identify_quota(&inner).await;
        assert_eq!(inner.limit.lock().await.unwrap().remaining, 1);

        super::Cluster::await_identify_quota(&inner).await;
        assert_eq!(inner.limit.lock().await.unwrap().remaining, 0);
    }

    #[test]
    fn unrecoverable_close_message_names_the_known_codes() {
        assert!(super::Cluster::unrecoverable_close_message(1, 4013).contains("intent"));
        assert!(super::Cluster::unrecoverable_close_message(1, 4014).contains("intent"));
        assert!(super::Cluster::unrecoverable_close_message(1, 4008).contains("4008"));
    }

    #[tokio::test]
    async fn close_event_is_forwarded_as_a_debug_event() {
        let (inner, mut rx) = inner_with(Config::builder("t").build().unwrap(), 1);

        super::Cluster::handle_shard_event(
            &inner,
            0,
            ShardEvent::Close {
                code: Some(4000),
                reason: "boom".to_owned(),
            },
        )
        .await;

        let event = rx.try_recv().expect("a Debug event should have been sent");
        match event {
            ClusterEvent::Debug(message) => {
                assert!(message.contains("4000"));
                assert!(message.contains("boom"));
            }
            other => panic!("expected Debug, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ready_is_emitted_exactly_once_across_all_shards() {
        let (inner, mut rx) = inner_with(Config::builder("t").build().unwrap(), 2);

        super::Cluster::handle_shard_event(&inner, 0, ShardEvent::FullReady { missing_guilds: None }).await;
        super::Cluster::handle_shard_event(&inner, 1, ShardEvent::FullReady { missing_guilds: None }).await;
        // a later re-ready on an already-counted shard must not re-emit Ready.
        super::Cluster::handle_shard_event(&inner, 1, ShardEvent::FullReady { missing_guilds: None }).await;

        let mut ready_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ClusterEvent::Ready) {
                ready_count += 1;
            }
        }

        assert_eq!(ready_count, 1);
    }
}
