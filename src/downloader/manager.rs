use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use crate::api::SelectionPreference;
use crate::downloader::status::{FailureRecord, RunStatus, StatusEvent, StatusSink};
use crate::downloader::task::EpisodeRunner;
use crate::errors::{AppError, Result};

/// Default number of episodes processed at the same time.
pub const DEFAULT_MAX_SLOTS: usize = 7;

#[derive(Debug, Clone)]
struct QueueItem {
    episode: u32,
    preference: SelectionPreference,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Every episode ever accepted by this queue.
    seen: HashSet<u32>,
    pending: VecDeque<QueueItem>,
    in_flight: BTreeSet<u32>,
    failures: Vec<FailureRecord>,
    draining: bool,
}

struct Shared {
    runner: Arc<dyn EpisodeRunner>,
    sink: Arc<dyn StatusSink>,
    max_slots: usize,
    state: Mutex<QueueState>,
    wake: Notify,
    idle: watch::Sender<bool>,
    cancel: CancellationToken,
}

/// Deduplicating episode queue with a fixed number of worker slots.
///
/// A drain cycle starts when work arrives on an idle queue and ends once
/// nothing is pending or running; it closes with an aggregate `Error`
/// (only if something failed) followed by `End`.
pub struct EpisodeQueue {
    shared: Arc<Shared>,
}

impl EpisodeQueue {
    pub fn new(runner: Arc<dyn EpisodeRunner>, sink: Arc<dyn StatusSink>, max_slots: usize) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                runner,
                sink,
                max_slots: max_slots.max(1),
                state: Mutex::new(QueueState::default()),
                wake: Notify::new(),
                idle,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Queues every episode not seen before; returns how many were accepted.
    pub async fn enqueue(&self, episodes: &[u32], preference: &SelectionPreference) -> Result<usize> {
        if self.shared.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut state = self.shared.state.lock().await;
        let mut accepted = 0;
        for &episode in episodes {
            if state.seen.insert(episode) {
                state.pending.push_back(QueueItem {
                    episode,
                    preference: preference.clone(),
                });
                accepted += 1;
            }
        }
        log::info!(
            "[QUEUE] Accepted {} of {} episode(s), {} pending",
            accepted,
            episodes.len(),
            state.pending.len()
        );
        self.shared.sink.update(StatusEvent::Left(state.pending.len()));

        if accepted > 0 {
            if state.draining {
                self.shared.wake.notify_one();
            } else {
                state.draining = true;
                state.failures.clear();
                self.shared.idle.send_replace(false);
                tokio::spawn(Self::drain(self.shared.clone()));
            }
        }
        Ok(accepted)
    }

    async fn drain(shared: Arc<Shared>) {
        let mut running: JoinSet<(u32, Result<()>)> = JoinSet::new();
        // a panicked or aborted task only reports its id
        let mut workers: HashMap<Id, u32> = HashMap::new();
        log::info!("🚀 [QUEUE] Drain started with {} slot(s)", shared.max_slots);

        loop {
            {
                let mut state = shared.state.lock().await;
                while running.len() < shared.max_slots {
                    let Some(item) = state.pending.pop_front() else { break };
                    state.in_flight.insert(item.episode);
                    shared.sink.update(StatusEvent::Left(state.pending.len()));
                    shared.sink.update(StatusEvent::Current(item.episode));

                    let runner = shared.runner.clone();
                    let cancel = shared.cancel.child_token();
                    let episode = item.episode;
                    let handle = running.spawn(async move {
                        let QueueItem { episode, preference } = item;
                        let result = runner.run(episode, &preference, &cancel).await;
                        (episode, result)
                    });
                    workers.insert(handle.id(), episode);
                }

                if running.is_empty() {
                    // nothing pending either; close the cycle under the lock so a
                    // concurrent enqueue starts a fresh one
                    state.draining = false;
                    if !state.failures.is_empty() {
                        shared.sink.update(StatusEvent::Error {
                            episode: None,
                            message: format!("{} episodes failed", state.failures.len()),
                        });
                    }
                    shared.sink.update(StatusEvent::End);
                    shared.idle.send_replace(true);
                    log::info!("🎉 [QUEUE] Drain finished, {} failure(s)", state.failures.len());
                    return;
                }
            }

            tokio::select! {
                joined = running.join_next() => {
                    if let Some(joined) = joined {
                        Self::settle(&shared, &mut workers, joined).await;
                    }
                }
                _ = shared.wake.notified() => {}
            }
        }
    }

    async fn settle(
        shared: &Shared,
        workers: &mut HashMap<Id, u32>,
        joined: std::result::Result<(u32, Result<()>), JoinError>,
    ) {
        let (episode, result) = match joined {
            Ok((episode, result)) => {
                workers.retain(|_, running| *running != episode);
                (episode, result)
            }
            Err(e) => {
                let Some(episode) = workers.remove(&e.id()) else {
                    log::error!("❌ [QUEUE] Unknown worker stopped: {}", e);
                    return;
                };
                log::error!("❌ [QUEUE] Worker for episode {} stopped: {}", episode, e);
                let message = format!("episode {} worker stopped: {}", episode, e);
                shared.sink.update(StatusEvent::Error {
                    episode: Some(episode),
                    message: message.clone(),
                });
                (episode, Err(AppError::Worker(message)))
            }
        };

        let mut state = shared.state.lock().await;
        state.in_flight.remove(&episode);
        match result {
            Ok(()) => log::info!("✅ [QUEUE] Episode {} settled", episode),
            Err(e) => {
                log::warn!("⚠️ [QUEUE] Episode {} failed: {}", episode, e);
                state.failures.push(FailureRecord {
                    episode,
                    error: e.to_string(),
                    failed_at: chrono::Utc::now(),
                });
            }
        }
    }

    /// Resolves once the current drain cycle (if any) has emitted `End`.
    pub async fn wait_idle(&self) {
        let mut idle = self.shared.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub async fn status(&self) -> RunStatus {
        let state = self.shared.state.lock().await;
        RunStatus {
            remaining: state.pending.len(),
            currently_processing: state.in_flight.clone(),
            failures: state.failures.clone(),
        }
    }

    /// Cancels running episodes and drops pending ones. The queue accepts no further work.
    pub async fn shutdown(&self) {
        let mut state = self.shared.state.lock().await;
        let dropped = state.pending.len();
        state.pending.clear();
        self.shared.cancel.cancel();
        self.shared.wake.notify_one();
        log::info!(
            "[QUEUE] Shutdown: {} pending dropped, {} running cancelled",
            dropped,
            state.in_flight.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeRunner {
        failing: HashSet<u32>,
        panics_on: Option<u32>,
        delay_ms: u64,
        active: AtomicUsize,
        peak: AtomicUsize,
        started: std::sync::Mutex<Vec<u32>>,
    }

    impl FakeRunner {
        fn new(delay_ms: u64, failing: &[u32]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                delay_ms,
                ..Self::default()
            }
        }

        fn started(&self) -> Vec<u32> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EpisodeRunner for FakeRunner {
        async fn run(&self, episode: u32, _preference: &SelectionPreference, cancel: &CancellationToken) -> Result<()> {
            self.started.lock().unwrap().push(episode);
            if self.panics_on == Some(episode) {
                panic!("runner blew up on episode {}", episode);
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(AppError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(self.delay_ms)) => {
                    if self.failing.contains(&episode) {
                        Err(AppError::Fetch {
                            url: "https://cdn.example.com/uwu.m3u8".to_string(),
                            status: 500,
                            content_type: String::new(),
                        })
                    } else {
                        Ok(())
                    }
                }
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn recording_sink() -> (Arc<dyn StatusSink>, Arc<std::sync::Mutex<Vec<StatusEvent>>>) {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: Arc<dyn StatusSink> = Arc::new(move |event: StatusEvent| sink_events.lock().unwrap().push(event));
        (sink, events)
    }

    fn current_events(events: &[StatusEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Current(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_duplicate_episodes_run_once() {
        let runner = Arc::new(FakeRunner::new(20, &[]));
        let (sink, events) = recording_sink();
        let queue = EpisodeQueue::new(runner.clone(), sink, DEFAULT_MAX_SLOTS);
        let preference = SelectionPreference::default();

        assert_eq!(queue.enqueue(&[5, 7, 5], &preference).await.unwrap(), 2);
        assert_eq!(queue.enqueue(&[5, 9], &preference).await.unwrap(), 1);
        queue.wait_idle().await;

        let mut started = runner.started();
        started.sort();
        assert_eq!(started, vec![5, 7, 9]);

        let mut current = current_events(&events.lock().unwrap());
        current.sort();
        assert_eq!(current, vec![5, 7, 9]);
    }

    #[tokio::test]
    async fn test_slots_bound_concurrency() {
        let runner = Arc::new(FakeRunner::new(30, &[]));
        let (sink, _events) = recording_sink();
        let queue = EpisodeQueue::new(runner.clone(), sink, 2);

        queue.enqueue(&[1, 2, 3, 4, 5], &SelectionPreference::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = queue.status().await;
        assert_eq!(status.currently_processing.len(), 2);
        assert_eq!(status.remaining, 3);

        queue.wait_idle().await;
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
        assert_eq!(runner.started(), vec![1, 2, 3, 4, 5]);
        assert!(queue.status().await.currently_processing.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_aggregated() {
        let runner = Arc::new(FakeRunner::new(10, &[3]));
        let (sink, events) = recording_sink();
        let queue = EpisodeQueue::new(runner.clone(), sink, 2);

        queue.enqueue(&[3, 4, 5], &SelectionPreference::default()).await.unwrap();
        queue.wait_idle().await;

        let events = events.lock().unwrap().clone();
        let aggregate: Vec<&StatusEvent> = events
            .iter()
            .filter(|e| matches!(e, StatusEvent::Error { episode: None, .. }))
            .collect();
        assert_eq!(
            aggregate,
            vec![&StatusEvent::Error {
                episode: None,
                message: "1 episodes failed".to_string()
            }]
        );
        assert_eq!(events.last(), Some(&StatusEvent::End));

        let status = queue.status().await;
        assert_eq!(status.failures.len(), 1);
        assert_eq!(status.failures[0].episode, 3);
        assert_eq!(runner.started().len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_recorded_as_failure() {
        let runner = Arc::new(FakeRunner {
            panics_on: Some(1),
            ..FakeRunner::new(5, &[])
        });
        let (sink, events) = recording_sink();
        let queue = EpisodeQueue::new(runner.clone(), sink, 2);

        queue.enqueue(&[1, 2], &SelectionPreference::default()).await.unwrap();
        queue.wait_idle().await;

        let status = queue.status().await;
        assert!(status.currently_processing.is_empty());
        assert_eq!(status.failures.len(), 1);
        assert_eq!(status.failures[0].episode, 1);
        assert!(status.failures[0].error.contains("worker stopped"));

        let events = events.lock().unwrap().clone();
        assert!(events.iter().any(|e| matches!(e, StatusEvent::Error { episode: Some(1), .. })));
        assert!(events.contains(&StatusEvent::Error {
            episode: None,
            message: "1 episodes failed".to_string()
        }));
        assert_eq!(events.last(), Some(&StatusEvent::End));
        assert_eq!(runner.started(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_clean_run_has_no_aggregate_error() {
        let runner = Arc::new(FakeRunner::new(1, &[]));
        let (sink, events) = recording_sink();
        let queue = EpisodeQueue::new(runner, sink, 3);

        queue.enqueue(&[1], &SelectionPreference::default()).await.unwrap();
        queue.wait_idle().await;

        let events = events.lock().unwrap().clone();
        assert!(!events.iter().any(|e| matches!(e, StatusEvent::Error { .. })));
        assert_eq!(events.first(), Some(&StatusEvent::Left(1)));
        assert_eq!(events.last(), Some(&StatusEvent::End));
    }

    #[tokio::test]
    async fn test_second_cycle_after_idle() {
        let runner = Arc::new(FakeRunner::new(1, &[]));
        let (sink, events) = recording_sink();
        let queue = EpisodeQueue::new(runner.clone(), sink, 2);
        let preference = SelectionPreference::default();

        queue.enqueue(&[1], &preference).await.unwrap();
        queue.wait_idle().await;
        queue.enqueue(&[2], &preference).await.unwrap();
        queue.wait_idle().await;

        let ends = events.lock().unwrap().iter().filter(|e| **e == StatusEvent::End).count();
        assert_eq!(ends, 2);
        assert_eq!(runner.started(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_and_drops_pending() {
        let runner = Arc::new(FakeRunner::new(10_000, &[]));
        let (sink, _events) = recording_sink();
        let queue = EpisodeQueue::new(runner.clone(), sink, 1);

        queue.enqueue(&[1, 2, 3], &SelectionPreference::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown().await;
        queue.wait_idle().await;

        assert_eq!(runner.started(), vec![1]);
        let status = queue.status().await;
        assert_eq!(status.failures.len(), 1);
        assert_eq!(status.failures[0].error, AppError::Cancelled.to_string());
        assert!(matches!(
            queue.enqueue(&[4], &SelectionPreference::default()).await,
            Err(AppError::Cancelled)
        ));
    }
}
