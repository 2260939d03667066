//! Kernel assembly: owns the store, the scheduler state, the trigger hub,
//! and the background loops, and brings them down cleanly on shutdown.

use crate::approval::ApprovalManager;
use crate::concurrency::RunTracker;
use crate::guardrails::GuardrailEngine;
use crate::lifecycle::ShutdownManager;
use crate::multicluster::ClientFactory;
use crate::retention::{RetentionConfig, RetentionSweeper};
use crate::runner::{Runner, RunnerConfig};
use crate::schedule;
use crate::triggers::{TriggerEvent, TriggerHub};
use chrono::{DateTime, Utc};
use legator_runtime::llm::LlmDriver;
use legator_runtime::tools::ToolRegistry;
use legator_runtime::vault::VaultClient;
use legator_store::{Store, WatchEvent};
use legator_types::agent::{Agent, AgentPhase};
use legator_types::duration::parse_duration_or;
use legator_types::event::{AgentEvent, EventConsumer, EventPhase};
use legator_types::meta::NamespacedName;
use legator_types::run::{RunPhase, TriggerReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kernel tuning knobs.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Safety-net evaluation tick. The agent watch stream is the primary
    /// signal; this bounds reconciliation latency when events are missed.
    pub tick_interval: Duration,
    /// In-flight entries older than this are presumed crashed.
    pub stale_run_age: Duration,
    /// Webhook debounce window.
    pub debounce_window: Duration,
    /// Max time to wait for in-flight runs on shutdown.
    pub drain_timeout: Duration,
    pub retention: RetentionConfig,
    /// Jitter scheduled dispatches. Disabled only in tests.
    pub jitter: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            stale_run_age: Duration::from_secs(3600),
            debounce_window: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(120),
            retention: RetentionConfig::default(),
            jitter: true,
        }
    }
}

/// The control-plane core: schedule evaluation, admission, execution, and
/// drain.
pub struct Kernel {
    pub store: Arc<Store>,
    pub tracker: Arc<RunTracker>,
    pub shutdown: Arc<ShutdownManager>,
    pub triggers: Arc<TriggerHub>,
    pub clusters: ClientFactory,
    runner: Arc<Runner>,
    config: KernelConfig,
    trigger_rx: Mutex<Option<mpsc::Receiver<TriggerEvent>>>,
}

impl Kernel {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ToolRegistry>,
        driver: Arc<dyn LlmDriver>,
        vault: Option<Arc<VaultClient>>,
        config: KernelConfig,
    ) -> Arc<Self> {
        let tracker = Arc::new(RunTracker::new());
        let shutdown = Arc::new(ShutdownManager::new(Arc::clone(&tracker), config.drain_timeout));
        let (hub, trigger_rx) = TriggerHub::new(config.debounce_window);
        let approvals = Arc::new(ApprovalManager::new(Arc::clone(&store)));
        let runner = Arc::new(Runner::new(RunnerConfig {
            store: Arc::clone(&store),
            registry,
            driver,
            vault,
            engine: Arc::new(GuardrailEngine::new()),
            approvals,
        }));

        Arc::new(Self {
            clusters: ClientFactory::new(Arc::clone(&store)),
            store,
            tracker,
            shutdown,
            triggers: Arc::new(hub),
            runner,
            config,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        })
    }

    /// Start the background loops: the evaluation tick, the trigger
    /// consumer, the retention sweeper, and the periodic stale sweep.
    pub async fn start(self: &Arc<Self>, shutdown: &CancellationToken) {
        // Trigger consumer.
        {
            let kernel = Arc::clone(self);
            let token = shutdown.clone();
            let Some(mut rx) = self.trigger_rx.lock().await.take() else {
                warn!("kernel already started, ignoring");
                return;
            };
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        event = rx.recv() => match event {
                            None => return,
                            Some(event) => kernel.handle_trigger(event, &token).await,
                        },
                    }
                }
            });
        }

        // Evaluation tick loop.
        {
            let kernel = Arc::clone(self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(kernel.config.tick_interval);
                interval.tick().await; // Skip first immediate tick
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = interval.tick() => kernel.evaluate_agents(&token).await,
                    }
                }
            });
        }

        // AgentEvent watcher: directed events become admission attempts.
        {
            let kernel = Arc::clone(self);
            let token = shutdown.clone();
            let mut rx = self.store.events.watch();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        event = rx.recv() => match event {
                            Err(broadcast::error::RecvError::Closed) => return,
                            // Lagged watchers miss events; the TTL sweep
                            // expires anything unconsumed.
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Ok(WatchEvent::Added(ev)) => kernel.handle_agent_event(ev, &token).await,
                            Ok(_) => {}
                        },
                    }
                }
            });
        }

        // Retention sweeper (single leader: exactly one task).
        {
            let sweeper =
                RetentionSweeper::new(Arc::clone(&self.store), self.config.retention.clone());
            let token = shutdown.clone();
            tokio::spawn(async move {
                sweeper.run(token).await;
            });
        }

        // Stale-entry sweep for the concurrency gate and the debouncer.
        {
            let kernel = Arc::clone(self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(300));
                interval.tick().await; // Skip first immediate tick
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = interval.tick() => {
                            let cleaned = kernel.tracker.clean_stale(kernel.config.stale_run_age);
                            if cleaned > 0 {
                                warn!(cleaned, "removed stale in-flight entries");
                            }
                            kernel.triggers.clean();
                            kernel.expire_agent_events();
                        }
                    }
                }
            });
        }

        info!("kernel started");
    }

    /// Drain on shutdown. Returns the number of forcibly-cancelled runs.
    pub async fn drain(&self) -> usize {
        self.shutdown.wait_for_drain().await
    }

    // -- scheduling ---------------------------------------------------------

    /// One evaluation pass: refresh trigger routing, compute due agents,
    /// and dispatch them.
    async fn evaluate_agents(self: &Arc<Self>, shutdown: &CancellationToken) {
        let agents = self.store.agents.list();
        self.triggers.refresh(&agents);

        let now = Utc::now();
        for agent in agents {
            let key = agent.meta.key();

            match schedule::is_due(&agent, now) {
                Ok(true) => {}
                Ok(false) => {
                    self.surface_next_run(&agent, now);
                    continue;
                }
                Err(e) => {
                    // Validation problems land on agent status; no run is
                    // created.
                    let msg = e.to_string();
                    if agent.status.validation_error != msg {
                        let _ = self.store.agents.update_status(&key, |a| {
                            a.status.phase = AgentPhase::Error;
                            a.status.validation_error = msg.clone();
                        });
                    }
                    continue;
                }
            }

            self.dispatch(agent, TriggerReason::Scheduled, String::new(), now, shutdown);
        }
    }

    fn surface_next_run(&self, agent: &Agent, now: DateTime<Utc>) {
        if let Ok(next) = schedule::next_run(agent, now) {
            if agent.status.next_run_time != next {
                let key = agent.meta.key();
                let _ = self.store.agents.update_status(&key, |a| {
                    a.status.next_run_time = next;
                    if a.status.phase == AgentPhase::Pending {
                        a.status.phase = if a.spec.paused {
                            AgentPhase::Paused
                        } else {
                            AgentPhase::Ready
                        };
                    }
                });
            }
        }
    }

    /// A directed agent event becomes an admission attempt for its target;
    /// undirected events are left for dashboard consumers. The consumer
    /// record lands on the event's status either way.
    async fn handle_agent_event(self: &Arc<Self>, event: AgentEvent, shutdown: &CancellationToken) {
        if event.spec.target_agent.is_empty() {
            return;
        }
        let event_key = event.meta.key();
        let ttl = parse_duration_or(&event.spec.ttl, Duration::from_secs(3600));
        let created = event.meta.creation_timestamp.unwrap_or_else(Utc::now);
        if Utc::now() > created + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()) {
            let _ = self.store.events.update_status(&event_key, |e| {
                e.status.phase = EventPhase::Expired;
            });
            return;
        }

        let agent_key =
            NamespacedName::new(event.meta.namespace.clone(), event.spec.target_agent.clone());
        let agent = match self.store.agents.get(&agent_key) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(event = %event_key, agent = %agent_key, error = %e, "event targets unknown agent");
                return;
            }
        };
        if agent.spec.paused {
            info!(event = %event_key, agent = %agent_key, "event dropped, target agent paused");
            return;
        }

        let now = Utc::now();
        let run_name = legator_types::run::run_name(&agent.meta.name, now);
        let detail = format!("{}: {}", event.spec.summary, event.spec.detail);
        self.dispatch(agent, TriggerReason::Event, detail, now, shutdown);

        let consumer = event.spec.target_agent.clone();
        let _ = self.store.events.update_status(&event_key, |e| {
            e.status.phase = EventPhase::Consumed;
            e.status.consumed_by.push(EventConsumer {
                agent: consumer.clone(),
                consumed_at: now,
                run_name: run_name.clone(),
            });
        });
    }

    /// Expire unconsumed events past their TTL.
    fn expire_agent_events(&self) {
        let now = Utc::now();
        for event in self.store.events.list() {
            if matches!(event.status.phase, EventPhase::Consumed | EventPhase::Expired) {
                continue;
            }
            let ttl = parse_duration_or(&event.spec.ttl, Duration::from_secs(3600));
            let created = event.meta.creation_timestamp.unwrap_or(now);
            if now > created + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()) {
                let _ = self.store.events.update_status(&event.meta.key(), |e| {
                    e.status.phase = EventPhase::Expired;
                });
            }
        }
    }

    /// An external trigger becomes an admission attempt; a paused agent or
    /// a busy gate drops it.
    async fn handle_trigger(self: &Arc<Self>, event: TriggerEvent, shutdown: &CancellationToken) {
        let agent = match self.store.agents.get(&event.agent) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(agent = %event.agent, error = %e, "trigger for unknown agent");
                return;
            }
        };
        if agent.spec.paused {
            info!(agent = %event.agent, source = %event.source, "trigger dropped, agent paused");
            return;
        }
        self.dispatch(agent, TriggerReason::Webhook, event.payload, event.time, shutdown);
    }

    /// Admission: consult the gate, create the run record idempotently,
    /// and hand off to a runner task (jittered for scheduled ticks).
    fn dispatch(
        self: &Arc<Self>,
        agent: Agent,
        reason: TriggerReason,
        detail: String,
        trigger_time: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) {
        let key = agent.meta.key();
        let run_name = legator_types::run::run_name(&agent.meta.name, trigger_time);

        // Skip policy: a busy gate drops the tick.
        if !self.tracker.try_start(&key, &run_name) {
            info!(agent = %key, run = %run_name, "run in progress, skipping tick");
            return;
        }

        let run = match self.runner.admit(&agent, reason, &detail, trigger_time) {
            Ok(run) => run,
            Err(e) => {
                warn!(agent = %key, error = %e, "run admission failed");
                self.tracker.complete(&key);
                return;
            }
        };
        if run.status.phase.is_terminal() {
            // Idempotent re-admission of a finished tick.
            debug!(run = %run.meta.name, "tick already executed");
            self.tracker.complete(&key);
            return;
        }

        let _ = self.store.agents.update_status(&key, |a| {
            a.status.phase = AgentPhase::Running;
            a.status.last_run_time = Some(trigger_time);
            a.status.last_run_name = run.meta.name.clone();
            a.status.run_count += 1;
        });

        let cancel = shutdown.child_token();
        self.shutdown.register_run(&run.meta.key().to_string(), cancel.clone());

        let jitter_delay = if reason == TriggerReason::Scheduled && self.config.jitter {
            let interval = schedule::compute_interval(&agent, trigger_time);
            let jittered = schedule::apply_jitter(trigger_time, interval, 10.0);
            (jittered - Utc::now()).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let kernel = Arc::clone(self);
        tokio::spawn(async move {
            if !jitter_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(jitter_delay) => {}
                }
            }
            let run_key = run.meta.key();
            if cancel.is_cancelled() {
                // Shut down during the jitter window; the record must not
                // linger non-terminal.
                let _ = kernel.store.runs.update_status(&run_key, |r| {
                    r.status.phase = RunPhase::Failed;
                    r.status.reason = "cancelled before start".to_string();
                    r.status.completion_time = Some(Utc::now());
                });
            } else {
                kernel.runner.execute(&agent, &run, cancel).await;
            }
            kernel.tracker.complete(&agent.meta.key());
            kernel.shutdown.deregister_run(&run_key.to_string());
        });
    }
}
