//! Background polling scheduler.
//!
//! One loop task per process owns the timer and the active provider and
//! reacts to inbound events through a [`SchedulerHandle`]. A polling cycle
//! runs on its own task so the loop keeps receiving commands; while it is in
//! flight every further trigger is dropped.
//!
//! State machine: `Idle -> Fetching -> Idle | IdleWithError`.
//!
//! Every provider (re)configuration starts a new generation. A cycle that
//! finishes after its generation ended is discarded, and its writes are
//! rejected by the database unless the stored configuration still names the
//! endpoint it polled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::db::{self, pool::DbPool};
use crate::error::AppError;
use crate::models::settings::MIN_INTERVAL_MINUTES;
use crate::models::{PinnedTab, PollingSettings, PollingSnapshot, ProviderKind};
use crate::services::credentials::CredentialStore;
use crate::services::provider::PrProvider;
use crate::services::registry::{self, ProviderRegistry};
use crate::services::scheduler_events::SchedulerEvent;

/// Capacity of the outbound event channel.
const EVENT_CAPACITY: usize = 64;

/// Tuning knobs for the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Length of one polling-interval unit. A minute in production.
    pub minute: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            minute: Duration::from_secs(60),
        }
    }
}

impl SchedulerOptions {
    fn period(&self, minutes: u32) -> Duration {
        self.minute * minutes.max(MIN_INTERVAL_MINUTES)
    }
}

/// Phase of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Fetching,
    /// Last cycle failed; the previous snapshot is still current.
    IdleWithError,
}

/// Observable scheduler status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,

    /// Whether the periodic timer is running.
    pub armed: bool,

    pub interval_minutes: u32,

    /// Size of the pinned list in the current snapshot.
    pub badge_count: usize,

    /// Time of the last successful cycle.
    pub last_fetch_time: Option<DateTime<Utc>>,

    /// Message of the last failed cycle, cleared on success.
    pub last_error: Option<String>,

    /// Credential rejected; reconnect required.
    pub auth_expired: bool,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            armed: false,
            interval_minutes: PollingSettings::default().interval_minutes,
            badge_count: 0,
            last_fetch_time: None,
            last_error: None,
            auth_expired: false,
        }
    }
}

/// Commands accepted by the scheduler loop.
#[derive(Debug)]
enum SchedulerCommand {
    /// Configuration appeared or changed: re-init, fetch, re-arm.
    ProviderConfigured,

    /// Immediate fetch, subject to the in-flight guard.
    Refresh,

    /// Re-arm the timer with a new period.
    SetPollingInterval(u32, oneshot::Sender<Result<u32, AppError>>),

    /// Recompute the badge from the stored snapshot.
    SetPinnedTab(PinnedTab, oneshot::Sender<Result<usize, AppError>>),

    Stop,
}

/// How a cycle ended.
#[derive(Debug)]
enum CycleOutcome {
    Succeeded {
        snapshot: PollingSnapshot,
        degraded: usize,
    },
    Failed(AppError),
    AuthExpired(AppError),
    /// The configuration moved to another endpoint while fetching; nothing
    /// was written.
    Superseded,
}

/// The provider being polled and the endpoint it was built for.
#[derive(Clone)]
struct ActiveProvider {
    provider: Arc<dyn PrProvider>,
    kind: ProviderKind,
    base_url: String,
}

/// State shared between the loop and its handles.
struct Shared {
    pool: DbPool,
    status: RwLock<SchedulerStatus>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Shared {
    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Recompute the badge from the stored snapshot and pinned tab.
    ///
    /// Runs under the status lock so a cycle and a tab change cannot
    /// interleave their reads and writes.
    async fn recompute_badge(&self) -> Result<usize, AppError> {
        let mut status = self.status.write().await;
        let settings = db::settings::get_polling_settings(&self.pool).await?;
        let count = db::snapshot::load_snapshot(&self.pool)
            .await?
            .map(|snapshot| snapshot.count_for(settings.pinned_tab))
            .unwrap_or(0);

        status.badge_count = count;
        drop(status);

        self.emit(SchedulerEvent::BadgeUpdated { count });
        Ok(count)
    }
}

/// Lightweight handle for controlling the scheduler.
///
/// Communicates with the loop via an mpsc channel; status reads go through
/// the shared lock without involving the loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    async fn send(&self, command: SchedulerCommand) -> Result<(), AppError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AppError::internal("Scheduler not running"))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, AppError>>) -> SchedulerCommand,
    ) -> Result<T, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| AppError::internal("Scheduler not running"))?
    }

    /// Provider configuration appeared or changed.
    pub async fn provider_configured(&self) -> Result<(), AppError> {
        self.send(SchedulerCommand::ProviderConfigured).await
    }

    /// Fetch now unless a cycle is already running.
    pub async fn refresh(&self) -> Result<(), AppError> {
        self.send(SchedulerCommand::Refresh).await
    }

    /// Persist and apply a new polling interval. Returns the applied value
    /// (at least one minute). Does not fetch.
    pub async fn set_polling_interval(&self, minutes: u32) -> Result<u32, AppError> {
        self.request(|reply| SchedulerCommand::SetPollingInterval(minutes, reply))
            .await
    }

    /// Persist the pinned tab and return the recomputed badge count.
    /// Does not fetch.
    pub async fn set_pinned_tab(&self, tab: PinnedTab) -> Result<usize, AppError> {
        self.request(|reply| SchedulerCommand::SetPinnedTab(tab, reply))
            .await
    }

    /// Stop the loop. A cycle already in flight runs to completion.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.send(SchedulerCommand::Stop).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.shared.status.read().await.clone()
    }

    /// The last persisted snapshot.
    pub async fn snapshot(&self) -> Result<Option<PollingSnapshot>, AppError> {
        Ok(db::snapshot::load_snapshot(&self.shared.pool).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }
}

/// The polling scheduler loop.
pub struct Scheduler {
    shared: Arc<Shared>,
    registry: ProviderRegistry,
    credentials: Arc<dyn CredentialStore>,
    options: SchedulerOptions,
    provider: Option<ActiveProvider>,
    /// Bumped on every provider (re)configuration.
    generation: u64,
    timer: Option<Interval>,
    period: Duration,
    in_flight: Option<JoinHandle<CycleOutcome>>,
    in_flight_generation: u64,
}

impl Scheduler {
    /// Start the scheduler loop on the current runtime.
    ///
    /// The loop restores status from the database, rebuilds the provider from
    /// the stored configuration and, if one exists, arms the timer and runs
    /// an initial cycle. Without configuration polling stays disarmed until
    /// [`SchedulerHandle::provider_configured`].
    pub fn start(
        pool: DbPool,
        registry: ProviderRegistry,
        credentials: Arc<dyn CredentialStore>,
    ) -> SchedulerHandle {
        Self::start_with_options(pool, registry, credentials, SchedulerOptions::default())
    }

    /// Like [`Scheduler::start`], with custom options.
    pub fn start_with_options(
        pool: DbPool,
        registry: ProviderRegistry,
        credentials: Arc<dyn CredentialStore>,
        options: SchedulerOptions,
    ) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            pool,
            status: RwLock::new(SchedulerStatus::default()),
            events,
        });

        let scheduler = Scheduler {
            shared: shared.clone(),
            registry,
            credentials,
            options,
            provider: None,
            generation: 0,
            timer: None,
            period: options.period(PollingSettings::default().interval_minutes),
            in_flight: None,
            in_flight_generation: 0,
        };
        tokio::spawn(scheduler.run(command_rx));

        SchedulerHandle { command_tx, shared }
    }

    async fn run(mut self, mut command_rx: mpsc::Receiver<SchedulerCommand>) {
        self.restore().await;
        if self.init_provider().await {
            self.arm().await;
            self.trigger("initial").await;
        }

        loop {
            tokio::select! {
                _ = next_tick(&mut self.timer) => {
                    self.trigger("timer").await;
                }
                outcome = join_cycle(&mut self.in_flight) => {
                    self.in_flight = None;
                    if self.in_flight_generation == self.generation {
                        self.on_cycle_end(outcome).await;
                    } else {
                        log::info!("[poll] Discarding cycle started before the provider changed");
                        self.supersede().await;
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::ProviderConfigured) => {
                            log::info!("[poll] Provider configured");
                            if self.init_provider().await {
                                self.arm().await;
                                self.trigger("provider configured").await;
                            } else {
                                self.disarm().await;
                                // Disconnecting may have cleared the snapshot
                                if let Err(e) = self.shared.recompute_badge().await {
                                    log::warn!("[poll] Failed to recompute badge: {}", e);
                                }
                            }
                        }
                        Some(SchedulerCommand::Refresh) => {
                            self.trigger("manual refresh").await;
                        }
                        Some(SchedulerCommand::SetPollingInterval(minutes, reply)) => {
                            let _ = reply.send(self.apply_interval(minutes).await);
                        }
                        Some(SchedulerCommand::SetPinnedTab(tab, reply)) => {
                            let _ = reply.send(self.apply_pinned_tab(tab).await);
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            log::info!("[poll] Scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }

        self.timer = None;
        self.shared.status.write().await.armed = false;
        log::info!("[poll] Scheduler stopped");
    }

    /// Load persisted settings and badge into the status.
    async fn restore(&mut self) {
        match db::settings::get_polling_settings(&self.shared.pool).await {
            Ok(settings) => {
                self.period = self.options.period(settings.interval_minutes);
                let mut status = self.shared.status.write().await;
                status.interval_minutes = settings.effective_interval_minutes();
            }
            Err(e) => log::warn!("[poll] Failed to load polling settings: {}", e),
        }

        match db::snapshot::load_snapshot(&self.shared.pool).await {
            Ok(Some(snapshot)) => {
                self.shared.status.write().await.last_fetch_time = Some(snapshot.fetched_at);
                if let Err(e) = self.shared.recompute_badge().await {
                    log::warn!("[poll] Failed to restore badge: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("[poll] Failed to load snapshot: {}", e),
        }
    }

    /// Rebuild the provider from stored configuration and credential.
    ///
    /// Configuration errors leave the provider unset; they are logged, never
    /// surfaced as a failed cycle.
    async fn init_provider(&mut self) -> bool {
        self.generation += 1;
        match self.build_provider().await {
            Ok(Some(provider)) => {
                log::info!("[poll] Using {} provider at {}", provider.kind, provider.base_url);
                self.provider = Some(provider);
                let mut status = self.shared.status.write().await;
                status.auth_expired = false;
                true
            }
            Ok(None) => {
                log::info!("[poll] No provider configured; polling disarmed");
                self.provider = None;
                false
            }
            Err(e) => {
                log::warn!("[poll] Provider configuration unusable: {}", e);
                self.provider = None;
                false
            }
        }
    }

    async fn build_provider(&self) -> Result<Option<ActiveProvider>, AppError> {
        let Some(stored) = db::settings::get_provider_config(&self.shared.pool).await? else {
            return Ok(None);
        };

        let token = match self.credentials.get_token(&stored.base_url) {
            Ok(token) => token,
            Err(AppError::NotFound { .. }) => {
                return Err(AppError::config(format!(
                    "No credential stored for {}",
                    stored.base_url
                )))
            }
            Err(e) => return Err(e),
        };

        let config = stored.with_token(token)?;
        let provider = self.registry.create(&config)?;
        Ok(Some(ActiveProvider {
            provider,
            kind: config.kind,
            base_url: config.base_url,
        }))
    }

    async fn arm(&mut self) {
        self.timer = Some(interval_after(self.period));
        self.shared.status.write().await.armed = true;
        log::debug!("[poll] Timer armed, period={:?}", self.period);
    }

    async fn disarm(&mut self) {
        self.timer = None;
        self.shared.status.write().await.armed = false;
        log::debug!("[poll] Timer disarmed");
    }

    /// Start a cycle unless one is in flight or no provider is configured.
    async fn trigger(&mut self, reason: &str) {
        let Some(active) = self.provider.clone() else {
            log::debug!("[poll] {} ignored: no provider configured", reason);
            return;
        };

        if self.in_flight.is_some() {
            log::debug!("[poll] {} dropped: cycle already in flight", reason);
            return;
        }

        log::info!("[poll] Starting cycle ({})", reason);
        self.shared.status.write().await.state = SchedulerState::Fetching;
        self.shared.emit(SchedulerEvent::FetchStarted);

        let pool = self.shared.pool.clone();
        self.in_flight_generation = self.generation;
        self.in_flight = Some(tokio::spawn(async move {
            run_cycle(&pool, &active).await
        }));
    }

    /// Settle a cycle whose provider is no longer current, then poll the
    /// current one, if any.
    async fn supersede(&mut self) {
        self.shared.status.write().await.state = SchedulerState::Idle;
        self.trigger("provider changed during cycle").await;
    }

    /// Publish the result of a finished cycle. Runs after the in-flight
    /// slot is cleared, so observers of these events can trigger again.
    async fn on_cycle_end(&mut self, outcome: Result<CycleOutcome, tokio::task::JoinError>) {
        let shared = &self.shared;
        match outcome {
            Ok(CycleOutcome::Succeeded { snapshot, degraded }) => {
                {
                    let mut status = shared.status.write().await;
                    status.state = SchedulerState::Idle;
                    status.last_fetch_time = Some(snapshot.fetched_at);
                    status.last_error = None;
                    status.auth_expired = false;
                }

                log::info!(
                    "[poll] Cycle complete: {} own, {} review-requested, {} degraded",
                    snapshot.my_prs.len(),
                    snapshot.review_requested_prs.len(),
                    degraded
                );

                shared.emit(SchedulerEvent::SnapshotUpdated {
                    my_prs: snapshot.my_prs,
                    review_requested_prs: snapshot.review_requested_prs,
                    degraded,
                    fetched_at: snapshot.fetched_at,
                });

                if let Err(e) = shared.recompute_badge().await {
                    log::warn!("[poll] Failed to recompute badge: {}", e);
                }

                // A manual refresh after an auth failure re-arms polling.
                if self.timer.is_none() && self.provider.is_some() {
                    self.arm().await;
                }
            }
            Ok(CycleOutcome::AuthExpired(e)) => {
                log::warn!("[poll] Credential rejected, polling disarmed: {}", e);
                {
                    let mut status = shared.status.write().await;
                    status.state = SchedulerState::IdleWithError;
                    status.last_error = Some(e.to_string());
                    status.auth_expired = true;
                }
                self.disarm().await;
                self.shared.emit(SchedulerEvent::AuthExpired {
                    message: e.to_string(),
                });
            }
            Ok(CycleOutcome::Superseded) => {
                // The configuration event that replaced the endpoint is
                // still queued and starts the next cycle.
                log::info!("[poll] Provider changed during cycle; nothing stored");
                shared.status.write().await.state = SchedulerState::Idle;
            }
            Ok(CycleOutcome::Failed(e)) => self.fail_cycle(AppError::cycle(e.to_string())).await,
            Err(e) => {
                self.fail_cycle(AppError::cycle(format!("cycle task aborted: {}", e)))
                    .await
            }
        }
    }

    /// Record an abandoned cycle. The stored snapshot is left untouched and
    /// the next tick retries.
    async fn fail_cycle(&self, error: AppError) {
        log::error!("[poll] {}; keeping previous snapshot", error);
        {
            let mut status = self.shared.status.write().await;
            status.state = SchedulerState::IdleWithError;
            status.last_error = Some(error.to_string());
        }
        self.shared.emit(SchedulerEvent::CycleFailed {
            message: error.to_string(),
        });
    }

    async fn apply_interval(&mut self, minutes: u32) -> Result<u32, AppError> {
        let minutes = db::settings::set_polling_interval(&self.shared.pool, minutes).await?;
        self.period = self.options.period(minutes);
        self.shared.status.write().await.interval_minutes = minutes;

        if self.timer.is_some() {
            self.timer = Some(interval_after(self.period));
        }
        log::info!("[poll] Polling interval set to {} minute(s)", minutes);
        Ok(minutes)
    }

    async fn apply_pinned_tab(&self, tab: PinnedTab) -> Result<usize, AppError> {
        db::settings::set_pinned_tab(&self.shared.pool, tab).await?;
        let count = self.shared.recompute_badge().await?;
        log::debug!("[poll] Pinned {} (badge {})", tab, count);
        Ok(count)
    }
}

/// One polling cycle: identity, both lists, persist.
async fn run_cycle(pool: &DbPool, active: &ActiveProvider) -> CycleOutcome {
    match fetch_and_persist(pool, active).await {
        Ok(Some((snapshot, degraded))) => CycleOutcome::Succeeded { snapshot, degraded },
        Ok(None) => CycleOutcome::Superseded,
        Err(e) if e.is_auth_error() => CycleOutcome::AuthExpired(e),
        Err(e) => CycleOutcome::Failed(e),
    }
}

/// Returns `None` when the stored configuration no longer names the
/// endpoint this cycle polled.
async fn fetch_and_persist(
    pool: &DbPool,
    active: &ActiveProvider,
) -> Result<Option<(PollingSnapshot, usize)>, AppError> {
    let provider = active.provider.as_ref();
    let identity = provider.authenticate().await?;
    match db::settings::update_identity(pool, active.kind, &active.base_url, &identity).await {
        Ok(true) => {}
        Ok(false) => log::debug!("[poll] Identity not cached; provider config changed"),
        Err(e) => log::warn!("[poll] Failed to cache identity: {}", e),
    }

    let outcome = registry::fetch_all(provider).await?;
    let degraded = outcome.degraded_count();
    let snapshot = outcome.into_snapshot();

    // Single statement; readers see the old or the new snapshot in full.
    let saved =
        db::snapshot::save_snapshot_for(pool, &snapshot, active.kind, &active.base_url).await?;
    Ok(saved.then_some((snapshot, degraded)))
}

/// An interval whose first tick is one period from now.
fn interval_after(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Next timer tick; never resolves while disarmed.
async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

/// Completion of the in-flight cycle; never resolves while idle.
async fn join_cycle(
    in_flight: &mut Option<JoinHandle<CycleOutcome>>,
) -> Result<CycleOutcome, tokio::task::JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
