//! Registry of running live sessions.
//!
//! The manager owns the shared collaborators (historical data, stream
//! transport, strategy store and connection budget) and one handle per
//! session. Sessions themselves run as independent tasks; the manager only
//! starts them, signals them to stop and collects their reports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::candle::{Candle, parse_interval};
use crate::domain::error::TradeloopError;
use crate::domain::strategy::StrategyDefinition;
use crate::live::rate_limit::ConnectionBudget;
use crate::live::session::{Session, SessionConfig, SessionReport, SessionSnapshot};
use crate::ports::data_port::HistoricalData;
use crate::ports::strategy_port::StrategyStore;
use crate::ports::stream_port::StreamTransport;

type Sessions = HashMap<String, Entry>;

enum Entry {
    /// Id reserved while `start` fetches history; holds the stopped session it replaces.
    Starting { previous: Option<SessionHandle> },
    Active(SessionHandle),
}

struct SessionHandle {
    stop_tx: watch::Sender<bool>,
    snapshots: watch::Receiver<SessionSnapshot>,
    reports: watch::Receiver<Option<SessionReport>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn is_running(&self) -> bool {
        self.reports.borrow().is_none() && !self.task.is_finished()
    }
}

/// Releases a `Starting` reservation unless `start` completed.
struct Reservation<'a> {
    sessions: &'a Mutex<Sessions>,
    id: &'a str,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut sessions = lock(self.sessions);
        match sessions.remove(self.id) {
            Some(Entry::Starting {
                previous: Some(previous),
            }) => {
                sessions.insert(self.id.to_string(), Entry::Active(previous));
            }
            Some(Entry::Starting { previous: None }) | None => {}
            Some(active) => {
                sessions.insert(self.id.to_string(), active);
            }
        }
    }
}

fn lock(sessions: &Mutex<Sessions>) -> MutexGuard<'_, Sessions> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(session_id: &str) -> TradeloopError {
    TradeloopError::SessionNotFound {
        id: session_id.to_string(),
    }
}

pub struct SessionManager<D: HistoricalData, T: StreamTransport> {
    data: Arc<D>,
    transport: Arc<T>,
    strategies: Arc<dyn StrategyStore>,
    budget: Arc<ConnectionBudget>,
    sessions: Mutex<Sessions>,
}

impl<D: HistoricalData, T: StreamTransport> SessionManager<D, T> {
    pub fn new(
        data: Arc<D>,
        transport: Arc<T>,
        strategies: Arc<dyn StrategyStore>,
        budget: Arc<ConnectionBudget>,
    ) -> Self {
        Self {
            data,
            transport,
            strategies,
            budget,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategies(&self) -> &Arc<dyn StrategyStore> {
        &self.strategies
    }

    /// Start a session for a stored strategy.
    ///
    /// Fetches enough closed history to fill the window before connecting.
    /// A stopped session with the same id is replaced. The registry is not
    /// locked during the fetch, so other sessions stay reachable.
    pub async fn start(
        &self,
        session_id: &str,
        strategy_id: &str,
        config: SessionConfig,
    ) -> Result<SessionSnapshot, TradeloopError> {
        let mut reservation = self.reserve(session_id)?;

        let strategy =
            self.strategies
                .get(strategy_id)
                .ok_or_else(|| TradeloopError::InvalidStrategy {
                    reason: format!("Unknown strategy '{}'.", strategy_id),
                })?;
        strategy.validate()?;
        let interval = parse_interval(&config.interval)?;
        self.budget.try_acquire()?;

        let history = self.fetch_history(&config, interval).await?;
        info!(
            session = session_id,
            strategy = strategy_id,
            symbol = %config.symbol,
            interval = %config.interval,
            history = history.len(),
            "starting session"
        );

        let (handle, snapshot) = self.spawn(session_id, strategy, config, history);
        lock(&self.sessions).insert(session_id.to_string(), Entry::Active(handle));
        reservation.armed = false;
        Ok(snapshot)
    }

    fn reserve<'a>(&'a self, session_id: &'a str) -> Result<Reservation<'a>, TradeloopError> {
        let mut sessions = lock(&self.sessions);
        let previous = match sessions.remove(session_id) {
            None => None,
            Some(Entry::Active(handle)) if !handle.is_running() => Some(handle),
            Some(entry) => {
                sessions.insert(session_id.to_string(), entry);
                return Err(TradeloopError::SessionExists {
                    id: session_id.to_string(),
                });
            }
        };
        sessions.insert(session_id.to_string(), Entry::Starting { previous });
        Ok(Reservation {
            sessions: &self.sessions,
            id: session_id,
            armed: true,
        })
    }

    async fn fetch_history(
        &self,
        config: &SessionConfig,
        interval: chrono::Duration,
    ) -> Result<Vec<Candle>, TradeloopError> {
        let now = Utc::now();
        let span = i32::try_from(config.window_size + 1)
            .ok()
            .and_then(|n| interval.checked_mul(n))
            .ok_or_else(|| TradeloopError::InvalidData {
                reason: format!("Window of {} candles is too large.", config.window_size),
            })?;
        Ok(self
            .data
            .fetch_candles(&config.symbol, &config.interval, now - span, now)
            .await?
            .into_iter()
            .filter(|c| c.is_closed_at(now))
            .collect())
    }

    fn spawn(
        &self,
        session_id: &str,
        strategy: StrategyDefinition,
        config: SessionConfig,
        history: Vec<Candle>,
    ) -> (SessionHandle, SessionSnapshot) {
        let (session, snapshots) =
            Session::new(session_id.to_string(), strategy, config, history);
        let snapshot = snapshots.borrow().clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (report_tx, reports) = watch::channel(None);
        let run = session.run(
            Arc::clone(&self.transport),
            Arc::clone(&self.budget),
            stop_rx,
        );
        let task = tokio::spawn(async move {
            let report = run.await;
            report_tx.send_replace(Some(report));
        });

        let handle = SessionHandle {
            stop_tx,
            snapshots,
            reports,
            task,
        };
        (handle, snapshot)
    }

    /// Stop a session and return its report. Stopping twice returns the same report.
    ///
    /// Waiting for the report happens outside the registry lock; dropping
    /// this future leaves the session stopping and a later call still
    /// returns its report.
    pub async fn stop(&self, session_id: &str) -> Result<SessionReport, TradeloopError> {
        let mut reports = {
            let sessions = lock(&self.sessions);
            match sessions.get(session_id) {
                Some(Entry::Active(handle)) => {
                    handle.stop_tx.send_replace(true);
                    handle.reports.clone()
                }
                Some(Entry::Starting { .. }) | None => return Err(not_found(session_id)),
            }
        };

        let first = reports.borrow().is_none();
        let report = reports
            .wait_for(Option::is_some)
            .await
            .map_err(|_| TradeloopError::Connection {
                reason: format!("session task for '{}' ended without a report", session_id),
            })?
            .clone()
            .ok_or_else(|| not_found(session_id))?;

        if first {
            info!(session = session_id, reason = %report.stop_reason, "session stopped");
        }
        Ok(report)
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionSnapshot, TradeloopError> {
        match lock(&self.sessions).get(session_id) {
            Some(Entry::Active(handle)) => Ok(handle.snapshots.borrow().clone()),
            _ => Err(not_found(session_id)),
        }
    }

    /// Watch a session's snapshots as they change.
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<watch::Receiver<SessionSnapshot>, TradeloopError> {
        match lock(&self.sessions).get(session_id) {
            Some(Entry::Active(handle)) => Ok(handle.snapshots.clone()),
            _ => Err(not_found(session_id)),
        }
    }

    /// Snapshots of every started session, ordered by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = lock(&self.sessions)
            .values()
            .filter_map(|entry| match entry {
                Entry::Active(handle) => Some(handle.snapshots.borrow().clone()),
                Entry::Starting { .. } => None,
            })
            .collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    pub async fn stop_all(&self) -> Vec<SessionReport> {
        let ids: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            match self.stop(&id).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(session = %id, error = %e, "failed to stop session"),
            }
        }
        reports.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        reports
    }
}
