use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::{Price, PricingKind};
use crate::observability;
use crate::store::{CatalogSource, StoreError};

use super::{PriceQuery, PriceResolution, resolve_in_catalog};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Identity of a query for duplicate suppression: package, area, frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    package_id: Ulid,
    area_bits: u64,
    frequency: i64,
}

impl Signature {
    pub fn of(query: &PriceQuery) -> Self {
        Self {
            package_id: query.package_id,
            area_bits: query.area.to_bits(),
            frequency: query.frequency,
        }
    }
}

/// A completed lookup as delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub query: PriceQuery,
    /// `None` when the package was not in the fetched catalog.
    pub kind: Option<PricingKind>,
    pub resolution: PriceResolution,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Resolved(Resolved),
    /// The catalog could not be fetched. Distinct from a `NotFound` resolution.
    Failed { query: PriceQuery, error: StoreError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppressed {
    Duplicate,
    InFlight,
    Closed,
}

impl Suppressed {
    fn label(&self) -> &'static str {
        match self {
            Suppressed::Duplicate => "duplicate",
            Suppressed::InFlight => "in_flight",
            Suppressed::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub id: u64,
    pub query: PriceQuery,
}

impl Attempt {
    fn signature(&self) -> Signature {
        Signature::of(&self.query)
    }
}

/// The fields a caller cares about when deciding whether a result is news.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Notified {
    package_id: Ulid,
    kind: Option<PricingKind>,
    area_bits: u64,
    frequency: i64,
    price: Option<Price>,
}

impl Notified {
    fn of(resolved: &Resolved) -> Self {
        Self {
            package_id: resolved.query.package_id,
            kind: resolved.kind,
            area_bits: resolved.query.area.to_bits(),
            frequency: resolved.query.frequency,
            price: resolved.resolution.price(),
        }
    }
}

/// Bookkeeping for one resolution session, free of any timers or tasks.
///
/// - `try_issue` refuses a query whose signature matches the last issued one,
///   or while another attempt is in flight.
/// - `supersede` cancels the in-flight attempt; its result is dropped on arrival.
/// - `complete` only accepts the attempt that is currently in flight and
///   swallows results equal to the last one notified.
/// - A cancelled or failed attempt rolls `last_issued` back to the last
///   successful signature so the same input can be tried again.
#[derive(Debug, Default)]
pub struct SessionState {
    last_issued: Option<Signature>,
    last_completed: Option<Signature>,
    last_notified: Option<Notified>,
    in_flight: Option<Attempt>,
    next_attempt: u64,
    closed: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_issued(&self) -> Option<Signature> {
        self.last_issued
    }

    pub fn try_issue(&mut self, query: &PriceQuery) -> Result<Attempt, Suppressed> {
        if self.closed {
            return Err(Suppressed::Closed);
        }
        if self.in_flight.is_some() {
            return Err(Suppressed::InFlight);
        }
        let signature = Signature::of(query);
        if self.last_issued == Some(signature) {
            return Err(Suppressed::Duplicate);
        }
        self.next_attempt += 1;
        let attempt = Attempt {
            id: self.next_attempt,
            query: *query,
        };
        self.last_issued = Some(signature);
        self.in_flight = Some(attempt);
        Ok(attempt)
    }

    /// New input arrived. Returns the attempt that was cancelled, if any.
    pub fn supersede(&mut self) -> Option<Attempt> {
        let cancelled = self.in_flight.take();
        if cancelled.is_some() {
            self.last_issued = self.last_completed;
        }
        cancelled
    }

    pub fn complete(
        &mut self,
        attempt: Attempt,
        outcome: Result<Resolved, StoreError>,
    ) -> Option<SessionEvent> {
        if self.in_flight.map(|a| a.id) != Some(attempt.id) {
            debug!(attempt = attempt.id, "discarding stale resolution");
            return None;
        }
        self.in_flight = None;

        match outcome {
            Ok(resolved) => {
                self.last_completed = Some(attempt.signature());
                let notified = Notified::of(&resolved);
                if self.last_notified == Some(notified) {
                    debug!(attempt = attempt.id, "resolution unchanged, not notifying");
                    return None;
                }
                self.last_notified = Some(notified);
                Some(SessionEvent::Resolved(resolved))
            }
            Err(error) => {
                self.last_issued = self.last_completed;
                Some(SessionEvent::Failed {
                    query: attempt.query,
                    error,
                })
            }
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.in_flight = None;
    }
}

// ── Debounced driver ─────────────────────────────────────────────

struct InFlight {
    attempt: Attempt,
    handle: JoinHandle<Result<Resolved, StoreError>>,
}

/// Debounced, deduplicated price resolution for one interactive caller.
///
/// Feed raw input with `update`; settled results arrive on the receiver
/// returned by `spawn`. Dropping the session (or calling `close`) tears it
/// down and suppresses anything still running.
pub struct ResolutionSession {
    input: mpsc::UnboundedSender<PriceQuery>,
    task: JoinHandle<()>,
}

impl ResolutionSession {
    pub fn spawn<C>(
        catalog: Arc<C>,
        service_type: impl Into<String>,
        debounce: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>)
    where
        C: CatalogSource + 'static,
    {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            catalog,
            service_type.into(),
            debounce,
            input_rx,
            events_tx,
        ));
        (
            Self {
                input: input_tx,
                task,
            },
            events_rx,
        )
    }

    /// Returns false if the session has already shut down.
    pub fn update(&self, query: PriceQuery) -> bool {
        self.input.send(query).is_ok()
    }

    pub async fn close(self) {
        let Self { input, task } = self;
        drop(input);
        let _ = task.await;
    }
}

async fn run_session<C>(
    catalog: Arc<C>,
    service_type: String,
    debounce: Duration,
    mut input: mpsc::UnboundedReceiver<PriceQuery>,
    events: mpsc::UnboundedSender<SessionEvent>,
) where
    C: CatalogSource + 'static,
{
    let mut state = SessionState::new();
    let mut pending: Option<PriceQuery> = None;
    let mut deadline = Instant::now();
    let mut in_flight: Option<InFlight> = None;

    loop {
        tokio::select! {
            msg = input.recv() => match msg {
                Some(query) => {
                    // Input that settles back on the running attempt leaves it alone.
                    if let Some(f) = &in_flight
                        && f.attempt.signature() == Signature::of(&query)
                    {
                        pending = None;
                        debug!(attempt = f.attempt.id, "input matches in-flight resolution");
                        metrics::counter!(observability::RESOLUTION_ATTEMPTS_SUPPRESSED_TOTAL, "reason" => Suppressed::Duplicate.label())
                            .increment(1);
                        continue;
                    }
                    pending = Some(query);
                    deadline = Instant::now() + debounce;
                    if let Some(cancelled) = state.supersede() {
                        debug!(attempt = cancelled.id, "input changed, cancelling in-flight resolution");
                        if let Some(f) = in_flight.take() {
                            f.handle.abort();
                        }
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                let Some(query) = pending.take() else { continue };
                match state.try_issue(&query) {
                    Ok(attempt) => {
                        debug!(attempt = attempt.id, package = %query.package_id, area = query.area, frequency = query.frequency, "issuing resolution");
                        let catalog = catalog.clone();
                        let service_type = service_type.clone();
                        let handle = tokio::spawn(async move {
                            lookup(catalog.as_ref(), &service_type, attempt.query).await
                        });
                        in_flight = Some(InFlight { attempt, handle });
                    }
                    Err(reason) => {
                        debug!(?reason, "resolution attempt suppressed");
                        metrics::counter!(observability::RESOLUTION_ATTEMPTS_SUPPRESSED_TOTAL, "reason" => reason.label())
                            .increment(1);
                    }
                }
            }
            (attempt, joined) = wait_for(&mut in_flight) => {
                in_flight = None;
                let outcome = joined.unwrap_or_else(|e| {
                    Err(StoreError::Unavailable(format!("resolution task failed: {e}")))
                });
                if let Err(ref e) = outcome {
                    warn!(error = %e, "price lookup failed");
                    metrics::counter!(observability::PRICE_RESOLUTIONS_TOTAL, "outcome" => "error")
                        .increment(1);
                }
                if let Some(event) = state.complete(attempt, outcome)
                    && events.send(event).is_err()
                {
                    // receiver gone, nobody is listening any more
                    break;
                }
            }
        }
    }

    state.close();
    if let Some(f) = in_flight.take() {
        f.handle.abort();
    }
    debug!("resolution session closed");
}

async fn wait_for(
    slot: &mut Option<InFlight>,
) -> (Attempt, Result<Result<Resolved, StoreError>, JoinError>) {
    match slot {
        Some(f) => {
            let joined = (&mut f.handle).await;
            (f.attempt, joined)
        }
        None => std::future::pending().await,
    }
}

async fn lookup<C>(catalog: &C, service_type: &str, query: PriceQuery) -> Result<Resolved, StoreError>
where
    C: CatalogSource + ?Sized,
{
    let packages = catalog.fetch_package_catalog(service_type).await?;
    let kind = packages
        .iter()
        .find(|p| p.id == query.package_id)
        .map(|p| p.model.kind());
    let resolution = resolve_in_catalog(&query, &packages);
    Ok(Resolved {
        query,
        kind,
        resolution,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::model::*;

    struct MockCatalog {
        packages: Vec<ServicePackage>,
        calls: AtomicUsize,
        delay: Duration,
        failing: AtomicBool,
    }

    impl MockCatalog {
        fn new(packages: Vec<ServicePackage>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                packages,
                calls: AtomicUsize::new(0),
                delay,
                failing: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogSource for MockCatalog {
        async fn fetch_package_catalog(
            &self,
            service_type: &str,
        ) -> Result<Vec<ServicePackage>, StoreError> {
            assert_eq!(service_type, "cleaning");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("catalog offline".into()));
            }
            Ok(self.packages.clone())
        }
    }

    fn package() -> ServicePackage {
        ServicePackage {
            id: Ulid::new(),
            name: "Home cleaning".into(),
            service_type: "cleaning".into(),
            model: PricingModel::Tiered {
                tiers: vec![
                    PricingTier {
                        area_min: 1.0,
                        area_max: 99.0,
                        required_staff: 1,
                        estimated_hours: Some(2.0),
                        prices: vec![
                            FrequencyPrice { frequency: 1, price: 700 },
                            FrequencyPrice { frequency: 4, price: 2400 },
                        ],
                    },
                    PricingTier {
                        area_min: 100.0,
                        area_max: 199.0,
                        required_staff: 2,
                        estimated_hours: Some(3.0),
                        prices: vec![
                            FrequencyPrice { frequency: 1, price: 1000 },
                            FrequencyPrice { frequency: 4, price: 3200 },
                        ],
                    },
                ],
            },
        }
    }

    fn resolved(query: PriceQuery, price: Option<Price>) -> Resolved {
        let resolution = match price {
            Some(price) => PriceResolution::Found(super::super::PriceQuote {
                price,
                required_staff: 1,
                estimated_hours: None,
                tier: Some(0),
                integrity: Vec::new(),
            }),
            None => PriceResolution::NotFound(super::super::Miss::NoTierForArea { area: query.area }),
        };
        Resolved {
            query,
            kind: Some(PricingKind::Tiered),
            resolution,
        }
    }

    // ── SessionState ─────────────────────────────────────────

    #[test]
    fn same_signature_twice_is_suppressed() {
        let mut st = SessionState::new();
        let q = PriceQuery::new(Ulid::new(), 150.0, 4);
        let a = st.try_issue(&q).unwrap();
        assert!(st.complete(a, Ok(resolved(q, Some(3200)))).is_some());
        assert_eq!(st.try_issue(&q), Err(Suppressed::Duplicate));
    }

    #[test]
    fn second_issue_while_in_flight_is_suppressed() {
        let mut st = SessionState::new();
        let pid = Ulid::new();
        st.try_issue(&PriceQuery::new(pid, 100.0, 1)).unwrap();
        assert!(st.is_in_flight());
        assert_eq!(
            st.try_issue(&PriceQuery::new(pid, 120.0, 1)),
            Err(Suppressed::InFlight)
        );
    }

    #[test]
    fn last_issued_wins_over_last_completed() {
        let mut st = SessionState::new();
        let pid = Ulid::new();
        let q1 = PriceQuery::new(pid, 100.0, 1);
        let q2 = PriceQuery::new(pid, 150.0, 1);

        let a1 = st.try_issue(&q1).unwrap();
        assert_eq!(st.supersede(), Some(a1));
        let a2 = st.try_issue(&q2).unwrap();

        // The earlier attempt finishes late: it must not surface.
        assert_eq!(st.complete(a1, Ok(resolved(q1, Some(1000)))), None);
        assert!(st.is_in_flight());

        let ev = st.complete(a2, Ok(resolved(q2, Some(1000))));
        assert!(matches!(ev, Some(SessionEvent::Resolved(r)) if r.query == q2));
    }

    #[test]
    fn failure_allows_identical_retry() {
        let mut st = SessionState::new();
        let q = PriceQuery::new(Ulid::new(), 150.0, 4);
        let a = st.try_issue(&q).unwrap();
        let ev = st.complete(a, Err(StoreError::Unavailable("down".into())));
        assert!(matches!(ev, Some(SessionEvent::Failed { .. })));
        assert_eq!(st.last_issued(), None);

        let a = st.try_issue(&q).expect("retry must not be suppressed");
        assert!(st.complete(a, Ok(resolved(q, Some(3200)))).is_some());
    }

    #[test]
    fn cancelled_attempt_rolls_back_to_last_success() {
        let mut st = SessionState::new();
        let pid = Ulid::new();
        let q1 = PriceQuery::new(pid, 100.0, 1);
        let q2 = PriceQuery::new(pid, 150.0, 1);

        let a1 = st.try_issue(&q1).unwrap();
        st.complete(a1, Ok(resolved(q1, Some(1000))));
        st.try_issue(&q2).unwrap();
        st.supersede();
        assert_eq!(st.last_issued(), Some(Signature::of(&q1)));
        // Back to the value already shown: nothing to do.
        assert_eq!(st.try_issue(&q1), Err(Suppressed::Duplicate));
    }

    #[test]
    fn equal_result_is_not_renotified() {
        let mut st = SessionState::new();
        let q = PriceQuery::new(Ulid::new(), 150.0, 4);
        let a = st.try_issue(&q).unwrap();
        assert!(st.complete(a, Ok(resolved(q, Some(3200)))).is_some());

        // Get past the issue guard; the notification guard still holds.
        st.last_issued = None;
        let b = st.try_issue(&q).unwrap();
        assert_eq!(st.complete(b, Ok(resolved(q, Some(3200)))), None);

        // Same query, new price (catalog edited): that is news.
        st.last_issued = None;
        let c = st.try_issue(&q).unwrap();
        assert!(st.complete(c, Ok(resolved(q, Some(3400)))).is_some());
    }

    #[test]
    fn closed_session_discards_everything() {
        let mut st = SessionState::new();
        let q = PriceQuery::new(Ulid::new(), 150.0, 4);
        let a = st.try_issue(&q).unwrap();
        st.close();
        assert_eq!(st.complete(a, Ok(resolved(q, Some(3200)))), None);
        assert_eq!(
            st.try_issue(&PriceQuery::new(q.package_id, 10.0, 1)),
            Err(Suppressed::Closed)
        );
    }

    // ── Debounced driver ─────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_resolve_once_with_last_value() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::ZERO);
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        session.update(PriceQuery::new(pkg.id, 50.0, 4));
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.update(PriceQuery::new(pkg.id, 120.0, 4));
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.update(PriceQuery::new(pkg.id, 150.0, 4));

        let ev = events.recv().await.unwrap();
        match ev {
            SessionEvent::Resolved(r) => {
                assert_eq!(r.query.area, 150.0);
                assert_eq!(r.kind, Some(PricingKind::Tiered));
                assert_eq!(r.resolution.price(), Some(3200));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(catalog.calls(), 1);

        let quiet = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert!(quiet.is_err());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_query_notifies_once() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::ZERO);
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        let q = PriceQuery::new(pkg.id, 150.0, 1);
        session.update(q);
        assert!(matches!(events.recv().await, Some(SessionEvent::Resolved(_))));

        session.update(q);
        let quiet = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert!(quiet.is_err());
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_result_is_dropped() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::from_secs(1));
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        session.update(PriceQuery::new(pkg.id, 50.0, 1));
        // Debounce elapses, lookup starts and is still running.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(catalog.calls(), 1);
        session.update(PriceQuery::new(pkg.id, 150.0, 1));

        match events.recv().await.unwrap() {
            SessionEvent::Resolved(r) => assert_eq!(r.resolution.price(), Some(1000)),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(catalog.calls(), 2);
        let quiet = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn same_input_during_lookup_keeps_the_running_attempt() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::from_secs(1));
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        let q = PriceQuery::new(pkg.id, 150.0, 4);
        session.update(q);
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(catalog.calls(), 1);
        session.update(q);

        match events.recv().await.unwrap() {
            SessionEvent::Resolved(r) => assert_eq!(r.resolution.price(), Some(3200)),
            other => panic!("unexpected event: {other:?}"),
        }
        let quiet = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert!(quiet.is_err());
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_and_revert_during_lookup_keeps_the_running_attempt() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::from_secs(1));
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        let q = PriceQuery::new(pkg.id, 150.0, 4);
        session.update(q);
        tokio::time::sleep(Duration::from_millis(700)).await;
        // A keystroke away and straight back, before the debounce fires: the
        // first edit cancels, the revert is issued again.
        session.update(PriceQuery::new(pkg.id, 15.0, 4));
        session.update(q);

        assert!(matches!(events.recv().await, Some(SessionEvent::Resolved(_))));
        assert_eq!(catalog.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn collaborator_failure_is_reported_and_retryable() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::ZERO);
        catalog.failing.store(true, Ordering::SeqCst);
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        let q = PriceQuery::new(pkg.id, 150.0, 4);
        session.update(q);
        match events.recv().await.unwrap() {
            SessionEvent::Failed { query, error } => {
                assert_eq!(query, q);
                assert_eq!(error, StoreError::Unavailable("catalog offline".into()));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        catalog.failing.store(false, Ordering::SeqCst);
        session.update(q);
        assert!(matches!(events.recv().await, Some(SessionEvent::Resolved(_))));
        assert_eq!(catalog.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_a_resolution_not_a_failure() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::ZERO);
        let (session, mut events) =
            ResolutionSession::spawn(catalog, "cleaning", DEFAULT_DEBOUNCE);

        session.update(PriceQuery::new(pkg.id, 150.0, 2));
        match events.recv().await.unwrap() {
            SessionEvent::Resolved(r) => assert!(!r.resolution.found()),
            other => panic!("unexpected event: {other:?}"),
        }
        session.update(PriceQuery::new(Ulid::new(), 150.0, 1));
        match events.recv().await.unwrap() {
            SessionEvent::Resolved(r) => {
                assert_eq!(r.kind, None);
                assert!(!r.resolution.found());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_suppresses_in_flight_result() {
        let pkg = package();
        let catalog = MockCatalog::new(vec![pkg.clone()], Duration::from_secs(2));
        let (session, mut events) =
            ResolutionSession::spawn(catalog.clone(), "cleaning", DEFAULT_DEBOUNCE);

        session.update(PriceQuery::new(pkg.id, 150.0, 4));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(catalog.calls(), 1);
        session.close().await;

        assert_eq!(events.recv().await, None);
    }
}
