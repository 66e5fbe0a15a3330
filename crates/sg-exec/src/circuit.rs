use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use sg_types::SgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Closed,
    HalfOpenProbe,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    probe_inflight: bool,
}

/// Consecutive-failure circuit breaker for one operation.
///
/// Closed until `failure_threshold` transient failures arrive in a row, then
/// open for `open_duration`. The first call after that runs as a single
/// half-open probe: success closes the circuit, failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation: String,
    failure_threshold: u32,
    open_duration: Duration,
    inner: Mutex<Inner>,
}

/// Admission to run one attempt. Must be settled with `succeed`, `fail` or
/// `release`; dropping it unsettled counts as `release`.
#[must_use]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    settled: bool,
}

impl CircuitBreaker {
    pub fn new(operation: impl Into<String>, failure_threshold: u32, open_duration: Duration) -> Self {
        CircuitBreaker {
            operation: operation.into(),
            failure_threshold: failure_threshold.max(1),
            open_duration,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                open_until: None,
                probe_inflight: false,
            }),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Current state. An open circuit whose wait has elapsed reports
    /// `HalfOpen`, since the next call will be admitted as a probe.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match (inner.state, inner.open_until) {
            (CircuitState::Open, Some(until)) if Instant::now() >= until => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    pub fn acquire(&self) -> Result<Permit<'_>, SgError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            if let Some(until) = inner.open_until {
                if now < until {
                    return Err(self.rejected());
                }
            }
            inner.state = CircuitState::HalfOpen;
            inner.open_until = None;
            inner.probe_inflight = false;
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.probe_inflight {
                return Err(self.rejected());
            }
            inner.probe_inflight = true;
            tracing::debug!(operation = %self.operation, "circuit half-open, admitting probe");
            return Ok(self.permit(PermitKind::HalfOpenProbe));
        }

        Ok(self.permit(PermitKind::Closed))
    }

    fn permit(&self, kind: PermitKind) -> Permit<'_> {
        Permit { breaker: self, kind, settled: false }
    }

    fn rejected(&self) -> SgError {
        SgError::CircuitOpen { operation: self.operation.clone() }
    }

    fn on_success(&self, kind: PermitKind) {
        let mut inner = self.inner.lock();
        match kind {
            PermitKind::HalfOpenProbe => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.open_until = None;
                inner.probe_inflight = false;
                tracing::info!(operation = %self.operation, "circuit closed, connectivity restored");
            }
            // A call admitted before the circuit tripped leaves Open and
            // HalfOpen alone.
            PermitKind::Closed if inner.state == CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            PermitKind::Closed => {}
        }
    }

    fn on_failure(&self, kind: PermitKind) {
        let mut inner = self.inner.lock();

        if kind == PermitKind::HalfOpenProbe {
            inner.state = CircuitState::Open;
            inner.probe_inflight = false;
            inner.open_until = Some(Instant::now() + self.open_duration);
            inner.consecutive_failures = 0;
            tracing::error!(operation = %self.operation, "circuit probe failed, reopening");
            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            inner.open_until = Some(Instant::now() + self.open_duration);
            inner.consecutive_failures = 0;
            inner.probe_inflight = false;
            tracing::error!(
                operation = %self.operation,
                failures = self.failure_threshold,
                open_ms = self.open_duration.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    fn on_release(&self, kind: PermitKind) {
        if kind == PermitKind::HalfOpenProbe {
            self.inner.lock().probe_inflight = false;
        }
    }
}

impl Permit<'_> {
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.kind);
    }

    /// Record a transient failure.
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.kind);
    }

    /// Give the permit back without an outcome. Counters are untouched; a
    /// half-open probe slot is freed for the next caller.
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.kind);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("ws.GetOrder", 3, Duration::from_secs(5))
    }

    fn fail_n(breaker: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            breaker.acquire().unwrap().fail();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects() {
        let breaker = breaker();
        fail_n(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail_n(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.acquire().unwrap_err();
        assert!(matches!(err, SgError::CircuitOpen { ref operation } if operation == "ws.GetOrder"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_count() {
        let breaker = breaker();
        fail_n(&breaker, 2);
        breaker.acquire().unwrap().succeed();
        fail_n(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn single_probe_after_interval_then_closes() {
        let breaker = breaker();
        fail_n(&breaker, 3);

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(breaker.acquire().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let probe = breaker.acquire().unwrap();
        assert!(breaker.acquire().is_err(), "only one probe at a time");
        probe.succeed();

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.acquire().unwrap().succeed();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_for_full_interval() {
        let breaker = breaker();
        fail_n(&breaker, 3);
        tokio::time::advance(Duration::from_secs(5)).await;

        breaker.acquire().unwrap().fail();
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(breaker.acquire().is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn released_probe_frees_slot() {
        let breaker = breaker();
        fail_n(&breaker, 3);
        tokio::time::advance(Duration::from_secs(5)).await;

        breaker.acquire().unwrap().release();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        drop(breaker.acquire().unwrap());
        assert!(breaker.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn late_success_does_not_close_open_circuit() {
        let breaker = CircuitBreaker::new("ws.GetOrder", 2, Duration::from_secs(5));
        let early = breaker.acquire().unwrap();
        fail_n(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Open);

        early.succeed();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn late_outcomes_leave_probe_slot_taken() {
        let breaker = CircuitBreaker::new("ws.GetOrder", 2, Duration::from_secs(5));
        let early_ok = breaker.acquire().unwrap();
        let early_err = breaker.acquire().unwrap();
        fail_n(&breaker, 2);
        tokio::time::advance(Duration::from_secs(5)).await;

        let probe = breaker.acquire().unwrap();
        early_ok.succeed();
        early_err.fail();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.acquire().is_err(), "probe still in flight");

        probe.succeed();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn zero_threshold_behaves_as_one() {
        let breaker = CircuitBreaker::new("q", 0, Duration::from_secs(1));
        breaker.acquire().unwrap().fail();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
