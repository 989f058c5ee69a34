#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitReason {
    Manual,
    Timeout,
    Violation,
}

impl SubmitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitReason::Manual => "manual",
            SubmitReason::Timeout => "timeout",
            SubmitReason::Violation => "violation",
        }
    }

    pub fn is_auto(self) -> bool {
        !matches!(self, SubmitReason::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Open,
    InFlight { reason: SubmitReason, attempt: u32 },
    Sealed,
}

/// Proof that the holder owns the single in-flight submission. Consumed by
/// [`SubmissionGuard::seal`] or [`SubmissionGuard::release`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an acquired ticket must be sealed or released"]
pub struct SubmitTicket {
    reason: SubmitReason,
    attempt: u32,
}

impl SubmitTicket {
    pub fn reason(&self) -> SubmitReason {
        self.reason
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Allows at most one submission to be in flight or to have succeeded.
#[derive(Debug, Clone)]
pub struct SubmissionGuard {
    state: GuardState,
    attempts: u32,
}

impl Default for SubmissionGuard {
    fn default() -> Self {
        Self::open()
    }
}

impl SubmissionGuard {
    pub fn open() -> Self {
        Self { state: GuardState::Open, attempts: 0 }
    }

    /// A guard for a session whose exam was already submitted earlier.
    pub fn sealed() -> Self {
        Self { state: GuardState::Sealed, attempts: 0 }
    }

    /// Flips the guard synchronously. `None` means a submission is already
    /// in flight or done and the caller must do nothing.
    pub fn try_acquire(&mut self, reason: SubmitReason) -> Option<SubmitTicket> {
        if self.state != GuardState::Open {
            return None;
        }
        self.attempts += 1;
        self.state = GuardState::InFlight { reason, attempt: self.attempts };
        Some(SubmitTicket { reason, attempt: self.attempts })
    }

    pub fn seal(&mut self, ticket: SubmitTicket) {
        if self.owns(&ticket) {
            self.state = GuardState::Sealed;
        }
    }

    /// Rolls back after a failed attempt so the student can retry.
    pub fn release(&mut self, ticket: SubmitTicket) {
        if self.owns(&ticket) {
            self.state = GuardState::Open;
        }
    }

    fn owns(&self, ticket: &SubmitTicket) -> bool {
        matches!(self.state, GuardState::InFlight { attempt, .. } if attempt == ticket.attempt)
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_engaged(&self) -> bool {
        self.state != GuardState::Open
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, GuardState::InFlight { .. })
    }

    pub fn is_sealed(&self) -> bool {
        self.state == GuardState::Sealed
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REASONS: [SubmitReason; 3] =
        [SubmitReason::Manual, SubmitReason::Timeout, SubmitReason::Violation];

    #[test]
    fn second_acquire_is_refused_while_in_flight() {
        let mut guard = SubmissionGuard::open();
        let ticket = guard.try_acquire(SubmitReason::Timeout).expect("first acquire");
        assert_eq!(ticket.reason(), SubmitReason::Timeout);

        for reason in REASONS {
            assert!(guard.try_acquire(reason).is_none());
        }
        assert!(guard.is_in_flight());

        guard.seal(ticket);
        assert!(guard.is_sealed());
        for reason in REASONS {
            assert!(guard.try_acquire(reason).is_none());
        }
        assert_eq!(guard.attempts(), 1);
    }

    #[test]
    fn release_permits_exactly_one_retry() {
        let mut guard = SubmissionGuard::open();
        let first = guard.try_acquire(SubmitReason::Violation).expect("first");
        guard.release(first);
        assert_eq!(guard.state(), GuardState::Open);

        let retry = guard.try_acquire(SubmitReason::Manual).expect("retry");
        assert_eq!(retry.attempt(), 2);
        assert!(guard.try_acquire(SubmitReason::Manual).is_none());
        guard.seal(retry);
        assert!(guard.is_sealed());
    }

    #[test]
    fn sealed_guard_refuses_everything() {
        let mut guard = SubmissionGuard::sealed();
        assert!(guard.is_engaged());
        for reason in REASONS {
            assert!(guard.try_acquire(reason).is_none());
        }
        assert_eq!(guard.attempts(), 0);
    }

    #[test]
    fn stale_ticket_does_not_change_state() {
        let mut guard = SubmissionGuard::open();
        let first = guard.try_acquire(SubmitReason::Manual).expect("first");
        let stale = SubmitTicket { reason: first.reason(), attempt: first.attempt() };
        guard.release(first);

        let second = guard.try_acquire(SubmitReason::Manual).expect("second");
        guard.release(stale);
        assert!(guard.is_in_flight());
        guard.seal(second);
        assert!(guard.is_sealed());
    }

    #[test]
    fn any_trigger_interleaving_yields_one_acquire_until_settled() {
        // Every ordering of three triggers, each fired twice.
        let mut orders = Vec::new();
        for first in REASONS {
            for second in REASONS {
                for third in REASONS {
                    orders.push([first, second, third, third, second, first]);
                }
            }
        }

        for order in orders {
            let mut guard = SubmissionGuard::open();
            let acquired: Vec<SubmitTicket> =
                order.iter().filter_map(|reason| guard.try_acquire(*reason)).collect();
            assert_eq!(acquired.len(), 1, "order {order:?}");
            assert_eq!(acquired[0].reason(), order[0]);
        }
    }
}
