use crate::session::page::{Page, Visibility, VisibilitySubscription};

pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Below the threshold: the student is warned and may continue.
    Warned { count: u32, remaining: u32 },
    ThresholdReached { count: u32 },
}

/// Counts tab/window hides during an unsubmitted exam.
#[derive(Debug)]
pub struct IntegrityMonitor {
    max_violations: u32,
    violations: u32,
    warning: Option<u32>,
    subscription: Option<VisibilitySubscription>,
}

impl IntegrityMonitor {
    pub fn new(max_violations: u32) -> Self {
        Self {
            max_violations: max_violations.max(1),
            violations: 0,
            warning: None,
            subscription: None,
        }
    }

    pub fn arm(&mut self, page: &Page) {
        if self.subscription.is_none() {
            self.subscription = Some(page.on_visibility_change());
        }
    }

    /// Stops listening. Dropping the subscription deregisters it from the page.
    pub fn disarm(&mut self) {
        self.subscription = None;
    }

    pub fn is_armed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Next visibility transition; pends forever while disarmed.
    pub async fn next_transition(&mut self) -> Visibility {
        loop {
            match self.subscription.as_mut() {
                Some(subscription) => match subscription.recv().await {
                    Some(visibility) => return visibility,
                    None => self.subscription = None,
                },
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Every hidden transition counts once; rapid toggles are not merged.
    pub fn record_hidden(&mut self) -> ViolationOutcome {
        self.violations = self.violations.saturating_add(1);
        if self.violations >= self.max_violations {
            self.warning = None;
            ViolationOutcome::ThresholdReached { count: self.violations }
        } else {
            self.warning = Some(self.violations);
            ViolationOutcome::Warned {
                count: self.violations,
                remaining: self.max_violations - self.violations,
            }
        }
    }

    pub fn dismiss_warning(&mut self) {
        self.warning = None;
    }

    /// Violation count the blocking warning was raised for, while it is up.
    pub fn active_warning(&self) -> Option<u32> {
        self.warning
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn max_violations(&self) -> u32 {
        self.max_violations
    }
}
