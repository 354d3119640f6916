// ============================
// crates/backend-lib/src/aggregator.rs
// ============================
//! Per-attempt decision collection and the official result.
use reflights_common::{Decision, Seat, ServerMessage, Verdict, REFEREE_COUNT};

/// Official result of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptResult {
    pub left: Decision,
    pub center: Decision,
    pub right: Decision,
}

impl AttemptResult {
    pub fn verdict(&self) -> Verdict {
        Verdict::from_decisions([self.left, self.center, self.right])
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::DisplayResults {
            left_decision: self.left,
            center_decision: self.center,
            right_decision: self.right,
            verdict: self.verdict(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Still waiting on other seats
    Pending { submitted: usize },
    /// This submission completed the attempt
    Completed(AttemptResult),
    /// The result was already displayed; the decision was not recorded
    Locked,
}

/// Decisions for the current attempt.
///
/// A seat may change its mind until all three are in (last write wins).
/// Once complete the result is locked until [`DecisionAggregator::clear`].
#[derive(Debug, Default)]
pub struct DecisionAggregator {
    decisions: [Option<Decision>; REFEREE_COUNT],
    completed: bool,
    attempt: u64,
}

impl DecisionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, seat: Seat, decision: Decision) -> SubmitOutcome {
        if self.completed {
            return SubmitOutcome::Locked;
        }

        self.decisions[seat.index()] = Some(decision);

        match self.decisions {
            [Some(left), Some(center), Some(right)] => {
                self.completed = true;
                SubmitOutcome::Completed(AttemptResult {
                    left,
                    center,
                    right,
                })
            },
            _ => SubmitOutcome::Pending {
                submitted: self.submitted().len(),
            },
        }
    }

    /// Wipe all decisions and begin a new attempt.
    pub fn clear(&mut self) {
        self.decisions = [None; REFEREE_COUNT];
        self.completed = false;
        self.attempt += 1;
    }

    /// Seats that have submitted for the current attempt
    pub fn submitted(&self) -> Vec<Seat> {
        Seat::ALL
            .into_iter()
            .filter(|seat| self.decisions[seat.index()].is_some())
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Number of times the decisions have been cleared
    pub fn attempt(&self) -> u64 {
        self.attempt
    }
}
