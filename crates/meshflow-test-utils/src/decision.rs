use std::collections::VecDeque;
use std::sync::Mutex;

use meshflow_core::traits::DecisionPolicy;
use meshflow_core::types::Decision;
use meshflow_core::ExecutionContext;

/// Always returns the same decision.
pub struct FixedDecision(pub Decision);

impl FixedDecision {
    pub fn yes() -> Self {
        Self(Decision {
            decision: true,
            confidence: 1.0,
        })
    }

    pub fn no() -> Self {
        Self(Decision {
            decision: false,
            confidence: 1.0,
        })
    }
}

impl DecisionPolicy for FixedDecision {
    fn decide(&self, _context: &ExecutionContext) -> Decision {
        self.0
    }
}

/// Replays a scripted list of outcomes; repeats the last one when exhausted.
pub struct SequenceDecision {
    queue: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
}

impl SequenceDecision {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(false),
        }
    }
}

impl DecisionPolicy for SequenceDecision {
    fn decide(&self, _context: &ExecutionContext) -> Decision {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            *last = next;
        }
        Decision {
            decision: *last,
            confidence: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_repeats_last() {
        let policy = SequenceDecision::new([true, false]);
        let ctx = ExecutionContext::new();
        assert!(policy.decide(&ctx).decision);
        assert!(!policy.decide(&ctx).decision);
        assert!(!policy.decide(&ctx).decision);
    }
}
