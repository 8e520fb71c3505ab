//! Scripted faults for exercising retry and recovery paths.
//!
//! Faults are consumed in the order requests arrive. A fault armed for `n`
//! requests fires on the next `n` matching requests and is then spent.

use parking_lot::Mutex;
use tablekit_model::{AttributeValue, Item, Operation, ServiceError, ServiceErrorCode};

#[derive(Debug)]
struct ScriptedFailure {
    operation: Operation,
    code: ServiceErrorCode,
    remaining: usize,
}

#[derive(Debug, Default)]
struct Faults {
    failures: Vec<ScriptedFailure>,
    conflicts: usize,
    poisoned: Vec<(String, AttributeValue)>,
    unprocessed_calls: usize,
    unprocessed_per_call: usize,
}

/// Faults armed on a [`MemoryTransport`](crate::MemoryTransport).
#[derive(Debug, Default)]
pub struct FaultPlan {
    inner: Mutex<Faults>,
}

impl FaultPlan {
    /// Fail the next `times` requests of `operation` with `code`.
    pub fn fail_next(&self, operation: Operation, code: ServiceErrorCode, times: usize) {
        self.inner.lock().failures.push(ScriptedFailure {
            operation,
            code,
            remaining: times,
        });
    }

    /// Reject the next `times` requests of `operation` as over capacity.
    pub fn throttle_next(&self, operation: Operation, times: usize) {
        self.fail_next(
            operation,
            ServiceErrorCode::ProvisionedThroughputExceededException,
            times,
        );
    }

    /// Cancel the next `times` transactions with a conflict on every item.
    pub fn conflict_next_transactions(&self, times: usize) {
        self.inner.lock().conflicts += times;
    }

    /// Never process items whose `attribute` equals `value`. Batch requests
    /// hand them back as unprocessed; single writes reject them.
    pub fn poison(&self, attribute: impl Into<String>, value: AttributeValue) {
        self.inner.lock().poisoned.push((attribute.into(), value));
    }

    /// Leave the last `per_call` requests of each of the next `calls` batch
    /// requests unprocessed.
    pub fn leave_unprocessed(&self, calls: usize, per_call: usize) {
        let mut faults = self.inner.lock();
        faults.unprocessed_calls = calls;
        faults.unprocessed_per_call = per_call;
    }

    /// Disarm everything.
    pub fn clear(&self) {
        *self.inner.lock() = Faults::default();
    }

    pub(crate) fn take_failure(&self, operation: Operation) -> Option<ServiceError> {
        let mut faults = self.inner.lock();
        let failure = faults
            .failures
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining > 0)?;
        failure.remaining -= 1;
        let code = failure.code;
        faults.failures.retain(|f| f.remaining > 0);
        Some(ServiceError::with_message(
            code,
            format!("injected {} for {operation}", code.as_str()),
        ))
    }

    pub(crate) fn take_conflict(&self) -> bool {
        let mut faults = self.inner.lock();
        if faults.conflicts == 0 {
            return false;
        }
        faults.conflicts -= 1;
        true
    }

    pub(crate) fn take_unprocessed(&self) -> usize {
        let mut faults = self.inner.lock();
        if faults.unprocessed_calls == 0 {
            return 0;
        }
        faults.unprocessed_calls -= 1;
        faults.unprocessed_per_call
    }

    pub(crate) fn is_poisoned(&self, item: &Item) -> bool {
        self.inner
            .lock()
            .poisoned
            .iter()
            .any(|(attribute, value)| item.get(attribute) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_spend_failures_per_operation() {
        let plan = FaultPlan::default();
        plan.throttle_next(Operation::PutItem, 2);
        assert!(plan.take_failure(Operation::GetItem).is_none());
        let err = plan.take_failure(Operation::PutItem).unwrap();
        assert_eq!(
            err.code,
            ServiceErrorCode::ProvisionedThroughputExceededException
        );
        assert!(plan.take_failure(Operation::PutItem).is_some());
        assert!(plan.take_failure(Operation::PutItem).is_none());
    }

    #[test]
    fn test_should_spend_unprocessed_calls() {
        let plan = FaultPlan::default();
        plan.leave_unprocessed(1, 3);
        assert_eq!(plan.take_unprocessed(), 3);
        assert_eq!(plan.take_unprocessed(), 0);
    }

    #[test]
    fn test_should_match_poisoned_items() {
        let plan = FaultPlan::default();
        plan.poison("id", AttributeValue::S("bad".to_owned()));
        let bad = Item::from([("id".to_owned(), AttributeValue::S("bad".to_owned()))]);
        let good = Item::from([("id".to_owned(), AttributeValue::S("ok".to_owned()))]);
        assert!(plan.is_poisoned(&bad));
        assert!(!plan.is_poisoned(&good));
        plan.clear();
        assert!(!plan.is_poisoned(&bad));
    }
}
