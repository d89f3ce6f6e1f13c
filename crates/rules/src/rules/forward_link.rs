use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pvflow_core::Record;
use tracing::{debug, warn};

use crate::access::{FieldUpdates, RecordAccess};
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};

/// After a successful commit, sends a no-value write to each downstream
/// record so that its own rule chain re-evaluates.
pub struct ForwardLinkRule {
    targets: Vec<String>,
    access: Arc<dyn RecordAccess>,
    timeout: Duration,
}

impl ForwardLinkRule {
    pub const NAME: &'static str = "forward_link";

    pub fn new(targets: Vec<String>, access: Arc<dyn RecordAccess>, timeout: Duration) -> Self {
        Self {
            targets,
            access,
            timeout,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl fmt::Debug for ForwardLinkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardLinkRule")
            .field("targets", &self.targets)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Rule for ForwardLinkRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fields(&self) -> Option<&[&'static str]> {
        None
    }

    fn evaluate_for_init(&self, _candidate: &mut Record) -> Evaluation {
        Ok(RuleOutcome::Continue)
    }

    fn after_commit(&self, _committed: &Record) {
        for target in &self.targets {
            match self.access.write(target, FieldUpdates::new(), self.timeout) {
                Ok(()) => debug!(target = %target, "forward link triggered"),
                Err(e) => warn!(target = %target, error = %e, "forward link write failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::access::AccessError;
    use pvflow_core::{NtScalar, ScalarType, Value};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, usize)>>);

    impl RecordAccess for Recorder {
        fn read(&self, record: &str, _: Duration) -> Result<Value, AccessError> {
            Err(AccessError::NotFound(record.to_string()))
        }

        fn write(&self, record: &str, updates: FieldUpdates, _: Duration) -> Result<(), AccessError> {
            if record == "MISSING" {
                return Err(AccessError::NotFound(record.to_string()));
            }
            self.0.lock().unwrap().push((record.to_string(), updates.len()));
            Ok(())
        }
    }

    #[test]
    fn writes_empty_update_to_every_target_after_commit() {
        let recorder = Arc::new(Recorder::default());
        let rule = ForwardLinkRule::new(
            vec!["DOWN:1".into(), "MISSING".into(), "DOWN:2".into()],
            recorder.clone(),
            Duration::from_millis(10),
        );
        let mut rec = NtScalar::scalar(ScalarType::Int).build().unwrap();
        assert_eq!(rule.evaluate_for_init(&mut rec).unwrap(), RuleOutcome::Continue);
        assert!(recorder.0.lock().unwrap().is_empty());

        rule.after_commit(&rec);
        let writes = recorder.0.lock().unwrap().clone();
        assert_eq!(writes, vec![("DOWN:1".to_string(), 0), ("DOWN:2".to_string(), 0)]);
    }
}
