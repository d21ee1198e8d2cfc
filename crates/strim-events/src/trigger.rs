use anyhow::Result;
use tracing::warn;

use crate::action::ActionDescriptor;
use crate::event::NormalizedEvent;

/// Pure rule evaluated against each normalized event.
///
/// Triggers hold no I/O state. `matches` decides eligibility; `build_action`
/// constructs the descriptor and may fail for malformed event payloads, which
/// the registry treats as a skippable internal fault.
pub trait Trigger: Send + Sync {
    /// Stable identifier recorded on produced descriptors and telemetry.
    fn id(&self) -> &str;
    /// Returns true when the trigger should fire for this event.
    fn matches(&self, event: &NormalizedEvent) -> bool;
    /// Builds the action for a matching event; `Ok(None)` means the trigger
    /// elected not to act after all.
    fn build_action(&self, event: &NormalizedEvent) -> Result<Option<ActionDescriptor>>;
}

/// Ordered trigger collection owned by one tenant.
///
/// Registration order is evaluation order; every matching trigger fires (no
/// short-circuit), and a faulting trigger never aborts evaluation of the
/// remaining ones.
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: Vec<Box<dyn Trigger>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a trigger; it evaluates after every previously registered one.
    pub fn register(&mut self, trigger: Box<dyn Trigger>) {
        self.triggers.push(trigger);
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Evaluates every trigger against `event`, in registration order.
    ///
    /// Returns the concatenation of every non-null action produced. Internal
    /// trigger faults are logged and skipped.
    pub fn process(&self, event: &NormalizedEvent) -> Vec<ActionDescriptor> {
        let mut actions = Vec::new();
        for trigger in &self.triggers {
            if !trigger.matches(event) {
                continue;
            }
            match trigger.build_action(event) {
                Ok(Some(action)) => actions.push(action),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        trigger_id = trigger.id(),
                        tenant_id = event.tenant_id.as_str(),
                        %error,
                        "trigger fault skipped during evaluation"
                    );
                }
            }
        }
        actions
    }
}
