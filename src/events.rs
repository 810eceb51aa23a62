//! Lifecycle events fired around persistence.

use std::fmt;
use std::sync::Arc;

use crate::entity::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Creating,
    Created,
    Updating,
    Updated,
    Saving,
    Saved,
    Deleting,
    Deleted,
    Restoring,
    Restored,
}

impl ModelEvent {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ModelEvent::Creating => "creating",
            ModelEvent::Created => "created",
            ModelEvent::Updating => "updating",
            ModelEvent::Updated => "updated",
            ModelEvent::Saving => "saving",
            ModelEvent::Saved => "saved",
            ModelEvent::Deleting => "deleting",
            ModelEvent::Deleted => "deleted",
            ModelEvent::Restoring => "restoring",
            ModelEvent::Restored => "restored",
        }
    }

    /// `-ing` events, whose listeners may cancel the operation.
    pub const fn is_halting(&self) -> bool {
        matches!(
            self,
            ModelEvent::Creating
                | ModelEvent::Updating
                | ModelEvent::Saving
                | ModelEvent::Deleting
                | ModelEvent::Restoring
        )
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by listeners; `Halt` from a halting event cancels the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Continue,
    Halt,
}

pub type Listener = Arc<dyn Fn(&mut Entity) -> Propagation + Send + Sync>;

impl Entity {
    /// Runs every listener for `event`. Returns `false` when a halting event was
    /// cancelled.
    pub(crate) fn fire(&mut self, event: ModelEvent) -> bool {
        let listeners = self.db().listeners(self.meta().name(), event);
        for listener in listeners {
            if listener(self) == Propagation::Halt && event.is_halting() {
                #[cfg(feature = "tracing")]
                tracing::debug!(model = %self.meta().name(), event = %event, "quarry.event.halted");
                return false;
            }
        }
        true
    }
}
