//! Per-record status transitions.
//!
//! Both the reconciler and the record operations ask [`next_status`] where a
//! record goes next instead of hard-coding statuses, so every status change
//! in the agent follows one table.

use crate::record::RecordStatus;
use crate::{KeeperError, Result};

/// Server verdict on a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 200-class response.
    Accepted,
    /// The server already holds the name with an incompatible history.
    Conflict,
    /// Transport failure or 5xx; retry later.
    Unreachable,
}

/// Something that happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    LocalCreate,
    LocalEdit,
    Pushed(PushOutcome),
    /// Pull found exactly one server version.
    PulledSingle,
    /// Pull found two or more server versions.
    PulledMulti,
}

/// Status a record moves to when `event` happens in status `current`
/// (`None` if the record does not exist locally).
pub fn next_status(current: Option<RecordStatus>, event: SyncEvent) -> Result<RecordStatus> {
    use RecordStatus::*;
    use SyncEvent::*;

    let next = match (current, event) {
        (None, LocalCreate) => New,
        (Some(status), LocalCreate) => {
            return Err(KeeperError::AlreadyExists(format!(
                "record already exists with status {}",
                status
            )))
        }

        (None, LocalEdit) => return Err(KeeperError::NotFound("record".to_string())),
        (Some(New), LocalEdit) => New,
        (Some(Saved | Changed), LocalEdit) => Changed,
        (Some(Conflict | FixConflict), LocalEdit) => FixConflict,

        (Some(New), Pushed(PushOutcome::Accepted)) => Saved,
        (Some(New), Pushed(PushOutcome::Conflict)) => Changed,
        (Some(New), Pushed(PushOutcome::Unreachable)) => New,
        (Some(Changed), Pushed(PushOutcome::Accepted)) => Saved,
        (Some(Changed), Pushed(PushOutcome::Unreachable)) => Changed,
        // The edit was appended on the server as an extra version.
        (Some(Changed), Pushed(PushOutcome::Conflict)) => Conflict,
        (Some(FixConflict), Pushed(PushOutcome::Accepted)) => Saved,
        (Some(FixConflict), Pushed(PushOutcome::Unreachable)) => FixConflict,
        (status, Pushed(outcome)) => {
            return Err(KeeperError::Invariant(format!(
                "push outcome {:?} is not valid for status {:?}",
                outcome, status
            )))
        }

        // Unpushed local edits survive a pull.
        (Some(status), PulledSingle | PulledMulti) if status.is_pending() => status,
        (_, PulledSingle) => Saved,
        (_, PulledMulti) => Conflict,
    };
    Ok(next)
}
