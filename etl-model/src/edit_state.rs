//! FILENAME: etl-model/src/edit_state.rs
//! PURPOSE: Per-field editing state for the form layer.
//! CONTEXT: A field being edited is Included or Excluded, and Clean or Dirty
//! (has uncommitted edits). Transitions are a pure function of the current
//! state and an event. `FieldEditSession` pairs the state with a working copy
//! of the field; `commit` and `clear` are the only ways out of Dirty.

use serde::{Deserialize, Serialize};

use crate::error::EtlResult;
use crate::field::FileField;
use crate::update::{update_field, FieldEdit, UpdateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inclusion {
    Included,
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dirtiness {
    Clean,
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEditState {
    pub inclusion: Inclusion,
    pub dirtiness: Dirtiness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditEvent {
    Include,
    Exclude,
    Edit,
    Commit,
    Clear,
}

impl FieldEditState {
    pub fn for_field(field: &FileField) -> Self {
        FieldEditState {
            inclusion: if field.enabled { Inclusion::Included } else { Inclusion::Excluded },
            dirtiness: Dirtiness::Clean,
        }
    }
}

/// Next state after `event`.
///
/// Toggling inclusion is applied immediately (it is committed by the caller
/// as an `enabled` edit), so it does not dirty the field. Edits on an
/// excluded field are ignored.
pub fn transition(state: FieldEditState, event: EditEvent) -> FieldEditState {
    match (state.inclusion, event) {
        (_, EditEvent::Include) => FieldEditState {
            inclusion: Inclusion::Included,
            ..state
        },
        (_, EditEvent::Exclude) => FieldEditState {
            inclusion: Inclusion::Excluded,
            dirtiness: Dirtiness::Clean,
        },
        (Inclusion::Included, EditEvent::Edit) => FieldEditState {
            dirtiness: Dirtiness::Dirty,
            ..state
        },
        (Inclusion::Excluded, EditEvent::Edit) => state,
        (_, EditEvent::Commit) | (_, EditEvent::Clear) => FieldEditState {
            dirtiness: Dirtiness::Clean,
            ..state
        },
    }
}

/// Working copy of one field with its uncommitted edits.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEditSession {
    committed: FileField,
    working: FileField,
    pending: Vec<FieldEdit>,
    stale_derived_fields: bool,
    state: FieldEditState,
}

impl FieldEditSession {
    pub fn new(field: FileField) -> Self {
        FieldEditSession {
            state: FieldEditState::for_field(&field),
            working: field.clone(),
            committed: field,
            pending: Vec::new(),
            stale_derived_fields: false,
        }
    }

    pub fn state(&self) -> FieldEditState {
        self.state
    }

    pub fn working(&self) -> &FileField {
        &self.working
    }

    pub fn pending(&self) -> &[FieldEdit] {
        &self.pending
    }

    /// Applies `edit` to the working copy. Ignored while excluded.
    pub fn edit(&self, edit: FieldEdit) -> EtlResult<Self> {
        if self.state.inclusion == Inclusion::Excluded {
            return Ok(self.clone());
        }
        let outcome = update_field(&self.working, edit.clone())?;
        let mut next = self.clone();
        next.working = outcome.field;
        next.stale_derived_fields |= outcome.stale_derived_fields;
        next.pending.push(edit);
        next.state = transition(self.state, EditEvent::Edit);
        Ok(next)
    }

    /// Includes the field; committed straight away.
    pub fn include(&self) -> EtlResult<(Self, UpdateOutcome)> {
        self.set_enabled(true, EditEvent::Include)
    }

    /// Excludes the field, dropping uncommitted edits; committed straight away.
    pub fn exclude(&self) -> EtlResult<(Self, UpdateOutcome)> {
        self.set_enabled(false, EditEvent::Exclude)
    }

    fn set_enabled(&self, enabled: bool, event: EditEvent) -> EtlResult<(Self, UpdateOutcome)> {
        let outcome = update_field(&self.committed, FieldEdit::Enabled(enabled))?;
        let mut next = self.clone();
        next.state = transition(self.state, event);
        next.committed = outcome.field.clone();
        if enabled {
            next.working.enabled = true;
        } else {
            next.pending.clear();
            next.stale_derived_fields = false;
            next.working = outcome.field.clone();
        }
        Ok((next, outcome))
    }

    /// Commits the working copy. The outcome's field replaces the file's field.
    pub fn commit(&self) -> (Self, UpdateOutcome) {
        let outcome = UpdateOutcome {
            field: self.working.clone(),
            stale_derived_fields: self.stale_derived_fields,
        };
        let next = FieldEditSession {
            committed: self.working.clone(),
            working: self.working.clone(),
            pending: Vec::new(),
            stale_derived_fields: false,
            state: transition(self.state, EditEvent::Commit),
        };
        (next, outcome)
    }

    /// Discards uncommitted edits.
    pub fn clear(&self) -> Self {
        FieldEditSession {
            committed: self.committed.clone(),
            working: self.committed.clone(),
            pending: Vec::new(),
            stale_derived_fields: false,
            state: transition(self.state, EditEvent::Clear),
        }
    }
}
