//! Collaborator-facing request types and their validation.

use alarm_store::{AlarmId, AlarmRecord, SnoozePolicy, SnoozeState, SoundRef, Trigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// Everything needed to create an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSpec {
    /// Caller-chosen id; a fresh one is generated when absent.
    pub id: Option<AlarmId>,
    pub trigger: Trigger,
    pub label: String,
    pub enabled: bool,
    pub content_ref: Option<String>,
    pub sound: SoundRef,
    pub snooze: SnoozePolicy,
}

impl AlarmSpec {
    pub fn new(trigger: Trigger, label: impl Into<String>) -> Self {
        Self {
            id: None,
            trigger,
            label: label.into(),
            enabled: true,
            content_ref: None,
            sound: SoundRef::default(),
            snooze: SnoozePolicy::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<AlarmId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_content_ref(mut self, content_ref: impl Into<String>) -> Self {
        self.content_ref = Some(content_ref.into());
        self
    }

    pub fn with_sound(mut self, sound: SoundRef) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_snooze(mut self, snooze: SnoozePolicy) -> Self {
        self.snooze = snooze;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub(crate) fn validate(&self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.enabled {
            validate_trigger(&self.trigger, now)?;
        } else {
            validate_shape(&self.trigger)?;
        }
        validate_snooze(&self.snooze)
    }

    pub(crate) fn into_record(self) -> AlarmRecord {
        let mut record = AlarmRecord::new(
            self.id.unwrap_or_default(),
            self.trigger,
            self.label,
        );
        record.enabled = self.enabled;
        record.content_ref = self.content_ref;
        record.sound = self.sound;
        record.snooze = self.snooze;
        record
    }
}

/// A partial edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPatch {
    pub trigger: Option<Trigger>,
    pub label: Option<String>,
    /// `Some(None)` clears the content reference.
    pub content_ref: Option<Option<String>>,
    pub sound: Option<SoundRef>,
    pub snooze: Option<SnoozePolicy>,
}

impl AlarmPatch {
    pub fn trigger(trigger: Trigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub(crate) fn validate(&self, now: DateTime<Utc>) -> EngineResult<()> {
        if let Some(trigger) = &self.trigger {
            validate_trigger(trigger, now)?;
        }
        if let Some(snooze) = &self.snooze {
            validate_snooze(snooze)?;
        }
        Ok(())
    }

    /// Applies the edit. A new trigger starts a fresh snooze cycle.
    pub(crate) fn apply(self, record: &mut AlarmRecord) {
        if let Some(trigger) = self.trigger {
            if trigger != record.trigger {
                record.snooze_state = SnoozeState::default();
            }
            record.trigger = trigger;
        }
        if let Some(label) = self.label {
            record.label = label;
        }
        if let Some(content_ref) = self.content_ref {
            record.content_ref = content_ref;
        }
        if let Some(sound) = self.sound {
            record.sound = sound;
        }
        if let Some(snooze) = self.snooze {
            record.snooze = snooze;
        }
    }
}

fn validate_shape(trigger: &Trigger) -> EngineResult<()> {
    trigger
        .validate()
        .map_err(|e| EngineError::Validation(e.to_string()))
}

/// A trigger that is well formed and still has an occurrence after `now`.
pub(crate) fn validate_trigger(trigger: &Trigger, now: DateTime<Utc>) -> EngineResult<()> {
    validate_shape(trigger)?;
    if let Trigger::Once { at } = trigger {
        if *at <= now {
            return Err(EngineError::Validation(format!(
                "one-shot time {at} is not in the future"
            )));
        }
    }
    Ok(())
}

fn validate_snooze(snooze: &SnoozePolicy) -> EngineResult<()> {
    if snooze.duration_secs == 0 {
        return Err(EngineError::Validation(
            "snooze duration must be positive".into(),
        ));
    }
    Ok(())
}
