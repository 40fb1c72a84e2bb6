//! Content fingerprints for cache validation.

use alarm_store::{AlarmRecord, Trigger};
use sha2::{Digest, Sha256};

/// SHA-256 over the fields derived data depends on.
///
/// Covers label, trigger, snooze-until and content reference. Each field is
/// length-prefixed so adjacent fields cannot alias.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(record: &AlarmRecord) -> Self {
        let mut hasher = Sha256::new();
        feed(&mut hasher, record.label.as_bytes());
        feed_trigger(&mut hasher, &record.trigger);
        let snoozed_until = record
            .snooze_state
            .snoozed_until
            .map(|t| t.timestamp_millis().to_be_bytes().to_vec())
            .unwrap_or_default();
        feed(&mut hasher, &snoozed_until);
        feed(
            &mut hasher,
            record.content_ref.as_deref().unwrap_or_default().as_bytes(),
        );
        // Distinguish "no content ref" from an empty one.
        hasher.update([u8::from(record.content_ref.is_some())]);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Fixed-width encoding: a variant tag, then the variant's fields.
fn feed_trigger(hasher: &mut Sha256, trigger: &Trigger) {
    match trigger {
        Trigger::Once { at } => {
            hasher.update([0u8]);
            hasher.update(at.timestamp().to_be_bytes());
            hasher.update(at.timestamp_subsec_nanos().to_be_bytes());
        }
        Trigger::Weekly {
            weekdays,
            hour,
            minute,
        } => {
            let days = weekdays
                .iter()
                .fold(0u8, |mask, day| mask | (1 << (*day as u8)));
            hasher.update([1u8, days, *hour, *minute]);
        }
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}
