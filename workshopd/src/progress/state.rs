use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use workshop_core::ProfileSnapshot;

/// Result of a local counter or flag mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Changed,
    Unchanged,
    /// Unknown name, or progress not populated yet.
    Rejected,
}

impl Mutation {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Mutation::Rejected)
    }
}

/// Local copy of the player's counters and unlock flags.
///
/// Every accepted change bumps `revision`; the state is dirty while the last
/// uploaded revision lags behind it, so a change that races an upload is never
/// lost.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    counters: BTreeMap<String, i64>,
    flags: BTreeMap<String, bool>,
    revision: u64,
    uploaded_revision: u64,
    last_upload: Option<Instant>,
}

impl ProgressState {
    pub fn from_snapshot(snapshot: ProfileSnapshot) -> Self {
        Self {
            counters: snapshot.counters,
            flags: snapshot.flags,
            revision: 0,
            uploaded_revision: 0,
            last_upload: None,
        }
    }

    pub fn set_counter(&mut self, name: &str, value: i64) -> Mutation {
        let Some(current) = self.counters.get_mut(name) else {
            return Mutation::Rejected;
        };
        if *current == value {
            return Mutation::Unchanged;
        }
        *current = value;
        self.revision += 1;
        Mutation::Changed
    }

    pub fn increment_counter(&mut self, name: &str, delta: i64) -> Mutation {
        match self.counters.get(name) {
            Some(current) => self.set_counter(name, current.saturating_add(delta)),
            None => Mutation::Rejected,
        }
    }

    /// Flags only ever go from locked to unlocked.
    pub fn set_flag(&mut self, name: &str) -> Mutation {
        let Some(unlocked) = self.flags.get_mut(name) else {
            return Mutation::Rejected;
        };
        if *unlocked {
            return Mutation::Unchanged;
        }
        *unlocked = true;
        self.revision += 1;
        Mutation::Changed
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).copied()
    }

    pub fn is_counter(&self, name: &str) -> bool {
        self.counters.contains_key(name)
    }

    pub fn is_unlocked(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn is_dirty(&self) -> bool {
        self.revision != self.uploaded_revision
    }

    pub fn last_upload(&self) -> Option<Instant> {
        self.last_upload
    }

    /// Whether a dirty state may be uploaded at `now`. The first upload is
    /// never held back.
    pub fn upload_due(&self, now: Instant, min_interval: Duration, force: bool) -> bool {
        if !self.is_dirty() {
            return false;
        }
        force
            || self
                .last_upload
                .is_none_or(|last| now.saturating_duration_since(last) >= min_interval)
    }

    /// Full state to upload, tagged with the revision it represents.
    pub fn snapshot(&self) -> (ProfileSnapshot, u64) {
        (
            ProfileSnapshot {
                counters: self.counters.clone(),
                flags: self.flags.clone(),
            },
            self.revision,
        )
    }

    pub fn mark_uploaded(&mut self, revision: u64, at: Instant) {
        self.uploaded_revision = self.uploaded_revision.max(revision);
        self.last_upload = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProgressState {
        ProgressState::from_snapshot(ProfileSnapshot {
            counters: BTreeMap::from([("kills".to_string(), 3)]),
            flags: BTreeMap::from([("first_win".to_string(), false)]),
        })
    }

    #[test]
    fn unchanged_value_keeps_state_clean() {
        let mut state = state();
        assert_eq!(state.set_counter("kills", 3), Mutation::Unchanged);
        assert!(!state.is_dirty());
        assert_eq!(state.set_counter("kills", 4), Mutation::Changed);
        assert!(state.is_dirty());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut state = state();
        assert_eq!(state.set_counter("deaths", 1), Mutation::Rejected);
        assert_eq!(state.increment_counter("deaths", 1), Mutation::Rejected);
        assert_eq!(state.set_flag("no_such_flag"), Mutation::Rejected);
        assert!(!state.is_dirty());
        assert!(!state.is_counter("deaths"));
    }

    #[test]
    fn flags_are_monotonic() {
        let mut state = state();
        assert_eq!(state.set_flag("first_win"), Mutation::Changed);
        assert_eq!(state.set_flag("first_win"), Mutation::Unchanged);
        assert!(state.is_unlocked("first_win"));
    }

    #[test]
    fn change_after_snapshot_stays_dirty() {
        let mut state = state();
        state.increment_counter("kills", 2);
        let (snapshot, revision) = state.snapshot();
        assert_eq!(snapshot.counters["kills"], 5);

        state.increment_counter("kills", 1);
        state.mark_uploaded(revision, Instant::now());

        assert!(state.is_dirty());
        assert_eq!(state.counter("kills"), Some(6));
    }

    #[test]
    fn upload_is_rate_limited_unless_forced() {
        let mut state = state();
        let start = Instant::now();
        let interval = Duration::from_secs(5);
        state.set_counter("kills", 4);
        assert!(state.upload_due(start, interval, false));
        let (_, revision) = state.snapshot();
        state.mark_uploaded(revision, start);
        assert!(!state.upload_due(start, interval, true));

        state.set_counter("kills", 5);
        assert!(!state.upload_due(start + Duration::from_secs(1), interval, false));
        assert!(state.upload_due(start + Duration::from_secs(1), interval, true));
        assert!(state.upload_due(start + interval, interval, false));
    }
}
