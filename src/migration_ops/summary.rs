//! Run tallies. Per-entity failures never abort a run; they land here and the
//! caller decides how to present the whole.

use std::fmt;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub created: u64,
    pub updated: u64,
    pub recreated: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Records written to an export document; nothing touched a destination.
    pub exported: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one entity landed; `warning` when failures rode along.
    Success { warning: bool },
    /// Nothing landed and something failed.
    Error,
    /// Nothing to do at all.
    Noop,
}

impl RunSummary {
    pub fn succeeded(&self) -> u64 {
        self.created + self.updated + self.recreated
    }

    pub fn total(&self) -> u64 {
        self.succeeded() + self.failed + self.skipped
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.succeeded() > 0 || self.exported > 0 {
            RunOutcome::Success {
                warning: self.failed > 0,
            }
        } else if self.failed > 0 {
            RunOutcome::Error
        } else {
            RunOutcome::Noop
        }
    }

    pub fn absorb(&mut self, other: &RunSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.recreated += other.recreated;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.exported += other.exported;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} recreated={} failed={} skipped={}",
            self.created, self.updated, self.recreated, self.failed, self.skipped
        )?;
        // Only export runs carry this tally; keep migrate output unchanged.
        if self.exported > 0 {
            write!(f, " exported={}", self.exported)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_success_wins_with_warning_on_failures() {
        let s = RunSummary {
            created: 1,
            failed: 2,
            ..Default::default()
        };
        assert_eq!(s.outcome(), RunOutcome::Success { warning: true });
    }

    #[test]
    fn all_failed_is_error() {
        let s = RunSummary {
            failed: 3,
            skipped: 1,
            ..Default::default()
        };
        assert_eq!(s.outcome(), RunOutcome::Error);
    }

    #[test]
    fn empty_run_is_noop() {
        assert_eq!(RunSummary::default().outcome(), RunOutcome::Noop);
    }

    #[test]
    fn skip_only_run_is_noop() {
        let s = RunSummary {
            skipped: 4,
            ..Default::default()
        };
        assert_eq!(s.outcome(), RunOutcome::Noop);
    }

    #[test]
    fn export_only_run_reports_exported_not_created() {
        let s = RunSummary {
            exported: 12,
            ..Default::default()
        };
        assert_eq!(s.outcome(), RunOutcome::Success { warning: false });
        assert_eq!(
            s.to_string(),
            "created=0 updated=0 recreated=0 failed=0 skipped=0 exported=12"
        );
    }

    #[test]
    fn absorb_accumulates() {
        let mut a = RunSummary {
            created: 1,
            ..Default::default()
        };
        let b = RunSummary {
            updated: 2,
            failed: 1,
            ..Default::default()
        };
        a.absorb(&b);
        assert_eq!(a.succeeded(), 3);
        assert_eq!(a.failed, 1);
    }
}
