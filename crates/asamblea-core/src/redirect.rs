//! Redirect policy for one attendee device.
//!
//! The machine owns its deduplication memory as named state; stale or
//! duplicate snapshot deliveries on the independent subscription channels
//! therefore never produce a second redirect for the same signal.

use serde::Serialize;
use uuid::Uuid;

use crate::model::{AssemblySnapshot, Directive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Waiting,
    Voting,
    Results,
    ExitForm,
}

/// Navigation the device should perform right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Redirect {
    Voting { proposal: Uuid },
    Results { proposal: Uuid },
    ExitForm,
}

#[derive(Debug, Clone, Default)]
pub struct RedirectPolicy {
    view: View,
    last_voting_offered: Option<Uuid>,
    last_results_shown: Option<Uuid>,
    /// Results id the user explicitly navigated back from; that id must
    /// never re-redirect.
    dismissed_results: Option<Uuid>,
}

impl RedirectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Evaluates one snapshot delivery.
    ///
    /// Only the waiting room auto-redirects; every reverse transition is an
    /// explicit user action. When both an active proposal and published
    /// results are present the active proposal wins and no results redirect
    /// is produced.
    pub fn on_snapshot(&mut self, snapshot: &AssemblySnapshot) -> Option<Redirect> {
        if self.view != View::Waiting {
            return None;
        }
        if let Some(proposal) = snapshot.active_proposal {
            if self.last_voting_offered == Some(proposal) {
                return None;
            }
            self.last_voting_offered = Some(proposal);
            self.view = View::Voting;
            return Some(Redirect::Voting { proposal });
        }
        if let Some(proposal) = snapshot.published_results {
            if self.last_results_shown == Some(proposal) || self.dismissed_results == Some(proposal)
            {
                return None;
            }
            self.last_results_shown = Some(proposal);
            self.view = View::Results;
            return Some(Redirect::Results { proposal });
        }
        None
    }

    /// Admin broadcast directives reach every view. Repeated deliveries of
    /// the same directive are idempotent.
    pub fn on_directive(&mut self, directive: &Directive, own_attendance: Uuid) -> Option<Redirect> {
        match directive {
            Directive::ShowExitForm { attendance }
                if attendance.map_or(true, |id| id == own_attendance) =>
            {
                if self.view == View::ExitForm {
                    return None;
                }
                self.view = View::ExitForm;
                Some(Redirect::ExitForm)
            }
            _ => None,
        }
    }

    /// Explicit user navigation back from the voting screen. The offered
    /// proposal stays remembered, so an unchanged active proposal does not
    /// immediately pull the user back in.
    pub fn user_left_voting(&mut self) {
        if self.view == View::Voting {
            self.view = View::Waiting;
        }
    }

    /// Explicit user navigation back from results. Records the dismissed
    /// publication id so the same id never re-redirects.
    pub fn user_left_results(&mut self) {
        if self.view == View::Results {
            self.dismissed_results = self.last_results_shown;
            self.view = View::Waiting;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssemblyPhase, DebateClock};

    fn snapshot(active: Option<Uuid>, published: Option<Uuid>) -> AssemblySnapshot {
        AssemblySnapshot {
            id: Uuid::new_v4(),
            phase: AssemblyPhase::Open,
            entry_cutoff: None,
            active_proposal: active,
            published_results: published,
            clock: DebateClock::idle(),
        }
    }

    #[test]
    fn waiting_redirects_to_voting_once() {
        let mut policy = RedirectPolicy::new();
        let proposal = Uuid::new_v4();
        let snap = snapshot(Some(proposal), None);

        assert_eq!(
            policy.on_snapshot(&snap),
            Some(Redirect::Voting { proposal })
        );
        assert_eq!(policy.view(), View::Voting);
        // Duplicate deliveries while on the voting screen are ignored.
        assert_eq!(policy.on_snapshot(&snap), None);
    }

    #[test]
    fn repeated_publications_redirect_at_most_once() {
        let mut policy = RedirectPolicy::new();
        let proposal = Uuid::new_v4();
        let snap = snapshot(None, Some(proposal));

        let mut redirects = 0;
        for _ in 0..10 {
            if policy.on_snapshot(&snap).is_some() {
                redirects += 1;
            }
        }
        assert_eq!(redirects, 1);

        // Even after the user backs out, the same id never fires again.
        policy.user_left_results();
        for _ in 0..10 {
            assert_eq!(policy.on_snapshot(&snap), None);
        }
    }

    #[test]
    fn active_proposal_wins_over_published_results() {
        let mut policy = RedirectPolicy::new();
        let active = Uuid::new_v4();
        let published = Uuid::new_v4();
        let snap = snapshot(Some(active), Some(published));

        assert_eq!(
            policy.on_snapshot(&snap),
            Some(Redirect::Voting { proposal: active })
        );
        // Still on the voting screen: no results redirect either.
        assert_eq!(policy.on_snapshot(&snap), None);
    }

    #[test]
    fn new_publication_redirects_after_dismissal() {
        let mut policy = RedirectPolicy::new();
        let first = Uuid::new_v4();
        assert!(policy.on_snapshot(&snapshot(None, Some(first))).is_some());
        policy.user_left_results();

        let second = Uuid::new_v4();
        assert_eq!(
            policy.on_snapshot(&snapshot(None, Some(second))),
            Some(Redirect::Results { proposal: second })
        );
    }

    #[test]
    fn leaving_voting_does_not_loop_on_same_proposal() {
        let mut policy = RedirectPolicy::new();
        let proposal = Uuid::new_v4();
        let snap = snapshot(Some(proposal), None);

        assert!(policy.on_snapshot(&snap).is_some());
        policy.user_left_voting();
        assert_eq!(policy.on_snapshot(&snap), None);

        // A different proposal opens later: redirect again.
        let next = Uuid::new_v4();
        assert_eq!(
            policy.on_snapshot(&snapshot(Some(next), None)),
            Some(Redirect::Voting { proposal: next })
        );
    }

    #[test]
    fn exit_directive_reaches_any_view() {
        let mut policy = RedirectPolicy::new();
        let own = Uuid::new_v4();
        assert!(policy.on_snapshot(&snapshot(Some(Uuid::new_v4()), None)).is_some());
        assert_eq!(policy.view(), View::Voting);

        let general = Directive::ShowExitForm { attendance: None };
        assert_eq!(policy.on_directive(&general, own), Some(Redirect::ExitForm));
        assert_eq!(policy.view(), View::ExitForm);
        // Idempotent on repeat.
        assert_eq!(policy.on_directive(&general, own), None);
    }

    #[test]
    fn targeted_exit_directive_ignores_other_attendees() {
        let mut policy = RedirectPolicy::new();
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();

        let targeted = Directive::ShowExitForm {
            attendance: Some(other),
        };
        assert_eq!(policy.on_directive(&targeted, own), None);
        assert_eq!(policy.view(), View::Waiting);

        let mine = Directive::ShowExitForm {
            attendance: Some(own),
        };
        assert_eq!(policy.on_directive(&mine, own), Some(Redirect::ExitForm));
    }

    #[test]
    fn exit_authorized_is_not_a_redirect() {
        let mut policy = RedirectPolicy::new();
        let own = Uuid::new_v4();
        let directive = Directive::ExitAuthorized { attendance: own };
        assert_eq!(policy.on_directive(&directive, own), None);
    }

    #[test]
    fn exit_form_never_auto_leaves() {
        let mut policy = RedirectPolicy::new();
        let own = Uuid::new_v4();
        policy.on_directive(&Directive::ShowExitForm { attendance: None }, own);

        assert_eq!(policy.on_snapshot(&snapshot(Some(Uuid::new_v4()), None)), None);
        assert_eq!(policy.view(), View::ExitForm);
    }
}
