//! Local tick projector.
//!
//! Every function here is a pure projection of a cached snapshot and a
//! caller-supplied `now`; the per-second UI tick never touches the network.

use chrono::{DateTime, Utc};

use crate::model::DebateClock;

/// Projection of the entry-cutoff countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryWindow {
    pub remaining_seconds: u64,
    /// Set once the cutoff has been crossed; stays set afterwards.
    pub closed: bool,
}

/// `None` when the assembly has no entry cutoff configured.
pub fn entry_window(cutoff: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<EntryWindow> {
    let cutoff = cutoff?;
    let remaining = (cutoff - now).num_seconds();
    if remaining <= 0 {
        Some(EntryWindow {
            remaining_seconds: 0,
            closed: true,
        })
    } else {
        Some(EntryWindow {
            remaining_seconds: remaining as u64,
            closed: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockProjection {
    Inactive,
    Running { remaining_seconds: u64 },
    /// Wall-clock independent: remaining = duration - paused_elapsed.
    Paused { remaining_seconds: u64 },
    /// A running clock crossed zero. The session controller turns this
    /// boundary into a single server-side stop call; the projector itself
    /// stays pure and may report `Expired` on every subsequent tick.
    Expired,
}

impl ClockProjection {
    /// Remaining seconds, clamped to zero for `Inactive` and `Expired`.
    pub fn remaining_seconds(&self) -> u64 {
        match self {
            ClockProjection::Running { remaining_seconds }
            | ClockProjection::Paused { remaining_seconds } => *remaining_seconds,
            ClockProjection::Inactive | ClockProjection::Expired => 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, ClockProjection::Expired)
    }
}

pub fn project_clock(clock: &DebateClock, now: DateTime<Utc>) -> ClockProjection {
    if !clock.active {
        return ClockProjection::Inactive;
    }
    if clock.paused {
        return ClockProjection::Paused {
            remaining_seconds: clock
                .duration_seconds
                .saturating_sub(clock.paused_elapsed_seconds),
        };
    }
    let Some(started_at) = clock.started_at else {
        // Start timestamp not committed yet; project the full window.
        return ClockProjection::Running {
            remaining_seconds: clock.duration_seconds,
        };
    };
    let elapsed = (now - started_at).num_seconds().max(0) as u64;
    match clock.duration_seconds.saturating_sub(elapsed) {
        0 => ClockProjection::Expired,
        remaining_seconds => ClockProjection::Running { remaining_seconds },
    }
}

/// mm:ss rendering shared by the entry and debate countdowns.
pub fn format_mmss(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn running_clock(duration: u64, started_at: DateTime<Utc>) -> DebateClock {
        DebateClock {
            active: true,
            paused: false,
            started_at: Some(started_at),
            duration_seconds: duration,
            paused_elapsed_seconds: 0,
        }
    }

    #[test]
    fn overrun_clamps_to_zero() {
        let now = Utc::now();
        let clock = running_clock(600, now - Duration::seconds(605));
        let projection = project_clock(&clock, now);
        assert!(projection.is_expired());
        assert_eq!(projection.remaining_seconds(), 0);
    }

    #[test]
    fn paused_projection_ignores_wall_clock() {
        let clock = DebateClock {
            active: true,
            paused: true,
            started_at: Some(Utc::now() - Duration::seconds(9999)),
            duration_seconds: 300,
            paused_elapsed_seconds: 120,
        };
        for offset in [0i64, 60, 3600] {
            let projection = project_clock(&clock, Utc::now() + Duration::seconds(offset));
            assert_eq!(
                projection,
                ClockProjection::Paused {
                    remaining_seconds: 180
                }
            );
        }
    }

    #[test]
    fn running_projection_counts_down() {
        let now = Utc::now();
        let clock = running_clock(600, now - Duration::seconds(45));
        assert_eq!(
            project_clock(&clock, now),
            ClockProjection::Running {
                remaining_seconds: 555
            }
        );
    }

    #[test]
    fn missing_start_projects_full_window() {
        let clock = DebateClock {
            started_at: None,
            ..running_clock(240, Utc::now())
        };
        assert_eq!(
            project_clock(&clock, Utc::now()),
            ClockProjection::Running {
                remaining_seconds: 240
            }
        );
    }

    #[test]
    fn inactive_clock_projects_inactive() {
        assert_eq!(
            project_clock(&DebateClock::idle(), Utc::now()),
            ClockProjection::Inactive
        );
    }

    #[test]
    fn paused_overrun_clamps_to_zero() {
        let clock = DebateClock {
            active: true,
            paused: true,
            started_at: None,
            duration_seconds: 100,
            paused_elapsed_seconds: 150,
        };
        assert_eq!(
            project_clock(&clock, Utc::now()),
            ClockProjection::Paused {
                remaining_seconds: 0
            }
        );
    }

    #[test]
    fn entry_window_counts_down_and_closes() {
        let now = Utc::now();
        let open = entry_window(Some(now + Duration::seconds(90)), now).unwrap();
        assert_eq!(open.remaining_seconds, 90);
        assert!(!open.closed);

        let closed = entry_window(Some(now - Duration::seconds(1)), now).unwrap();
        assert_eq!(closed.remaining_seconds, 0);
        assert!(closed.closed);

        assert!(entry_window(None, now).is_none());
    }

    #[test]
    fn formats_mmss() {
        assert_eq!(format_mmss(0), "00:00");
        assert_eq!(format_mmss(65), "01:05");
        assert_eq!(format_mmss(600), "10:00");
        assert_eq!(format_mmss(3725), "62:05");
    }
}
