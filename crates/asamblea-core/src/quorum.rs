use std::collections::BTreeSet;

use serde::Serialize;
use uuid::Uuid;

use crate::model::{Attendance, ProxyStatus};

/// Distinct households represented in the room: every attendee's own
/// household plus, for attendances carrying an approved proxy, the
/// represented household. Pending and rejected proxies do not count.
pub fn represented_households(rows: &[Attendance]) -> BTreeSet<Uuid> {
    let mut represented = BTreeSet::new();
    for row in rows {
        represented.insert(row.household);
        if let Some(proxy) = &row.proxy {
            if proxy.status == ProxyStatus::Approved {
                represented.insert(proxy.represented_household);
            }
        }
    }
    represented
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quorum {
    pub represented: usize,
    pub total_households: usize,
    /// Integer percentage, clamped to 100.
    pub percent: u8,
    /// Simple majority: floor(total / 2) + 1.
    pub required: usize,
    pub satisfied: bool,
}

impl Quorum {
    /// Households with nobody present or represented ("no-shows").
    pub fn absent(&self) -> usize {
        self.total_households.saturating_sub(self.represented)
    }
}

/// Computes quorum from attendance rows and the authoritative household
/// count. `total_households` must always be sourced from the backend, never
/// a literal baked into a screen.
pub fn compute(rows: &[Attendance], total_households: usize) -> Quorum {
    let represented = represented_households(rows).len();
    let required = total_households / 2 + 1;
    let percent = if total_households == 0 {
        0
    } else {
        (represented * 100 / total_households).min(100) as u8
    };
    Quorum {
        represented,
        total_households,
        percent,
        required,
        satisfied: represented >= required,
    }
}
