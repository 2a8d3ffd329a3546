// Control-member-first ordering.
//
// SWUpdate reads the descriptor member before anything else, so it must be
// the first member of every rebuilt archive. The raw listing of the
// original archive is the authority for every other position.

/// Where the control member sat in the raw listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlacement {
    /// Already at position 0.
    First,
    /// Found at `from` and moved to position 0.
    Moved { from: usize },
    /// Found at `at` but left there because enforcement is disabled.
    Misplaced { at: usize },
    /// Not listed at all; the raw order is kept.
    Missing,
}

/// A member-order list after the control-member check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOrder {
    pub names: Vec<String>,
    pub placement: ControlPlacement,
}

impl NormalizedOrder {
    /// True when `names` differs from the raw listing.
    pub fn corrected(&self) -> bool {
        matches!(self.placement, ControlPlacement::Moved { .. })
    }
}

/// The control-member invariant and whether violations are repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPolicy {
    pub control_member: String,
    pub enforce_first: bool,
}

impl OrderPolicy {
    pub fn new(control_member: impl Into<String>, enforce_first: bool) -> Self {
        Self {
            control_member: control_member.into(),
            enforce_first,
        }
    }

    /// Apply the control-member-first invariant to a raw listing.
    ///
    /// Only the first occurrence counts; with enforcement on it is removed
    /// from its position and reinserted at 0, leaving every other member's
    /// relative order untouched. A missing control member is never invented.
    pub fn normalize(&self, raw: Vec<String>) -> NormalizedOrder {
        let position = raw.iter().position(|name| *name == self.control_member);
        match position {
            Some(0) => NormalizedOrder {
                names: raw,
                placement: ControlPlacement::First,
            },
            Some(at) if !self.enforce_first => NormalizedOrder {
                names: raw,
                placement: ControlPlacement::Misplaced { at },
            },
            Some(from) => {
                let mut names = raw;
                let control = names.remove(from);
                names.insert(0, control);
                NormalizedOrder {
                    names,
                    placement: ControlPlacement::Moved { from },
                }
            }
            None => NormalizedOrder {
                names: raw,
                placement: ControlPlacement::Missing,
            },
        }
    }
}
