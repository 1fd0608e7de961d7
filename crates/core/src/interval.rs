//! Nested-set interval algebra.
//!
//! A structural move is split into two phases that any interval table can
//! execute: a [`Shift`] that opens a gap at the insertion point, and a
//! [`Translate`] that slides the moved subtree into that gap. [`MovePlan`]
//! derives both from the node's old interval and the insertion point.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Closed `[left, right]` bounds of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub left: i64,
    pub right: i64,
}

impl Interval {
    pub fn new(left: i64, right: i64) -> Result<Self, CoreError> {
        if left >= right {
            return Err(CoreError::InvalidInterval { left, right });
        }
        Ok(Self { left, right })
    }

    /// Number of bound slots the subtree occupies.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// True if `other` lies strictly inside this interval.
    pub fn encloses(&self, other: &Interval) -> bool {
        self.left < other.left && other.right < self.right
    }

    pub fn disjoint(&self, other: &Interval) -> bool {
        self.right < other.left || other.right < self.left
    }

    /// True if placing a node at `point` would put it inside this subtree.
    pub fn captures(&self, point: i64) -> bool {
        self.left < point && point <= self.right
    }
}

/// Make-room phase: every bound at or above `from` moves up by `width`.
/// Left and right bounds are tested independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub from: i64,
    pub width: i64,
}

impl Shift {
    pub fn apply(&self, bound: i64) -> i64 {
        if bound >= self.from {
            bound + self.width
        } else {
            bound
        }
    }

    pub fn apply_interval(&self, iv: Interval) -> Interval {
        Interval {
            left: self.apply(iv.left),
            right: self.apply(iv.right),
        }
    }
}

/// Subtree phase: every node whose left bound is in `[start, end)` moves by
/// `delta`, both bounds alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translate {
    pub start: i64,
    pub end: i64,
    pub delta: i64,
}

impl Translate {
    pub fn selects(&self, left: i64) -> bool {
        self.start <= left && left < self.end
    }

    pub fn apply_interval(&self, iv: Interval) -> Interval {
        if self.selects(iv.left) {
            Interval {
                left: iv.left + self.delta,
                right: iv.right + self.delta,
            }
        } else {
            iv
        }
    }
}

/// Both phases of moving the subtree rooted at `old` so that it starts at
/// `insertion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    pub old: Interval,
    pub insertion: i64,
    pub shift: Shift,
    pub translate: Translate,
}

impl MovePlan {
    pub fn new(old: Interval, insertion: i64) -> Result<Self, CoreError> {
        if old.captures(insertion) {
            return Err(CoreError::CycleDetected {
                left: old.left,
                right: old.right,
                insertion,
            });
        }
        let width = old.width();
        let shift = Shift {
            from: insertion,
            width,
        };
        // Nodes before the insertion point are untouched by the shift; nodes
        // at or after it have already moved up by `width`.
        let translate = if old.left < insertion {
            Translate {
                start: old.left,
                end: old.right,
                delta: insertion - old.left,
            }
        } else {
            Translate {
                start: old.left + width,
                end: old.right + width,
                delta: -(old.left - insertion + width),
            }
        };
        Ok(Self {
            old,
            insertion,
            shift,
            translate,
        })
    }

    /// Where the moved node ends up.
    pub fn target(&self) -> Interval {
        Interval {
            left: self.insertion,
            right: self.insertion + self.old.right - self.old.left,
        }
    }

    /// Runs both phases over a single interval.
    pub fn apply(&self, iv: Interval) -> Interval {
        self.translate.apply_interval(self.shift.apply_interval(iv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(left: i64, right: i64) -> Interval {
        Interval::new(left, right).unwrap()
    }

    #[test]
    fn rejects_empty_interval() {
        assert!(matches!(
            Interval::new(4, 4),
            Err(CoreError::InvalidInterval { left: 4, right: 4 })
        ));
    }

    #[test]
    fn move_last_root_under_first_root() {
        // A(0,1) B(2,3) C(4,5); C becomes A's first child.
        let (a, b, c) = (iv(0, 1), iv(2, 3), iv(4, 5));
        let plan = MovePlan::new(c, a.left + 1).unwrap();

        assert_eq!(plan.apply(a), iv(0, 3));
        assert_eq!(plan.apply(c), iv(1, 2));
        assert_eq!(plan.apply(b), iv(4, 5));
        assert_eq!(plan.target(), iv(1, 2));
    }

    #[test]
    fn move_forward_carries_descendants() {
        // P(0,3) with child K(1,2); Q(4,5). P moves to after Q.
        let (p, k, q) = (iv(0, 3), iv(1, 2), iv(4, 5));
        let plan = MovePlan::new(p, q.right + 1).unwrap();

        assert_eq!(plan.apply(p), iv(6, 9));
        assert_eq!(plan.apply(k), iv(7, 8));
        assert_eq!(plan.apply(q), iv(4, 5));
    }

    #[test]
    fn insertion_inside_own_subtree_is_a_cycle() {
        let p = iv(0, 5);
        for point in 1..=5 {
            assert!(matches!(
                MovePlan::new(p, point),
                Err(CoreError::CycleDetected { .. })
            ));
        }
        assert!(MovePlan::new(p, 0).is_ok());
        assert!(MovePlan::new(p, 6).is_ok());
    }

    #[test]
    fn shift_tests_bounds_independently() {
        let shift = Shift { from: 3, width: 2 };
        assert_eq!(shift.apply_interval(iv(0, 5)), iv(0, 7));
        assert_eq!(shift.apply_interval(iv(3, 4)), iv(5, 6));
        assert_eq!(shift.apply_interval(iv(0, 2)), iv(0, 2));
    }

    #[test]
    fn enclosure_and_disjointness() {
        assert!(iv(0, 9).encloses(&iv(1, 2)));
        assert!(!iv(0, 9).encloses(&iv(0, 2)));
        assert!(iv(0, 1).disjoint(&iv(2, 3)));
        assert!(!iv(0, 2).disjoint(&iv(2, 3)));
    }
}
