//! Pure order arithmetic for items inside pipeline stages.
//!
//! Every active item of a stage holds a distinct `order` in `0..N`. The planner
//! here only describes which sibling ranges must shift and where the moved
//! item lands; applying the plan is left to the repository.

use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Position of an item: the stage it sits in and its order within it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub stage_id: Uuid,
    pub order: i32,
}

impl Slot {
    pub fn new(stage_id: Uuid, order: i32) -> Self {
        Self { stage_id, order }
    }
}

/// Add `delta` to every active sibling in `stage_id` whose order lies in
/// `from..=to`. `to: None` leaves the range open at the top.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OrderShift {
    pub stage_id: Uuid,
    pub from: i32,
    pub to: Option<i32>,
    pub delta: i32,
}

impl OrderShift {
    pub fn covers(&self, stage_id: Uuid, order: i32) -> bool {
        stage_id == self.stage_id && order >= self.from && self.to.is_none_or(|to| order <= to)
    }

    pub fn apply(&self, stage_id: Uuid, order: i32) -> i32 {
        if self.covers(stage_id, order) {
            order + self.delta
        } else {
            order
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MovePlan {
    /// The item already sits at the target slot.
    Noop,
    Apply {
        shifts: Vec<OrderShift>,
        target: Slot,
    },
}

impl MovePlan {
    pub fn is_noop(&self) -> bool {
        matches!(self, MovePlan::Noop)
    }

    /// Stages whose density the plan affects.
    pub fn touched_stages(&self) -> Vec<Uuid> {
        let mut stages = Vec::new();
        if let MovePlan::Apply { shifts, target } = self {
            for stage_id in shifts.iter().map(|s| s.stage_id).chain([target.stage_id]) {
                if !stages.contains(&stage_id) {
                    stages.push(stage_id);
                }
            }
        }
        stages
    }
}

/// Plan the sibling shifts that keep both stages dense when an item moves
/// from `current` to `target`.
pub fn plan_move(current: Slot, target: Slot) -> MovePlan {
    if current == target {
        return MovePlan::Noop;
    }

    let shifts = if current.stage_id == target.stage_id {
        let stage_id = current.stage_id;
        if target.order < current.order {
            vec![OrderShift {
                stage_id,
                from: target.order,
                to: Some(current.order - 1),
                delta: 1,
            }]
        } else {
            vec![OrderShift {
                stage_id,
                from: current.order + 1,
                to: Some(target.order),
                delta: -1,
            }]
        }
    } else {
        vec![close_gap(current), open_slot(target)]
    };

    MovePlan::Apply { shifts, target }
}

/// Shift for an item leaving `slot` (close, soft delete, or the source side of
/// a cross-stage move).
pub fn close_gap(slot: Slot) -> OrderShift {
    OrderShift {
        stage_id: slot.stage_id,
        from: slot.order + 1,
        to: None,
        delta: -1,
    }
}

/// Shift that frees `slot` for an incoming item.
pub fn open_slot(slot: Slot) -> OrderShift {
    OrderShift {
        stage_id: slot.stage_id,
        from: slot.order,
        to: None,
        delta: 1,
    }
}

/// Append position after the highest active order, `0` for an empty stage.
pub fn default_order(max_order: Option<i32>) -> i32 {
    max_order.map_or(0, |max| max + 1)
}

/// Resolve the order an item should land at.
///
/// `siblings` counts the active items of the destination stage, not including
/// the item being placed. Explicit orders past the end are clamped to the
/// append position.
pub fn resolve_order(
    requested: Option<i32>,
    siblings: u64,
    max_order: Option<i32>,
) -> PipelineResult<i32> {
    let append_at = i32::try_from(siblings).unwrap_or(i32::MAX);
    match requested {
        Some(order) if order < 0 => Err(PipelineError::InvalidOrder(order)),
        Some(order) => Ok(order.min(append_at)),
        None => Ok(default_order(max_order).min(append_at)),
    }
}

/// Whether `orders` is exactly a permutation of `0..orders.len()`.
pub fn is_dense(orders: &[i32]) -> bool {
    let mut sorted = orders.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(index, order)| i32::try_from(index).is_ok_and(|index| index == *order))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Board {
        items: Vec<(&'static str, Slot)>,
    }

    impl Board {
        fn apply(&mut self, moved: &str, plan: &MovePlan) {
            let MovePlan::Apply { shifts, target } = plan else {
                return;
            };
            for (name, slot) in self.items.iter_mut() {
                if *name == moved {
                    *slot = *target;
                    continue;
                }
                if let Some(shift) = shifts.iter().find(|s| s.covers(slot.stage_id, slot.order)) {
                    slot.order += shift.delta;
                }
            }
        }

        fn slot(&self, name: &str) -> Slot {
            self.items
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, slot)| *slot)
                .expect("item on board")
        }

        fn orders(&self, stage_id: Uuid) -> Vec<i32> {
            self.items
                .iter()
                .filter(|(_, slot)| slot.stage_id == stage_id)
                .map(|(_, slot)| slot.order)
                .collect()
        }
    }

    fn single_stage() -> (Uuid, Board) {
        let stage = Uuid::new_v4();
        let items = ["p0", "p1", "p2", "p3"]
            .into_iter()
            .zip(0..)
            .map(|(name, order)| (name, Slot::new(stage, order)))
            .collect();
        (stage, Board { items })
    }

    #[test]
    fn moving_earlier_pushes_range_down() {
        let (stage, mut board) = single_stage();
        let plan = plan_move(Slot::new(stage, 3), Slot::new(stage, 1));
        assert_eq!(
            plan,
            MovePlan::Apply {
                shifts: vec![OrderShift {
                    stage_id: stage,
                    from: 1,
                    to: Some(2),
                    delta: 1
                }],
                target: Slot::new(stage, 1),
            }
        );
        board.apply("p3", &plan);
        assert_eq!(board.slot("p3").order, 1);
        assert_eq!(board.slot("p0").order, 0);
        assert_eq!(board.slot("p1").order, 2);
        assert_eq!(board.slot("p2").order, 3);
        assert!(is_dense(&board.orders(stage)));
    }

    #[test]
    fn moving_later_pulls_range_up() {
        let (stage, mut board) = single_stage();
        let plan = plan_move(Slot::new(stage, 0), Slot::new(stage, 2));
        board.apply("p0", &plan);
        assert_eq!(board.slot("p0").order, 2);
        assert_eq!(board.slot("p1").order, 0);
        assert_eq!(board.slot("p2").order, 1);
        assert_eq!(board.slot("p3").order, 3);
        assert!(is_dense(&board.orders(stage)));
    }

    #[test]
    fn cross_stage_closes_source_and_opens_destination() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut board = Board {
            items: vec![
                ("a0", Slot::new(a, 0)),
                ("a1", Slot::new(a, 1)),
                ("a2", Slot::new(a, 2)),
                ("b0", Slot::new(b, 0)),
                ("b1", Slot::new(b, 1)),
            ],
        };
        let plan = plan_move(Slot::new(a, 1), Slot::new(b, 1));
        assert_eq!(plan.touched_stages(), vec![a, b]);
        board.apply("a1", &plan);

        assert_eq!(board.slot("a0"), Slot::new(a, 0));
        assert_eq!(board.slot("a2"), Slot::new(a, 1));
        assert_eq!(board.slot("b0"), Slot::new(b, 0));
        assert_eq!(board.slot("a1"), Slot::new(b, 1));
        assert_eq!(board.slot("b1"), Slot::new(b, 2));
        assert!(is_dense(&board.orders(a)));
        assert!(is_dense(&board.orders(b)));
    }

    #[test]
    fn same_slot_is_noop() {
        let stage = Uuid::new_v4();
        let plan = plan_move(Slot::new(stage, 2), Slot::new(stage, 2));
        assert!(plan.is_noop());
        assert!(plan.touched_stages().is_empty());
    }

    #[test]
    fn resolve_order_defaults_and_clamps() {
        assert_eq!(resolve_order(None, 0, None).unwrap(), 0);
        assert_eq!(resolve_order(None, 3, Some(2)).unwrap(), 3);
        assert_eq!(resolve_order(Some(1), 3, Some(2)).unwrap(), 1);
        assert_eq!(resolve_order(Some(40), 3, Some(2)).unwrap(), 3);
        assert!(matches!(
            resolve_order(Some(-1), 3, Some(2)),
            Err(PipelineError::InvalidOrder(-1))
        ));
    }

    #[test]
    fn density_check() {
        assert!(is_dense(&[]));
        assert!(is_dense(&[2, 0, 1]));
        assert!(!is_dense(&[0, 2]));
        assert!(!is_dense(&[0, 1, 1]));
        assert!(!is_dense(&[1]));
    }

    #[test]
    fn gap_and_slot_shifts_are_open_ended() {
        let stage = Uuid::new_v4();
        let gap = close_gap(Slot::new(stage, 1));
        assert!(!gap.covers(stage, 1));
        assert_eq!(gap.apply(stage, 7), 6);
        assert_eq!(gap.apply(Uuid::new_v4(), 7), 7);

        let open = open_slot(Slot::new(stage, 1));
        assert_eq!(open.apply(stage, 1), 2);
        assert_eq!(open.apply(stage, 0), 0);
    }
}
