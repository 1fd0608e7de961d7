//! Nested-set maintenance for records whose parent changed.
//!
//! Each move costs a fixed handful of statements regardless of subtree size,
//! but the make-room shift touches every bound above the insertion point in
//! the whole collection. Many moves in one collection are therefore cheaper
//! as a single [`rebuild`].

use std::collections::HashMap;

use optilock_core::{CoreError, Interval, MovePlan, RecordId};
use optilock_storage::{HierarchyTable, NodeLink};
use tracing::{debug, info};

use crate::error::EngineError;

/// Left bound for a node placed under `parent` right after its closest
/// preceding sibling.
fn insertion_point<T: HierarchyTable>(
    table: &mut T,
    parent: Option<RecordId>,
    id: RecordId,
) -> Result<i64, EngineError> {
    let mut insertion = None;
    for sibling in table.siblings(parent)? {
        if sibling.id == id {
            break;
        }
        insertion = Some(sibling.right.unwrap_or(0) + 1);
    }
    match (insertion, parent) {
        (Some(point), _) => Ok(point),
        (None, None) => Ok(0),
        (None, Some(parent)) => Ok(table.bounds(parent)?.left + 1),
    }
}

/// Repositions every node in `moved`, whose parent column already holds
/// `new_parent`. `moved` must be in sibling order: each insertion point is
/// computed after the previous node has been placed. A move that would nest
/// a node inside its own subtree fails with `Cycle`; moves already applied
/// for earlier nodes stay in the caller's transaction.
pub fn rebalance<T: HierarchyTable>(
    table: &mut T,
    new_parent: Option<RecordId>,
    moved: &[RecordId],
) -> Result<(), EngineError> {
    let collection = table.schema().name.clone();
    for &id in moved {
        let old = table.bounds(id)?;
        let insertion = insertion_point(table, new_parent, id)?;
        let plan = MovePlan::new(old, insertion).map_err(|e| match e {
            CoreError::CycleDetected { .. } => EngineError::Cycle {
                collection: collection.clone(),
                id,
            },
            other => EngineError::Core(other),
        })?;

        let shifted = table.shift(&plan.shift)?;
        let translated = table.translate(&plan.translate)?;
        debug!(
            target: "optilock::rebalance",
            %collection,
            %id,
            from = old.left,
            to = insertion,
            width = old.width(),
            shifted,
            translated,
            "node moved"
        );
    }
    Ok(())
}

/// Recomputes every interval from the parent links alone: a depth-first walk
/// in sibling order, roots numbered from 0. Returns the number of nodes
/// positioned.
pub fn rebuild<T: HierarchyTable>(table: &mut T) -> Result<usize, EngineError> {
    let collection = table.schema().name.clone();
    let links = table.links()?;

    let known: HashMap<RecordId, usize> = links.iter().enumerate().map(|(i, l)| (l.id, i)).collect();
    let mut children: HashMap<Option<RecordId>, Vec<RecordId>> = HashMap::new();
    for NodeLink { id, parent } in &links {
        // A dangling parent makes the node a root, like a NULL would.
        let parent = parent.filter(|p| known.contains_key(p));
        children.entry(parent).or_default().push(*id);
    }

    let mut counter = 0i64;
    let mut positioned = 0usize;
    let mut lefts: HashMap<RecordId, i64> = HashMap::new();
    // (node, index of next child to visit)
    let mut stack: Vec<(RecordId, usize)> = Vec::new();
    let roots = children.get(&None).cloned().unwrap_or_default();
    for root in roots {
        lefts.insert(root, counter);
        counter += 1;
        stack.push((root, 0));
        while let Some((node, next)) = stack.last_mut() {
            let kids = children.get(&Some(*node)).map(Vec::as_slice).unwrap_or_default();
            if let Some(&child) = kids.get(*next) {
                *next += 1;
                lefts.insert(child, counter);
                counter += 1;
                stack.push((child, 0));
            } else {
                let node = *node;
                let left = lefts[&node];
                table.set_bounds(node, Interval::new(left, counter)?)?;
                counter += 1;
                positioned += 1;
                stack.pop();
            }
        }
    }

    if positioned < links.len() {
        let stranded = links
            .iter()
            .map(|l| l.id)
            .find(|id| !lefts.contains_key(id))
            .unwrap_or(links[0].id);
        return Err(EngineError::Cycle {
            collection,
            id: stranded,
        });
    }
    info!(target: "optilock::rebalance", %collection, nodes = positioned, "hierarchy rebuilt");
    Ok(positioned)
}
