// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Immediate dominators over the special RPO.
//!
//! Because the special RPO visits every forward predecessor of a block
//! before the block itself, a single in-order pass suffices: seed the
//! immediate dominator with the first forward predecessor and refine it with
//! the common dominator of the rest. Back edges are skipped; a loop header
//! is dominated by its entry alone.

use log::trace;

use crate::schedule::{BlockId, Schedule};

/// Nearest common dominator, walking up the tree by rpo number (a dominator
/// always has a strictly smaller rpo number than the blocks it dominates).
pub(super) fn common_dominator(schedule: &Schedule, block1: BlockId, block2: BlockId) -> BlockId {
    let mut block1 = block1;
    let mut block2 = block2;
    while block1 != block2 {
        let rpo1 = schedule.get(block1).rpo_number();
        let rpo2 = schedule.get(block2).rpo_number();
        if rpo1 < rpo2 {
            block2 = schedule
                .get(block2)
                .dominator()
                .unwrap_or_else(|| panic!("{block2} has no dominator"));
        } else {
            block1 = schedule
                .get(block1)
                .dominator()
                .unwrap_or_else(|| panic!("{block1} has no dominator"));
        }
    }
    block1
}

/// Fills in the immediate dominator of every reachable block. Recomputed
/// from scratch after fusion splices.
pub(super) fn generate_dominator_tree(schedule: &mut Schedule) {
    trace!("--- IMMEDIATE BLOCK DOMINATORS ---");
    for index in 0..schedule.basic_block_count() {
        schedule.get_mut(BlockId(index as u32)).dominator = None;
    }

    let order: Vec<BlockId> = schedule.rpo_order().to_vec();
    for &id in order.iter().skip(1) {
        let rpo = schedule.get(id).rpo_number();
        let predecessors = schedule.get(id).predecessors().to_vec();
        let mut dominator: Option<BlockId> = None;
        for pred in predecessors {
            // Back edges point above the block in RPO and are ignored.
            if schedule.get(pred).rpo_number() < rpo {
                dominator = Some(match dominator {
                    None => pred,
                    Some(current) => common_dominator(schedule, current, pred),
                });
            }
        }
        let dominator =
            dominator.unwrap_or_else(|| panic!("{id} has no forward predecessor"));
        schedule.get_mut(id).dominator = Some(dominator);
        trace!("[dom] dominator of {id} is {dominator}");
    }
}
