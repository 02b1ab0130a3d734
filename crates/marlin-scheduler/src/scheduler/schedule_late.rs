// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Schedule late: the block each node actually gets.
//!
//! Driven by use counts: a node whose uses are all placed is eligible, and
//! its latest useful position is the common dominator of its uses' blocks.
//! From there the node is hoisted out of loops as long as it stays at or
//! below its schedule-early minimum. A floating control node reaching this
//! point is not placed directly; it is fused into the CFG instead.

use log::trace;
use marlin_graph::{operator_properties, NodeId, Use};

use crate::schedule::BlockId;
use crate::scheduler::{Placement, Scheduler};

pub(super) struct ScheduleLateVisitor<'a, 'g> {
    scheduler: &'a mut Scheduler<'g>,
}

impl<'a, 'g> ScheduleLateVisitor<'a, 'g> {
    pub(super) fn new(scheduler: &'a mut Scheduler<'g>) -> Self {
        ScheduleLateVisitor { scheduler }
    }

    pub(super) fn run(&mut self, roots: &[NodeId]) {
        for &root in roots {
            self.process_queue(root);
        }
    }

    /// Seeds the queue with `root`'s eligible inputs and drains it. Nodes
    /// placed along the way decrement their own inputs' counts, feeding the
    /// queue until the subgraph below `root` is exhausted.
    fn process_queue(&mut self, root: NodeId) {
        let graph = self.scheduler.graph;
        for index in 0..graph.inputs(root).len() {
            let mut node = graph.input(root, index);
            // A coupled phi is placed through the merge it travels with.
            if self.scheduler.get_placement(node) == Placement::Coupled {
                node = graph.control_input(node, 0);
            }
            if self.scheduler.data(node).unscheduled_count != 0 {
                continue;
            }
            self.scheduler.schedule_queue.push_back(node);
            while let Some(node) = self.scheduler.schedule_queue.pop_front() {
                self.visit(node);
            }
        }
    }

    fn visit(&mut self, node: NodeId) {
        if self.scheduler.schedule.is_scheduled(node) {
            return;
        }
        debug_assert_eq!(self.scheduler.get_placement(node), Placement::Schedulable);

        // Latest useful position: common dominator of all uses.
        let mut block = self
            .common_dominator_of_uses(node)
            .unwrap_or_else(|| panic!("no use of {node} has a block"));

        let minimum = self.scheduler.data(node).minimum_block;
        let min_rpo = self.scheduler.schedule.get(minimum).rpo_number();
        trace!(
            "[late] {} is in range [{minimum}, {block}]",
            self.scheduler.graph.display(node)
        );

        // Hoist out of loops while the pre-header stays at or below the
        // schedule-early minimum.
        while let Some(hoist) = self.hoist_block(block) {
            if self.scheduler.schedule.get(hoist).rpo_number() < min_rpo {
                break;
            }
            trace!(
                "[late] hoisting {} to {hoist}",
                self.scheduler.graph.display(node)
            );
            block = hoist;
        }

        let data = self.scheduler.data(node);
        if data.is_floating_control && !data.is_connected_control {
            self.scheduler.fuse_floating_control(block, node);
        } else {
            self.schedule_node(block, node);
        }
    }

    /// The common dominator of the blocks in which `node` is used, resolved
    /// through phi and merge users to the predecessor blocks that actually
    /// need the value. `None` if no use has a block yet.
    fn common_dominator_of_uses(&self, node: NodeId) -> Option<BlockId> {
        let graph = self.scheduler.graph;
        let mut block: Option<BlockId> = None;
        for use_ in graph.uses(node) {
            if !self.scheduler.is_live(use_.user) {
                continue;
            }
            let use_block = self.block_for_use(*use_);
            block = match (block, use_block) {
                (Some(a), Some(b)) => Some(self.scheduler.common_dominator(a, b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            };
        }
        block
    }

    /// Where a single use needs the used value to be available.
    fn block_for_use(&self, use_: Use) -> Option<BlockId> {
        let graph = self.scheduler.graph;
        let user = use_.user;
        let opcode = graph.opcode(user);
        if opcode.is_phi() {
            match self.scheduler.get_placement(user) {
                // A floating phi's needs are those of its own uses.
                Placement::Coupled => return self.common_dominator_of_uses(user),
                Placement::Fixed => {
                    // A fixed phi needs its i-th value where the merge's
                    // i-th predecessor ends.
                    debug_assert!(
                        use_.index < operator_properties::value_input_count(graph.op(user))
                            + operator_properties::effect_input_count(graph.op(user))
                    );
                    let merge = graph.control_input(user, 0);
                    debug_assert!(graph.opcode(merge).is_merge());
                    let input = graph.control_input(merge, use_.index);
                    return Some(self.scheduler.find_predecessor_block(input));
                }
                _ => {}
            }
        } else if opcode.is_merge() && self.scheduler.get_placement(user) == Placement::Fixed {
            // A control input to a merge must be computed in the feeding
            // predecessor, not in the merge block itself.
            let used = graph.input(user, use_.index);
            return Some(self.scheduler.find_predecessor_block(used));
        }
        self.scheduler.schedule.block(user)
    }

    /// The target of one hoisting step out of `block`'s loop, if any: the
    /// dominator of the loop header. Hoisting from a non-header loop member
    /// is only sound if the member dominates every block the loop exits to;
    /// otherwise the hoisted node would run on paths that never reach it.
    fn hoist_block(&self, block: BlockId) -> Option<BlockId> {
        let schedule = &self.scheduler.schedule;
        if schedule.get(block).is_loop_header() {
            return schedule.get(block).dominator();
        }
        let header = schedule.get(block).loop_header()?;
        for &outgoing in self.scheduler.special_rpo.outgoing_blocks(header) {
            if self.scheduler.common_dominator(block, outgoing) != block {
                return None;
            }
        }
        schedule.get(header).dominator()
    }

    fn schedule_node(&mut self, block: BlockId, node: NodeId) {
        trace!(
            "[late] placing {} in {block}",
            self.scheduler.graph.display(node)
        );
        self.scheduler.schedule.plan_node(block, node);
        self.scheduler.scheduled_nodes[block.index()].push(node);
        self.scheduler.update_placement(node, Placement::Scheduled);
    }
}
