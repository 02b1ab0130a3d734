// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Schedule early: the earliest block each node could legally occupy.
//!
//! A breadth-first walk from the fixed nodes pushes minimum positions
//! forward along use edges: a node must not be placed above any of its
//! inputs, so its minimum block is the RPO-maximum of its inputs' minimum
//! blocks. Minimums only ever move downward (to larger rpo numbers), so the
//! propagation terminates.

use std::collections::VecDeque;

use log::trace;
use marlin_graph::NodeId;

use crate::schedule::BlockId;
use crate::scheduler::{Placement, Scheduler};

pub(super) struct ScheduleEarlyVisitor<'a, 'g> {
    scheduler: &'a mut Scheduler<'g>,
    queue: VecDeque<NodeId>,
}

impl<'a, 'g> ScheduleEarlyVisitor<'a, 'g> {
    pub(super) fn new(scheduler: &'a mut Scheduler<'g>) -> Self {
        ScheduleEarlyVisitor {
            scheduler,
            queue: VecDeque::new(),
        }
    }

    pub(super) fn run(&mut self, roots: &[NodeId]) {
        for &root in roots {
            self.queue.push_back(root);
            while let Some(node) = self.queue.pop_front() {
                self.visit(node);
            }
        }
    }

    fn visit(&mut self, node: NodeId) {
        // Fixed nodes are their own minimum.
        if self.scheduler.get_placement(node) == Placement::Fixed {
            let block = self
                .scheduler
                .schedule
                .block(node)
                .unwrap_or_else(|| panic!("fixed node {node} has no block"));
            self.scheduler.data_mut(node).minimum_block = block;
        }

        // A minimum at the start block constrains nothing downstream.
        let minimum = self.scheduler.data(node).minimum_block;
        if minimum == self.scheduler.schedule.start() {
            return;
        }

        trace!(
            "[early] propagating minimum {minimum} of {}",
            self.scheduler.graph.display(node)
        );
        let graph = self.scheduler.graph;
        for use_ in graph.uses(node) {
            if self.scheduler.is_live(use_.user) {
                self.propagate_minimum(minimum, use_.user);
            }
        }
    }

    fn propagate_minimum(&mut self, block: BlockId, node: NodeId) {
        match self.scheduler.get_placement(node) {
            // Fixed positions never move.
            Placement::Fixed => return,
            // A coupled phi constrains the merge it travels with.
            Placement::Coupled => {
                let control = self.scheduler.graph.control_input(node, 0);
                self.propagate_minimum(block, control);
            }
            _ => {}
        }
        let schedule = &self.scheduler.schedule;
        let current = self.scheduler.data(node).minimum_block;
        if schedule.get(block).rpo_number() > schedule.get(current).rpo_number() {
            trace!(
                "[early] minimum of {} moves to {block}",
                self.scheduler.graph.display(node)
            );
            self.scheduler.data_mut(node).minimum_block = block;
            self.queue.push_back(node);
        }
    }
}
