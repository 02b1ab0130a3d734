// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Placement classification and use-count seeding.
//!
//! A depth-first walk over every node reachable from the end classifies each
//! node (fixed, coupled, or schedulable) and counts, per node, how many of
//! its uses are not yet scheduled. Late scheduling later drains these counts
//! to zero; a node with no unscheduled uses can be placed.

use log::trace;
use marlin_graph::{NodeId, Opcode};

use crate::bit_vector::BitVector;
use crate::scheduler::{Placement, Scheduler};

pub(super) struct PrepareUsesVisitor<'a, 'g> {
    scheduler: &'a mut Scheduler<'g>,
    stack: Vec<NodeId>,
    visited: BitVector,
}

impl<'a, 'g> PrepareUsesVisitor<'a, 'g> {
    pub(super) fn new(scheduler: &'a mut Scheduler<'g>) -> Self {
        let node_count = scheduler.graph.node_count();
        PrepareUsesVisitor {
            scheduler,
            stack: Vec::new(),
            visited: BitVector::new(node_count),
        }
    }

    pub(super) fn run(mut self) {
        let end = self.scheduler.graph.end();
        self.pre_visit(end);
        while let Some(node) = self.stack.pop() {
            self.visit_inputs(node);
        }
    }

    fn pre_visit(&mut self, node: NodeId) {
        if self.scheduler.initialize_placement(node) == Placement::Fixed {
            // Fixed nodes seed both scheduling phases.
            self.scheduler.schedule_root_nodes.push(node);
            if !self.scheduler.schedule.is_scheduled(node) {
                // Parameters and phis of connected merges were classified
                // fixed just now; pin them to their blocks.
                let graph = self.scheduler.graph;
                let block = match graph.opcode(node) {
                    Opcode::Parameter => self.scheduler.schedule.start(),
                    _ => {
                        let control = graph.control_input(node, 0);
                        self.scheduler.schedule.block(control).unwrap_or_else(|| {
                            panic!(
                                "fixed node {} has unscheduled control {control}",
                                graph.display(node)
                            )
                        })
                    }
                };
                self.scheduler.schedule.add_node(block, node);
            }
        }
        self.stack.push(node);
        self.visited.insert(node.index());
    }

    fn visit_inputs(&mut self, node: NodeId) {
        debug_assert!(self.scheduler.is_live(node));
        let graph = self.scheduler.graph;
        let is_scheduled = self.scheduler.schedule.is_scheduled(node);
        let coupled_edge = self.scheduler.coupled_control_edge(node);
        for index in 0..graph.inputs(node).len() {
            let input = graph.input(node, index);
            if !self.visited.contains(input.index()) {
                self.pre_visit(input);
            }
            // Scheduled users never hold their inputs back, and a coupled
            // phi's control edge is implied by the coupling itself.
            if !is_scheduled && coupled_edge != Some(index) {
                trace!(
                    "[uses] {} uses {}",
                    graph.display(node),
                    graph.display(input)
                );
                self.scheduler.increment_unscheduled_use_count(input);
            }
        }
    }
}
