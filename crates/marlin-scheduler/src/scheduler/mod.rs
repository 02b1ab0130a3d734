// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! The scheduling pipeline.
//!
//! Phases run in a fixed order over shared per-node state:
//!
//! 1. CFG building: control nodes become basic blocks and edges.
//! 2. Special RPO: a reverse postorder that keeps loop bodies contiguous.
//! 3. Dominator tree: immediate dominators in one RPO pass.
//! 4. Prepare uses: placement classification and use-count seeding.
//! 5. Schedule early: earliest legal block per node, top-down.
//! 6. Schedule late: latest useful block per node, driven by use counts
//!    reaching zero, with loop-invariant hoisting. Floating control
//!    encountered here is fused into the CFG and phases 2, 3, and 5 are
//!    partially re-run.
//! 7. Seal: assembly order and final per-block node lists.

mod cfg_builder;
mod dominators;
mod prepare_uses;
mod schedule_early;
mod schedule_late;
mod special_rpo;

use std::collections::VecDeque;

use log::trace;
use marlin_graph::{Graph, NodeId, Opcode};

use crate::schedule::{BlockId, Schedule};
use cfg_builder::CfgBuilder;
use prepare_uses::PrepareUsesVisitor;
use schedule_early::ScheduleEarlyVisitor;
use schedule_late::ScheduleLateVisitor;
use special_rpo::SpecialRpoNumberer;

/// Where a node stands in the placement state machine.
///
/// `Unknown → Fixed` happens during CFG building; `Unknown → {Fixed, Coupled,
/// Schedulable}` during use preparation; `Schedulable → Scheduled` and
/// `Coupled → Fixed` during late scheduling and fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Unknown,
    /// Pinned to a block by CFG structure (control nodes, parameters, phis of
    /// connected merges).
    Fixed,
    /// A phi of a floating merge; it travels with its control input.
    Coupled,
    /// Free to be placed anywhere between its earliest and latest block.
    Schedulable,
    Scheduled,
}

/// Dense per-node scheduling state.
#[derive(Clone)]
struct SchedulerData {
    /// Earliest legal block, computed by schedule-early.
    minimum_block: BlockId,
    /// Number of not-yet-scheduled uses; reaching zero makes the node
    /// eligible for late placement.
    unscheduled_count: u32,
    placement: Placement,
    /// Control node reached by the backward walk from the end node.
    is_connected_control: bool,
    /// Control node that was *not* reached: it floats and will be fused.
    is_floating_control: bool,
}

pub struct Scheduler<'g> {
    graph: &'g Graph,
    schedule: Schedule,
    data: Vec<SchedulerData>,
    /// Fixed nodes seeding schedule-early and schedule-late.
    schedule_root_nodes: Vec<NodeId>,
    /// Nodes whose use counts reached zero, awaiting late placement.
    schedule_queue: VecDeque<NodeId>,
    /// Late-planned nodes per block, in use-first order; reversed at seal.
    scheduled_nodes: Vec<Vec<NodeId>>,
    special_rpo: SpecialRpoNumberer,
}

impl<'g> Scheduler<'g> {
    /// Computes a schedule for `graph`. Panics on malformed graphs (see the
    /// individual phases for the contracts they check).
    pub fn compute_schedule(graph: &'g Graph) -> Schedule {
        let mut scheduler = Scheduler::new(graph);
        scheduler.build_cfg();
        scheduler.compute_special_rpo();
        scheduler.generate_dominator_tree();
        scheduler.prepare_uses();
        scheduler.schedule_early();
        scheduler.schedule_late();
        scheduler.seal_final_schedule();
        scheduler.schedule
    }

    fn new(graph: &'g Graph) -> Self {
        let schedule = Schedule::new(graph.node_count());
        let default_data = SchedulerData {
            minimum_block: schedule.start(),
            unscheduled_count: 0,
            placement: Placement::Unknown,
            is_connected_control: false,
            is_floating_control: false,
        };
        Scheduler {
            graph,
            schedule,
            data: vec![default_data; graph.node_count()],
            schedule_root_nodes: Vec::new(),
            schedule_queue: VecDeque::new(),
            scheduled_nodes: Vec::new(),
            special_rpo: SpecialRpoNumberer::new(),
        }
    }

    fn data(&self, node: NodeId) -> &SchedulerData {
        &self.data[node.index()]
    }

    fn data_mut(&mut self, node: NodeId) -> &mut SchedulerData {
        &mut self.data[node.index()]
    }

    fn get_placement(&self, node: NodeId) -> Placement {
        self.data(node).placement
    }

    /// A node is live once the use-preparation walk has classified it.
    fn is_live(&self, node: NodeId) -> bool {
        self.get_placement(node) != Placement::Unknown
    }

    /// First classification of a node, on the walk from the end node.
    fn initialize_placement(&mut self, node: NodeId) -> Placement {
        match self.get_placement(node) {
            // Control nodes connected during CFG building are already fixed.
            Placement::Fixed => return Placement::Fixed,
            Placement::Unknown => {}
            other => panic!("initializing already classified node {node}: {other:?}"),
        }
        let placement = match self.graph.opcode(node) {
            Opcode::Parameter => Placement::Fixed,
            Opcode::Phi | Opcode::EffectPhi => {
                // A phi of a floating merge travels with the merge.
                let control = self.graph.control_input(node, 0);
                if self.get_placement(control) == Placement::Fixed {
                    Placement::Fixed
                } else {
                    Placement::Coupled
                }
            }
            opcode => {
                if opcode.is_control() && !self.data(node).is_connected_control {
                    self.data_mut(node).is_floating_control = true;
                    trace!(
                        "[placement] floating control {}",
                        self.graph.display(node)
                    );
                }
                Placement::Schedulable
            }
        };
        self.data_mut(node).placement = placement;
        placement
    }

    /// Transitions a node's placement and maintains use counts: every
    /// transition out of the initial states stands for "this node is now
    /// placed", so each input loses one unscheduled use.
    fn update_placement(&mut self, node: NodeId, placement: Placement) {
        let graph = self.graph;
        match self.get_placement(node) {
            Placement::Unknown => {
                // CFG building fixes control nodes before any counts exist.
                debug_assert_eq!(placement, Placement::Fixed);
                self.data_mut(node).placement = placement;
                return;
            }
            Placement::Coupled => {
                debug_assert_eq!(placement, Placement::Fixed);
                debug_assert!(graph.opcode(node).is_phi());
                // The phi lands in the block of its (just fixed) merge.
                let control = graph.control_input(node, 0);
                let block = self
                    .schedule
                    .block(control)
                    .unwrap_or_else(|| panic!("coupled control {control} has no block"));
                self.schedule.add_node(block, node);
            }
            Placement::Schedulable => {
                debug_assert!(
                    placement == Placement::Scheduled || placement == Placement::Fixed
                );
                if graph.opcode(node).is_control() {
                    // Fixing a control node drags its coupled phis along.
                    let users: Vec<NodeId> =
                        graph.uses(node).iter().map(|u| u.user).collect();
                    for user in users {
                        if self.get_placement(user) == Placement::Coupled {
                            debug_assert_eq!(graph.control_input(user, 0), node);
                            self.update_placement(user, placement);
                        }
                    }
                }
            }
            other => panic!(
                "invalid placement transition for {}: {other:?} -> {placement:?}",
                graph.display(node)
            ),
        }

        // The coupled phi's own control edge never carried a count.
        let coupled_edge = self.coupled_control_edge(node);
        for index in 0..graph.inputs(node).len() {
            if coupled_edge != Some(index) {
                self.decrement_unscheduled_use_count(graph.input(node, index));
            }
        }
        self.data_mut(node).placement = placement;
    }

    /// The index of the control edge a coupled phi shares with its merge.
    fn coupled_control_edge(&self, node: NodeId) -> Option<usize> {
        if self.get_placement(node) == Placement::Coupled {
            let op = self.graph.op(node);
            Some(marlin_graph::operator_properties::first_control_index(op))
        } else {
            None
        }
    }

    fn increment_unscheduled_use_count(&mut self, node: NodeId) {
        let node = match self.count_carrier(node) {
            Some(node) => node,
            None => return,
        };
        self.data_mut(node).unscheduled_count += 1;
        trace!(
            "[uses] count of {} is now {}",
            self.graph.display(node),
            self.data(node).unscheduled_count
        );
    }

    fn decrement_unscheduled_use_count(&mut self, node: NodeId) {
        let node = match self.count_carrier(node) {
            Some(node) => node,
            None => return,
        };
        let data = self.data_mut(node);
        assert!(
            data.unscheduled_count > 0,
            "use count underflow on node {node}"
        );
        data.unscheduled_count -= 1;
        let count = data.unscheduled_count;
        trace!("[uses] count of {} is now {}", self.graph.display(node), count);
        if count == 0 {
            trace!("[uses] {} is eligible for placement", self.graph.display(node));
            self.schedule_queue.push_back(node);
        }
    }

    /// Resolves where a node's use count is kept: fixed nodes keep none, and
    /// coupled phis aggregate theirs on the merge they travel with.
    fn count_carrier(&self, mut node: NodeId) -> Option<NodeId> {
        loop {
            match self.get_placement(node) {
                Placement::Fixed => return None,
                Placement::Coupled => node = self.graph.control_input(node, 0),
                _ => return Some(node),
            }
        }
    }

    /// Common dominator by walking up the dominator tree, guided by
    /// rpo numbers (a dominator always has a smaller rpo number).
    fn common_dominator(&self, block1: BlockId, block2: BlockId) -> BlockId {
        dominators::common_dominator(&self.schedule, block1, block2)
    }

    /// Walks a control chain until it hits a node that has a block.
    fn find_predecessor_block(&self, node: NodeId) -> BlockId {
        let mut node = node;
        loop {
            if let Some(block) = self.schedule.block(node) {
                return block;
            }
            node = self.graph.control_input(node, 0);
        }
    }

    fn build_cfg(&mut self) {
        trace!("--- CREATING CFG ---");
        let mut builder = CfgBuilder::new(self);
        builder.run();
        let block_count = self.schedule.basic_block_count();
        self.scheduled_nodes.resize(block_count, Vec::new());
    }

    fn compute_special_rpo(&mut self) {
        let Scheduler {
            special_rpo,
            schedule,
            ..
        } = self;
        special_rpo.compute_special_rpo(schedule);
    }

    fn generate_dominator_tree(&mut self) {
        dominators::generate_dominator_tree(&mut self.schedule);
    }

    fn prepare_uses(&mut self) {
        trace!("--- PREPARE USES ---");
        PrepareUsesVisitor::new(self).run();
    }

    fn schedule_early(&mut self) {
        trace!("--- SCHEDULE EARLY ---");
        let roots = self.schedule_root_nodes.clone();
        ScheduleEarlyVisitor::new(self).run(&roots);
    }

    fn schedule_late(&mut self) {
        trace!("--- SCHEDULE LATE ---");
        let roots = self.schedule_root_nodes.clone();
        ScheduleLateVisitor::new(self).run(&roots);
    }

    /// Splices the floating control component exiting at `node` into the CFG
    /// at `block`, then re-runs the global orderings the splice invalidated.
    fn fuse_floating_control(&mut self, block: BlockId, node: NodeId) {
        trace!(
            "--- FUSE FLOATING CONTROL {} at {} ---",
            self.graph.display(node),
            block
        );
        let component = {
            let mut builder = CfgBuilder::new(self);
            builder.run_component(block, node);
            builder.into_component_nodes()
        };
        self.scheduled_nodes
            .resize(self.schedule.basic_block_count(), Vec::new());

        // Splicing shifts every block at or below the component, so rpo
        // numbers and dominators are recomputed globally rather than patched.
        self.compute_special_rpo();
        self.generate_dominator_tree();

        // Minimum blocks inside the new component: propagate from the fused
        // control nodes and the phis now pinned to them.
        let graph = self.graph;
        let mut roots = component.clone();
        for &control in &component {
            for use_ in graph.uses(control) {
                if graph.opcode(use_.user).is_phi() && self.is_live(use_.user) {
                    roots.push(use_.user);
                }
            }
        }
        ScheduleEarlyVisitor::new(self).run(&roots);

        // Nodes already planned for the host block belong below the fused
        // branch now.
        let end_block = self
            .schedule
            .block(node)
            .unwrap_or_else(|| panic!("fused control {node} has no block"));
        self.move_planned_nodes(block, end_block);
    }

    fn move_planned_nodes(&mut self, from: BlockId, to: BlockId) {
        trace!("[fuse] moving planned nodes from {from} to {to}");
        let nodes = std::mem::take(&mut self.scheduled_nodes[from.index()]);
        for &node in &nodes {
            self.schedule.plan_node(to, node);
        }
        self.scheduled_nodes[to.index()].extend(nodes);
    }

    fn seal_final_schedule(&mut self) {
        trace!("--- SEAL FINAL SCHEDULE ---");
        let Scheduler {
            special_rpo,
            schedule,
            scheduled_nodes,
            ..
        } = self;
        special_rpo.assign_assembly_order(schedule);

        // Planned lists were built use-first; reverse for def-before-use
        // order within each block.
        for (index, nodes) in scheduled_nodes.iter().enumerate() {
            let block = BlockId(index as u32);
            for &node in nodes.iter().rev() {
                schedule.add_node(block, node);
            }
        }
    }
}
