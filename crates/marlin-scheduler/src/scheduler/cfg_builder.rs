// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Control-flow graph construction.
//!
//! A backward breadth-first walk from the end node discovers the connected
//! control nodes. Block-defining nodes (merges, loops, branch projections)
//! get basic blocks in a first pass; a second pass wires the edges. The same
//! machinery runs in *component mode* during floating-control fusion, where
//! it extends an existing CFG instead of starting from scratch.

use std::collections::VecDeque;

use log::trace;
use marlin_graph::{operator_properties, NodeId, Opcode};

use crate::schedule::{BlockControl, BlockId};
use crate::scheduler::{Placement, Scheduler};

pub(super) struct CfgBuilder<'a, 'g> {
    scheduler: &'a mut Scheduler<'g>,
    queue: VecDeque<NodeId>,
    /// Control nodes discovered by this run, in discovery order.
    control_nodes: Vec<NodeId>,
    component_entry: Option<NodeId>,
    component_start: Option<BlockId>,
    component_end: Option<BlockId>,
}

impl<'a, 'g> CfgBuilder<'a, 'g> {
    pub(super) fn new(scheduler: &'a mut Scheduler<'g>) -> Self {
        CfgBuilder {
            scheduler,
            queue: VecDeque::new(),
            control_nodes: Vec::new(),
            component_entry: None,
            component_start: None,
            component_end: None,
        }
    }

    /// Builds the CFG for the connected control subgraph.
    pub(super) fn run(&mut self) {
        let end = self.scheduler.graph.end();
        self.queue_node(end);
        while let Some(node) = self.queue.pop_front() {
            let graph = self.scheduler.graph;
            let op = graph.op(node);
            let first = operator_properties::first_control_index(op);
            for i in 0..operator_properties::control_input_count(op) {
                self.queue_node(graph.input(node, first + i));
            }
        }
        for i in 0..self.control_nodes.len() {
            self.connect_blocks(self.control_nodes[i]);
        }

        // Every discovered block must have been terminated by now; a block
        // left open means some control path never reaches the end node.
        let schedule = &self.scheduler.schedule;
        for index in 0..schedule.basic_block_count() {
            let id = BlockId(index as u32);
            if id != schedule.end() {
                assert_ne!(
                    schedule.get(id).control(),
                    BlockControl::None,
                    "dangling control: {id} was never terminated"
                );
            }
        }
    }

    /// Builds the CFG component of the floating control subgraph exiting at
    /// `exit`, splicing its unique entry branch into `block`.
    pub(super) fn run_component(&mut self, block: BlockId, exit: NodeId) {
        self.component_entry = None;
        self.component_start = Some(block);
        self.queue_node(exit);
        self.component_end = self.scheduler.schedule.block(exit);
        assert!(
            self.component_end.is_some(),
            "floating control must exit through a block-defining node, got {}",
            self.scheduler.graph.display(exit)
        );
        while let Some(node) = self.queue.pop_front() {
            let graph = self.scheduler.graph;
            let op = graph.op(node);
            let first = operator_properties::first_control_index(op);
            // The component entry is the unique node none of whose control
            // inputs float.
            let mut is_entry = true;
            for i in 0..operator_properties::control_input_count(op) {
                let input = graph.input(node, first + i);
                if self.scheduler.data(input).is_floating_control {
                    is_entry = false;
                }
                self.queue_node(input);
            }
            if is_entry {
                assert!(
                    self.component_entry.is_none(),
                    "floating control component has multiple entries: {} and {}",
                    self.scheduler
                        .graph
                        .display(self.component_entry.unwrap_or(node)),
                    self.scheduler.graph.display(node)
                );
                assert_eq!(
                    graph.opcode(node),
                    Opcode::Branch,
                    "floating control component must enter through a branch"
                );
                self.component_entry = Some(node);
            }
        }
        assert!(
            self.component_entry.is_some(),
            "floating control component has no entry"
        );
        for i in 0..self.control_nodes.len() {
            self.connect_blocks(self.control_nodes[i]);
        }
    }

    pub(super) fn into_component_nodes(self) -> Vec<NodeId> {
        self.control_nodes
    }

    fn queue_node(&mut self, node: NodeId) {
        if self.scheduler.data(node).is_connected_control {
            return;
        }
        self.scheduler.data_mut(node).is_connected_control = true;
        self.build_blocks(node);
        self.queue.push_back(node);
        self.control_nodes.push(node);
    }

    fn build_blocks(&mut self, node: NodeId) {
        let graph = self.scheduler.graph;
        match graph.opcode(node) {
            Opcode::End => {
                let end = self.scheduler.schedule.end();
                self.fix_node(end, node);
            }
            Opcode::Start => {
                let start = self.scheduler.schedule.start();
                self.fix_node(start, node);
            }
            Opcode::Merge | Opcode::Loop => {
                self.build_block_for_node(node);
            }
            Opcode::Terminate => {
                // A terminator lives in the block of the loop it keeps alive.
                let loop_node = graph.control_input(node, 0);
                debug_assert_eq!(graph.opcode(loop_node), Opcode::Loop);
                let block = self.build_block_for_node(loop_node);
                self.fix_node(block, node);
            }
            Opcode::Branch => {
                let (tnode, fnode) = self.branch_projections(node);
                self.build_block_for_node(tnode);
                self.build_block_for_node(fnode);
            }
            _ => {}
        }
    }

    fn connect_blocks(&mut self, node: NodeId) {
        match self.scheduler.graph.opcode(node) {
            Opcode::Merge | Opcode::Loop => self.connect_merge(node),
            Opcode::Branch => {
                self.scheduler.update_placement(node, Placement::Fixed);
                self.connect_branch(node);
            }
            Opcode::Return => {
                self.scheduler.update_placement(node, Placement::Fixed);
                self.connect_return(node);
            }
            Opcode::Throw => {
                self.scheduler.update_placement(node, Placement::Fixed);
                self.connect_throw(node);
            }
            _ => {}
        }
    }

    fn fix_node(&mut self, block: BlockId, node: NodeId) {
        trace!(
            "[cfg] fixing {} in {block}",
            self.scheduler.graph.display(node)
        );
        self.scheduler.schedule.add_node(block, node);
        self.scheduler.update_placement(node, Placement::Fixed);
    }

    fn build_block_for_node(&mut self, node: NodeId) -> BlockId {
        if let Some(block) = self.scheduler.schedule.block(node) {
            return block;
        }
        let block = self.scheduler.schedule.new_basic_block();
        trace!(
            "[cfg] created {block} for {}",
            self.scheduler.graph.display(node)
        );
        self.fix_node(block, node);
        block
    }

    /// The true and false projections of a branch. Exactly one of each must
    /// exist, and nothing else may consume the branch.
    fn branch_projections(&self, branch: NodeId) -> (NodeId, NodeId) {
        let graph = self.scheduler.graph;
        let mut tnode = None;
        let mut fnode = None;
        for use_ in graph.uses(branch) {
            match graph.opcode(use_.user) {
                Opcode::IfTrue => {
                    assert!(
                        tnode.is_none(),
                        "branch {} has multiple true projections",
                        graph.display(branch)
                    );
                    tnode = Some(use_.user);
                }
                Opcode::IfFalse => {
                    assert!(
                        fnode.is_none(),
                        "branch {} has multiple false projections",
                        graph.display(branch)
                    );
                    fnode = Some(use_.user);
                }
                _ => panic!(
                    "unexpected use {} of branch {}",
                    graph.display(use_.user),
                    graph.display(branch)
                ),
            }
        }
        (
            tnode.unwrap_or_else(|| {
                panic!("branch {} has no true projection", graph.display(branch))
            }),
            fnode.unwrap_or_else(|| {
                panic!("branch {} has no false projection", graph.display(branch))
            }),
        )
    }

    fn connect_merge(&mut self, merge: NodeId) {
        let graph = self.scheduler.graph;
        let block = self
            .scheduler
            .schedule
            .block(merge)
            .unwrap_or_else(|| panic!("merge {merge} has no block"));
        for i in 0..operator_properties::control_input_count(graph.op(merge)) {
            let input = graph.control_input(merge, i);
            let pred = self.scheduler.find_predecessor_block(input);
            trace!("[cfg] connecting goto {pred} -> {block}");
            self.scheduler.schedule.add_goto(pred, block);
        }
    }

    fn connect_branch(&mut self, branch: NodeId) {
        let graph = self.scheduler.graph;
        let (tnode, fnode) = self.branch_projections(branch);
        let tblock = self.scheduler.schedule.block(tnode).unwrap_or_else(|| {
            panic!("true projection {tnode} has no block")
        });
        let fblock = self.scheduler.schedule.block(fnode).unwrap_or_else(|| {
            panic!("false projection {fnode} has no block")
        });

        // The unlikely side of a hinted branch is deferred out of line.
        match graph.op(branch).hint {
            marlin_graph::BranchHint::True => {
                self.scheduler.schedule.get_mut(fblock).deferred = true
            }
            marlin_graph::BranchHint::False => {
                self.scheduler.schedule.get_mut(tblock).deferred = true
            }
            marlin_graph::BranchHint::None => {}
        }

        if self.component_entry == Some(branch) {
            let start = self.component_start.unwrap_or_else(|| {
                panic!("component branch {branch} connected outside component mode")
            });
            let end = self.component_end.unwrap_or_else(|| {
                panic!("component branch {branch} connected outside component mode")
            });
            trace!("[cfg] splicing branch {start} -> {tblock} {fblock}, old control to {end}");
            self.scheduler
                .schedule
                .insert_branch(start, end, branch, tblock, fblock);
        } else {
            let block = self
                .scheduler
                .find_predecessor_block(graph.control_input(branch, 0));
            trace!("[cfg] connecting branch {block} -> {tblock} {fblock}");
            self.scheduler
                .schedule
                .add_branch(block, branch, tblock, fblock);
        }
    }

    fn connect_return(&mut self, ret: NodeId) {
        let graph = self.scheduler.graph;
        let block = self
            .scheduler
            .find_predecessor_block(graph.control_input(ret, 0));
        trace!("[cfg] connecting return in {block}");
        self.scheduler.schedule.add_return(block, ret);
    }

    fn connect_throw(&mut self, throw: NodeId) {
        let graph = self.scheduler.graph;
        let block = self
            .scheduler
            .find_predecessor_block(graph.control_input(throw, 0));
        trace!("[cfg] connecting throw in {block}");
        self.scheduler.schedule.add_throw(block, throw);
    }
}
