// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use itertools::Itertools;
use marlin_graph::{Graph, NodeId};

/// Dense index of a basic block in a [`Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// How a basic block transfers control to its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockControl {
    /// Not yet terminated.
    None,
    Goto,
    Branch,
    Return,
    Throw,
}

/// A basic block: an ordered node list plus CFG and ordering metadata.
///
/// Numbering fields start out as `-1` / `None` sentinels and are filled in by
/// the special-RPO and dominator passes.
pub struct BasicBlock {
    id: BlockId,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) control: BlockControl,
    pub(crate) control_input: Option<NodeId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) deferred: bool,
    pub(crate) rpo_number: i32,
    pub(crate) ao_number: i32,
    pub(crate) dominator: Option<BlockId>,
    pub(crate) loop_header: Option<BlockId>,
    pub(crate) loop_depth: i32,
    /// Exclusive rpo bound of this block's loop; `-1` unless a loop header.
    pub(crate) loop_end: i32,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            nodes: Vec::new(),
            control: BlockControl::None,
            control_input: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
            deferred: false,
            rpo_number: -1,
            ao_number: -1,
            dominator: None,
            loop_header: None,
            loop_depth: 0,
            loop_end: -1,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn control(&self) -> BlockControl {
        self.control
    }

    /// The node that computes this block's terminating control, if any. It is
    /// not part of [`nodes`](Self::nodes) but does appear in the node→block
    /// map.
    pub fn control_input(&self) -> Option<NodeId> {
        self.control_input
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    pub fn deferred(&self) -> bool {
        self.deferred
    }

    pub fn rpo_number(&self) -> i32 {
        self.rpo_number
    }

    pub fn ao_number(&self) -> i32 {
        self.ao_number
    }

    pub fn dominator(&self) -> Option<BlockId> {
        self.dominator
    }

    pub fn loop_header(&self) -> Option<BlockId> {
        self.loop_header
    }

    pub fn loop_depth(&self) -> i32 {
        self.loop_depth
    }

    pub fn loop_end(&self) -> i32 {
        self.loop_end
    }

    pub fn is_loop_header(&self) -> bool {
        self.loop_end >= 0
    }
}

/// The product of scheduling: basic blocks, a node→block assignment, and the
/// special RPO ordering over the blocks.
pub struct Schedule {
    blocks: Vec<BasicBlock>,
    node_block: Vec<Option<BlockId>>,
    rpo_order: Vec<BlockId>,
    start: BlockId,
    end: BlockId,
}

impl Schedule {
    /// Creates an empty schedule with the start and end blocks pre-built.
    pub fn new(node_count: usize) -> Self {
        let mut schedule = Schedule {
            blocks: Vec::new(),
            node_block: vec![None; node_count],
            rpo_order: Vec::new(),
            start: BlockId(0),
            end: BlockId(0),
        };
        schedule.start = schedule.new_basic_block();
        schedule.end = schedule.new_basic_block();
        schedule
    }

    pub fn start(&self) -> BlockId {
        self.start
    }

    pub fn end(&self) -> BlockId {
        self.end
    }

    pub fn basic_block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn get(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Blocks in special RPO. Unreachable blocks (e.g. the end block of a
    /// program that never returns) are absent.
    pub fn rpo_order(&self) -> &[BlockId] {
        &self.rpo_order
    }

    pub(crate) fn set_rpo_order(&mut self, order: Vec<BlockId>) {
        self.rpo_order = order;
    }

    /// The block `node` is assigned to, if it has been placed yet.
    pub fn block(&self, node: NodeId) -> Option<BlockId> {
        self.node_block[node.index()]
    }

    pub fn is_scheduled(&self, node: NodeId) -> bool {
        self.node_block[node.index()].is_some()
    }

    pub(crate) fn new_basic_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    /// Appends `node` to `block` and records the assignment.
    pub(crate) fn add_node(&mut self, block: BlockId, node: NodeId) {
        self.node_block[node.index()] = Some(block);
        self.blocks[block.index()].nodes.push(node);
    }

    /// Records the assignment only; the node list entry is added at seal.
    pub(crate) fn plan_node(&mut self, block: BlockId, node: NodeId) {
        self.node_block[node.index()] = Some(block);
    }

    fn set_control_input(&mut self, block: BlockId, node: NodeId) {
        self.node_block[node.index()] = Some(block);
        self.blocks[block.index()].control_input = Some(node);
    }

    fn add_successor(&mut self, block: BlockId, succ: BlockId) {
        self.blocks[block.index()].successors.push(succ);
        self.blocks[succ.index()].predecessors.push(block);
    }

    pub(crate) fn add_goto(&mut self, block: BlockId, succ: BlockId) {
        match self.get(block).control {
            BlockControl::None => self.blocks[block.index()].control = BlockControl::Goto,
            // A merge may list the same control input more than once; keep
            // the edge multiplicity so predecessors still line up with the
            // merge's control inputs.
            BlockControl::Goto if self.get(block).successors.contains(&succ) => {}
            other => panic!("cannot add goto from {block} already terminated by {other:?}"),
        }
        self.add_successor(block, succ);
    }

    pub(crate) fn add_branch(
        &mut self,
        block: BlockId,
        branch: NodeId,
        tblock: BlockId,
        fblock: BlockId,
    ) {
        assert_eq!(
            self.get(block).control,
            BlockControl::None,
            "cannot add branch to terminated block {block}"
        );
        self.blocks[block.index()].control = BlockControl::Branch;
        self.set_control_input(block, branch);
        self.add_successor(block, tblock);
        self.add_successor(block, fblock);
    }

    pub(crate) fn add_return(&mut self, block: BlockId, ret: NodeId) {
        assert_eq!(
            self.get(block).control,
            BlockControl::None,
            "cannot add return to terminated block {block}"
        );
        self.blocks[block.index()].control = BlockControl::Return;
        self.set_control_input(block, ret);
        if block != self.end {
            self.add_successor(block, self.end);
        }
    }

    /// Throw blocks are terminal: no successor edge, not even to end.
    pub(crate) fn add_throw(&mut self, block: BlockId, throw: NodeId) {
        assert_eq!(
            self.get(block).control,
            BlockControl::None,
            "cannot add throw to terminated block {block}"
        );
        self.blocks[block.index()].control = BlockControl::Throw;
        self.set_control_input(block, throw);
    }

    /// Splices a branch into the middle of `block`'s control: the block's
    /// existing terminator and successors move to `end`, and `block` is
    /// re-terminated with `branch` to `tblock`/`fblock`. Used when a floating
    /// control component is fused into an already-built CFG.
    pub(crate) fn insert_branch(
        &mut self,
        block: BlockId,
        end: BlockId,
        branch: NodeId,
        tblock: BlockId,
        fblock: BlockId,
    ) {
        assert_ne!(self.get(block).control, BlockControl::None);
        assert_eq!(self.get(end).control, BlockControl::None);
        self.blocks[end.index()].control = self.blocks[block.index()].control;
        self.blocks[block.index()].control = BlockControl::None;
        if let Some(node) = self.blocks[block.index()].control_input.take() {
            self.set_control_input(end, node);
        }
        self.move_successors(block, end);
        self.blocks[block.index()].control = BlockControl::Branch;
        self.set_control_input(block, branch);
        self.add_successor(block, tblock);
        self.add_successor(block, fblock);
    }

    fn move_successors(&mut self, from: BlockId, to: BlockId) {
        let succs = std::mem::take(&mut self.blocks[from.index()].successors);
        for &succ in &succs {
            for pred in self.blocks[succ.index()].predecessors.iter_mut() {
                if *pred == from {
                    *pred = to;
                }
            }
        }
        self.blocks[to.index()].successors.extend(succs);
    }

    /// Renders the schedule against its graph, one section per RPO block.
    pub fn display<'a>(&'a self, graph: &'a Graph) -> impl fmt::Display + 'a {
        ScheduleDisplay {
            schedule: self,
            graph: Some(graph),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ScheduleDisplay {
            schedule: self,
            graph: None,
        }
        .fmt(f)
    }
}

struct ScheduleDisplay<'a> {
    schedule: &'a Schedule,
    graph: Option<&'a Graph>,
}

impl ScheduleDisplay<'_> {
    fn node(&self, node: NodeId) -> String {
        match self.graph {
            Some(graph) => graph.display(node).to_string(),
            None => node.to_string(),
        }
    }
}

impl fmt::Display for ScheduleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule = self.schedule;
        for &id in schedule.rpo_order() {
            let block = schedule.get(id);
            write!(f, "--- {} (rpo {}", id, block.rpo_number)?;
            if block.deferred {
                write!(f, ", deferred")?;
            }
            if block.is_loop_header() {
                write!(f, ", loop until rpo {}", block.loop_end)?;
            }
            writeln!(f, ") ---")?;
            if !block.predecessors.is_empty() {
                writeln!(
                    f,
                    "  preds: {}",
                    block.predecessors.iter().map(|b| b.to_string()).join(" ")
                )?;
            }
            for &node in &block.nodes {
                writeln!(f, "  {}", self.node(node))?;
            }
            match block.control {
                BlockControl::None => {}
                control => {
                    let input = match block.control_input {
                        Some(node) => self.node(node),
                        None => String::new(),
                    };
                    let succs = block.successors.iter().map(|b| b.to_string()).join(" ");
                    writeln!(f, "  {control:?} {input} -> {succs}")?;
                }
            }
        }
        Ok(())
    }
}
