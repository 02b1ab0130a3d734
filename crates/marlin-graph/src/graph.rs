// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::opcode::Opcode;
use crate::operator::Operator;
use crate::operator_properties;

/// Dense index of a node in a [`Graph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A use back-reference: `user`'s input at `index` points at this node.
///
/// The index lets consumers map a phi's value input to the corresponding
/// predecessor of its merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: NodeId,
    pub index: usize,
}

struct NodeData {
    op: Operator,
    inputs: Vec<NodeId>,
    uses: Vec<Use>,
}

/// Arena of nodes with designated start and end nodes.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<NodeData>,
    start: Option<NodeId>,
    end: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Adds a node. The input list length must match the operator's total
    /// arity; uses are recorded on each input in creation order.
    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        assert_eq!(
            inputs.len(),
            operator_properties::total_input_count(&op),
            "wrong input count for {} node",
            op.mnemonic
        );
        let id = NodeId(self.nodes.len() as u32);
        for (index, input) in inputs.iter().enumerate() {
            self.nodes[input.index()].uses.push(Use { user: id, index });
        }
        self.nodes.push(NodeData {
            op,
            inputs: inputs.to_vec(),
            uses: Vec::new(),
        });
        id
    }

    /// Redirects `node`'s input at `index` to `to`, fixing up use lists.
    /// Graph builders need this to close loop back edges; the scheduler
    /// never calls it.
    pub fn replace_input(&mut self, node: NodeId, index: usize, to: NodeId) {
        let old = self.nodes[node.index()].inputs[index];
        let uses = &mut self.nodes[old.index()].uses;
        let pos = uses
            .iter()
            .position(|u| u.user == node && u.index == index)
            .unwrap_or_else(|| panic!("missing use record for input {index} of {node}"));
        uses.remove(pos);
        self.nodes[node.index()].inputs[index] = to;
        self.nodes[to.index()].uses.push(Use { user: node, index });
    }

    pub fn set_start(&mut self, node: NodeId) {
        self.start = Some(node);
    }

    pub fn set_end(&mut self, node: NodeId) {
        self.end = Some(node);
    }

    pub fn start(&self) -> NodeId {
        self.start.expect("graph has no start node")
    }

    pub fn end(&self) -> NodeId {
        self.end.expect("graph has no end node")
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn op(&self, node: NodeId) -> &Operator {
        &self.nodes[node.index()].op
    }

    pub fn opcode(&self, node: NodeId) -> Opcode {
        self.nodes[node.index()].op.opcode
    }

    pub fn inputs(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.index()].inputs
    }

    pub fn input(&self, node: NodeId, index: usize) -> NodeId {
        self.nodes[node.index()].inputs[index]
    }

    /// The `i`-th control input of `node`, resolved through the
    /// `[values.., effects.., controls..]` layout.
    pub fn control_input(&self, node: NodeId, i: usize) -> NodeId {
        let op = self.op(node);
        debug_assert!(i < operator_properties::control_input_count(op));
        self.input(node, operator_properties::first_control_index(op) + i)
    }

    pub fn uses(&self, node: NodeId) -> &[Use] {
        &self.nodes[node.index()].uses
    }

    /// `#7:Branch`-style rendering for trace output and panic messages.
    pub fn display(&self, node: NodeId) -> impl fmt::Display + '_ {
        NodeDisplay { graph: self, node }
    }
}

struct NodeDisplay<'g> {
    graph: &'g Graph,
    node: NodeId,
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.graph.op(self.node).mnemonic)
    }
}
