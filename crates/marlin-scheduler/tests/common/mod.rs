// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Shared checks over finished schedules.

#![allow(dead_code)]

use std::collections::BTreeMap;

use marlin_graph::{operator_properties, Graph, NodeId, Opcode};
use marlin_scheduler::{BlockId, Schedule};

/// Structural soundness of a schedule: RPO numbering, dominator shape, loop
/// nesting, per-block node layout, and dominance of every use.
pub fn verify_schedule(graph: &Graph, schedule: &Schedule) {
    verify_rpo(schedule);
    verify_dominators(schedule);
    verify_loops(schedule);
    verify_block_layout(graph, schedule);
    verify_use_dominance(graph, schedule);
}

fn verify_rpo(schedule: &Schedule) {
    for (i, &id) in schedule.rpo_order().iter().enumerate() {
        assert_eq!(
            schedule.get(id).rpo_number(),
            i as i32,
            "rpo number of {id} disagrees with its order position"
        );
    }
}

fn verify_dominators(schedule: &Schedule) {
    for &id in schedule.rpo_order().iter().skip(1) {
        let block = schedule.get(id);
        let dom = block
            .dominator()
            .unwrap_or_else(|| panic!("reachable block {id} has no dominator"));
        assert!(
            schedule.get(dom).rpo_number() < block.rpo_number(),
            "dominator {dom} of {id} does not precede it in rpo"
        );
        for &pred in block.predecessors() {
            if schedule.get(pred).rpo_number() < block.rpo_number() {
                assert!(
                    dominates(schedule, dom, pred),
                    "dominator {dom} of {id} does not dominate predecessor {pred}"
                );
            }
        }
    }
}

fn verify_loops(schedule: &Schedule) {
    for &id in schedule.rpo_order() {
        let block = schedule.get(id);
        if block.is_loop_header() {
            assert!(
                block.loop_end() > block.rpo_number(),
                "loop of {id} is empty"
            );
            assert_eq!(block.loop_header(), Some(id), "header {id} not in its own loop");
        }
        // The nearest enclosing loop's rpo range must cover the block.
        if let Some(header) = block.loop_header() {
            let h = schedule.get(header);
            assert!(h.is_loop_header());
            assert!(
                h.rpo_number() <= block.rpo_number() && block.rpo_number() < h.loop_end(),
                "{id} lies outside the rpo range of its loop header {header}"
            );
            assert!(block.loop_depth() >= h.loop_depth());
        } else {
            assert_eq!(block.loop_depth(), 0);
        }
    }
}

fn verify_block_layout(graph: &Graph, schedule: &Schedule) {
    for &id in schedule.rpo_order() {
        let block = schedule.get(id);
        let mut seen_floating = false;
        for &node in block.nodes() {
            assert_eq!(
                schedule.block(node),
                Some(id),
                "{node} listed in {id} but mapped elsewhere"
            );
            let opcode = graph.opcode(node);
            let pinned = opcode.is_control() || opcode.is_phi() || opcode == Opcode::Parameter;
            if pinned {
                assert!(
                    !seen_floating,
                    "pinned node {node} appears after floating nodes in {id}"
                );
            } else {
                seen_floating = true;
            }
        }
        if let Some(control) = block.control_input() {
            assert_eq!(schedule.block(control), Some(id));
        }
    }
}

fn verify_use_dominance(graph: &Graph, schedule: &Schedule) {
    let mut stack = vec![graph.end()];
    let mut visited = vec![false; graph.node_count()];
    visited[graph.end().index()] = true;
    while let Some(node) = stack.pop() {
        assert!(
            schedule.is_scheduled(node),
            "reachable node {node} was never scheduled"
        );
        for &input in graph.inputs(node) {
            if !visited[input.index()] {
                visited[input.index()] = true;
                stack.push(input);
            }
        }
    }

    for node in graph.node_ids() {
        if !visited[node.index()] {
            continue;
        }
        let def = schedule.block(node).unwrap();
        for use_ in graph.uses(node) {
            if !visited[use_.user.index()] {
                continue;
            }
            // The end node collects arbitrary terminal controls; none of
            // them dominates it.
            if graph.opcode(use_.user) == Opcode::End {
                continue;
            }
            let required = required_block(graph, schedule, use_.user, use_.index);
            assert!(
                dominates(schedule, def, required),
                "definition of {node} in {def} does not dominate its use in {required}"
            );
        }
    }
}

/// The block where the value consumed by `user`'s input at `index` must be
/// available: phi and merge users pull values into the feeding predecessor.
fn required_block(graph: &Graph, schedule: &Schedule, user: NodeId, index: usize) -> BlockId {
    let op = graph.op(user);
    let opcode = op.opcode;
    if opcode.is_phi()
        && index
            < operator_properties::value_input_count(op)
                + operator_properties::effect_input_count(op)
    {
        let merge = graph.control_input(user, 0);
        return end_of_control_chain(graph, schedule, graph.control_input(merge, index));
    }
    if opcode.is_merge() {
        return end_of_control_chain(graph, schedule, graph.input(user, index));
    }
    schedule.block(user).unwrap()
}

fn end_of_control_chain(graph: &Graph, schedule: &Schedule, node: NodeId) -> BlockId {
    let mut node = node;
    loop {
        if let Some(block) = schedule.block(node) {
            return block;
        }
        node = graph.control_input(node, 0);
    }
}

/// Whether `a` dominates `b` (reflexive). Blocks outside the rpo order are
/// exempt from dominance obligations.
pub fn dominates(schedule: &Schedule, a: BlockId, b: BlockId) -> bool {
    if schedule.get(a).rpo_number() < 0 || schedule.get(b).rpo_number() < 0 {
        return true;
    }
    let mut b = b;
    loop {
        if a == b {
            return true;
        }
        match schedule.get(b).dominator() {
            Some(dom) => b = dom,
            None => return false,
        }
    }
}

/// Cross-checks the hand-built dominator tree against petgraph's
/// simple-fast algorithm on the same CFG.
pub fn check_dominators_against_petgraph(schedule: &Schedule) {
    let mut cfg = petgraph::graph::DiGraph::<BlockId, ()>::new();
    let mut map = BTreeMap::new();
    for &id in schedule.rpo_order() {
        map.insert(id, cfg.add_node(id));
    }
    for &id in schedule.rpo_order() {
        for &succ in schedule.get(id).successors() {
            if let Some(&to) = map.get(&succ) {
                cfg.add_edge(map[&id], to, ());
            }
        }
    }
    let root = map[&schedule.rpo_order()[0]];
    let doms = petgraph::algo::dominators::simple_fast(&cfg, root);
    for &id in schedule.rpo_order().iter().skip(1) {
        let expected = doms
            .immediate_dominator(map[&id])
            .unwrap_or_else(|| panic!("petgraph found {id} unreachable"));
        let actual = map[&schedule.get(id).dominator().unwrap()];
        assert_eq!(actual, expected, "dominator mismatch for {id}");
    }
}

