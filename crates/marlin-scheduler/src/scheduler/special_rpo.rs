// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Special reverse postorder.
//!
//! An ordinary reverse postorder of a reducible CFG already places a loop
//! header before its body, but may interleave non-loop blocks with the body.
//! The special RPO additionally keeps every loop body contiguous: a loop
//! header `H` with `loop_end` `e` spans exactly the blocks with rpo numbers
//! in `[rpo(H), e)`.
//!
//! Two passes over the CFG, both with explicit stacks:
//! 1. A DFS that records back edges and assigns loop numbers to their
//!    targets. If there are no back edges the DFS order is already final.
//! 2. A backward walk from each back-edge source collects loop membership
//!    bit sets, then a second DFS defers successors that leave the current
//!    loop onto per-loop `outgoing` lists and splices each finished loop
//!    body into the order as one contiguous segment.
//!
//! The order is kept as a linked list threaded through `rpo_next` so a whole
//! loop body can be spliced in front of the tail in O(body) time.

use log::trace;

use crate::bit_vector::BitVector;
use crate::schedule::{BlockId, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    OnStack,
    Visited,
}

struct StackFrame {
    block: BlockId,
    index: usize,
}

struct LoopInfo {
    header: BlockId,
    /// Loop body blocks, excluding the header itself.
    members: BitVector,
    /// Successors that leave the loop, visited once the body is complete.
    outgoing: Vec<BlockId>,
    /// First block of the loop's contiguous segment (the header).
    start: Option<BlockId>,
    /// First block after the loop's contiguous segment.
    end: Option<BlockId>,
    /// Enclosing loop while this one is on the loop stack.
    prev: Option<usize>,
}

pub(super) struct SpecialRpoNumberer {
    /// Successor link of the order under construction.
    rpo_next: Vec<Option<BlockId>>,
    state: Vec<VisitState>,
    stack: Vec<StackFrame>,
    /// Back edges as (source block, successor index).
    backedges: Vec<(BlockId, usize)>,
    /// Loop number of each header block.
    loop_number: Vec<Option<usize>>,
    loops: Vec<LoopInfo>,
}

impl SpecialRpoNumberer {
    pub(super) fn new() -> Self {
        SpecialRpoNumberer {
            rpo_next: Vec::new(),
            state: Vec::new(),
            stack: Vec::new(),
            backedges: Vec::new(),
            loop_number: Vec::new(),
            loops: Vec::new(),
        }
    }

    /// Computes the special RPO of `schedule` from scratch, filling in
    /// `rpo_number`, `loop_header`, `loop_depth`, `loop_end`, and the
    /// schedule's `rpo_order`. Called again after every fusion splice.
    pub(super) fn compute_special_rpo(&mut self, schedule: &mut Schedule) {
        trace!("--- COMPUTING SPECIAL RPO ---");
        let count = schedule.basic_block_count();
        self.rpo_next.clear();
        self.rpo_next.resize(count, None);
        self.state.clear();
        self.state.resize(count, VisitState::Unvisited);
        self.loop_number.clear();
        self.loop_number.resize(count, None);
        self.backedges.clear();
        self.loops.clear();
        self.stack.clear();

        let (mut order, num_loops) = self.plain_traversal(schedule);
        if !self.backedges.is_empty() {
            self.compute_loop_info(schedule, num_loops);
            order = self.loop_aware_traversal(schedule);
        }
        self.finalize(schedule, order);
    }

    /// Pass 1: DFS collecting back edges; emits a plain RPO.
    fn plain_traversal(&mut self, schedule: &Schedule) -> (Option<BlockId>, usize) {
        let entry = schedule.start();
        let end = schedule.end();
        let mut order: Option<BlockId> = None;
        let mut num_loops = 0;

        self.stack.push(StackFrame {
            block: entry,
            index: 0,
        });
        self.state[entry.index()] = VisitState::OnStack;

        while !self.stack.is_empty() {
            let top = self.stack.len() - 1;
            let block = self.stack[top].block;
            let index = self.stack[top].index;
            let succ_count = schedule.get(block).successors().len();

            if block != end && index < succ_count {
                self.stack[top].index += 1;
                let succ = schedule.get(block).successors()[index];
                match self.state[succ.index()] {
                    VisitState::Visited => {}
                    VisitState::OnStack => {
                        self.backedges.push((block, index));
                        if self.loop_number[succ.index()].is_none() {
                            trace!("[rpo] {succ} is the header of loop {num_loops}");
                            self.loop_number[succ.index()] = Some(num_loops);
                            num_loops += 1;
                        }
                    }
                    VisitState::Unvisited => {
                        self.state[succ.index()] = VisitState::OnStack;
                        self.stack.push(StackFrame {
                            block: succ,
                            index: 0,
                        });
                    }
                }
            } else {
                self.stack.pop();
                self.state[block.index()] = VisitState::Visited;
                self.rpo_next[block.index()] = order;
                order = Some(block);
            }
        }
        (order, num_loops)
    }

    /// Backward walk from each back-edge source up to (excluding) the header
    /// collects the loop membership bit sets.
    fn compute_loop_info(&mut self, schedule: &Schedule, num_loops: usize) {
        let count = schedule.basic_block_count();
        self.loops = (0..num_loops)
            .map(|_| LoopInfo {
                header: BlockId(0),
                members: BitVector::new(count),
                outgoing: Vec::new(),
                start: None,
                end: None,
                prev: None,
            })
            .collect();
        for index in 0..count {
            if let Some(number) = self.loop_number[index] {
                self.loops[number].header = BlockId(index as u32);
            }
        }

        let mut queue: Vec<BlockId> = Vec::new();
        for i in 0..self.backedges.len() {
            let (from, succ_index) = self.backedges[i];
            let header = schedule.get(from).successors()[succ_index];
            let number = self.loop_number[header.index()]
                .expect("back edge target must be a loop header");
            if from != header && self.loops[number].members.insert(from.index()) {
                queue.push(from);
            }
            while let Some(block) = queue.pop() {
                for &pred in schedule.get(block).predecessors() {
                    if pred != header && self.loops[number].members.insert(pred.index()) {
                        queue.push(pred);
                    }
                }
            }
        }
    }

    /// Pass 2: DFS that defers loop-leaving successors and splices each
    /// finished loop body into the order as one contiguous segment.
    fn loop_aware_traversal(&mut self, schedule: &Schedule) -> Option<BlockId> {
        let entry = schedule.start();
        let end = schedule.end();
        let mut order: Option<BlockId> = None;

        for state in self.state.iter_mut() {
            *state = VisitState::Unvisited;
        }
        self.stack.push(StackFrame {
            block: entry,
            index: 0,
        });
        self.state[entry.index()] = VisitState::OnStack;
        let mut current_loop = self.loop_number[entry.index()];

        while !self.stack.is_empty() {
            let top = self.stack.len() - 1;
            let block = self.stack[top].block;
            let index = self.stack[top].index;
            let succ_count = schedule.get(block).successors().len();
            let mut succ: Option<BlockId> = None;

            if block != end && index < succ_count {
                self.stack[top].index += 1;
                succ = Some(schedule.get(block).successors()[index]);
            } else if let Some(number) = self.loop_number[block.index()] {
                if self.state[block.index()] == VisitState::OnStack {
                    // The header ran out of normal successors for the first
                    // time: the loop body is complete. Prepend the header to
                    // it, restore the enclosing order and pop the loop stack.
                    // The header stays on the DFS stack to serve its
                    // outgoing edges.
                    debug_assert_eq!(current_loop, Some(number));
                    self.rpo_next[block.index()] = order;
                    self.loops[number].start = Some(block);
                    order = self.loops[number].end;
                    self.state[block.index()] = VisitState::Visited;
                    current_loop = self.loops[number].prev;
                }
                let outgoing_index = index - succ_count;
                if block != entry && outgoing_index < self.loops[number].outgoing.len() {
                    self.stack[top].index += 1;
                    succ = Some(self.loops[number].outgoing[outgoing_index]);
                }
            }

            if let Some(succ) = succ {
                if self.state[succ.index()] != VisitState::Unvisited {
                    continue;
                }
                let leaves_loop = current_loop
                    .is_some_and(|number| !self.loops[number].members.contains(succ.index()));
                if leaves_loop {
                    // Not in the current loop (or any nested one): visit it
                    // after the body is complete.
                    let number = current_loop.unwrap_or_else(|| unreachable!());
                    trace!(
                        "[rpo] deferring {succ} past loop of {}",
                        self.loops[number].header
                    );
                    self.loops[number].outgoing.push(succ);
                } else {
                    self.state[succ.index()] = VisitState::OnStack;
                    self.stack.push(StackFrame {
                        block: succ,
                        index: 0,
                    });
                    if let Some(number) = self.loop_number[succ.index()] {
                        // Entering a nested loop: push it onto the loop stack.
                        self.loops[number].end = order;
                        self.loops[number].prev = current_loop;
                        current_loop = Some(number);
                    }
                }
            } else {
                self.stack.pop();
                if let Some(number) = self.loop_number[block.index()] {
                    // Splice the loop's contiguous segment in front of the
                    // order built since the body was finished.
                    let start = self.loops[number]
                        .start
                        .expect("loop body must be complete before its header pops");
                    let old_end = self.loops[number].end;
                    let mut last = start;
                    while self.rpo_next[last.index()] != old_end {
                        last = self.rpo_next[last.index()]
                            .expect("loop segment must reach its end marker");
                    }
                    self.rpo_next[last.index()] = order;
                    self.loops[number].end = order;
                    order = Some(start);
                } else {
                    self.rpo_next[block.index()] = order;
                    order = Some(block);
                    self.state[block.index()] = VisitState::Visited;
                }
            }
        }
        order
    }

    /// Assigns rpo numbers, loop headers/depths/ends, and the schedule's
    /// rpo order from the linked order.
    fn finalize(&mut self, schedule: &mut Schedule, order: Option<BlockId>) {
        for index in 0..schedule.basic_block_count() {
            let block = schedule.get_mut(BlockId(index as u32));
            block.rpo_number = -1;
            block.loop_header = None;
            block.loop_depth = 0;
            block.loop_end = -1;
        }

        let mut rpo_order = Vec::new();
        let mut number = 0i32;
        let mut cursor = order;
        while let Some(id) = cursor {
            schedule.get_mut(id).rpo_number = number;
            rpo_order.push(id);
            number += 1;
            cursor = self.rpo_next[id.index()];
        }

        for info in &self.loops {
            let end = info.end.map_or(number, |e| schedule.get(e).rpo_number);
            schedule.get_mut(info.header).loop_end = end;
            trace!(
                "[rpo] loop of {} spans rpo [{}, {end})",
                info.header,
                schedule.get(info.header).rpo_number
            );
        }

        // Nearest enclosing loop per block; a header belongs to its own loop.
        let mut active: Vec<BlockId> = Vec::new();
        for (i, &id) in rpo_order.iter().enumerate() {
            let rpo = i as i32;
            while let Some(&header) = active.last() {
                if rpo >= schedule.get(header).loop_end {
                    active.pop();
                } else {
                    break;
                }
            }
            if self.loop_number[id.index()].is_some() {
                active.push(id);
            }
            let block = schedule.get_mut(id);
            block.loop_header = active.last().copied();
            block.loop_depth = active.len() as i32;
        }

        schedule.set_rpo_order(rpo_order);
    }

    /// The deferred successors of `header`'s loop; empty for non-headers.
    /// Valid until the next RPO computation.
    pub(super) fn outgoing_blocks(&self, header: BlockId) -> &[BlockId] {
        match self.loop_number.get(header.index()).copied().flatten() {
            Some(number) => &self.loops[number].outgoing,
            None => &[],
        }
    }

    /// Assembly order: non-deferred blocks first, then deferred ones, each
    /// group in RPO-relative order.
    pub(super) fn assign_assembly_order(&self, schedule: &mut Schedule) {
        let order: Vec<BlockId> = schedule.rpo_order().to_vec();
        let mut number = 0;
        for &id in &order {
            if !schedule.get(id).deferred {
                schedule.get_mut(id).ao_number = number;
                number += 1;
            }
        }
        for &id in &order {
            if schedule.get(id).deferred {
                schedule.get_mut(id).ao_number = number;
                number += 1;
            }
        }
    }
}
