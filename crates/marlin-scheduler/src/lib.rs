// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Scheduler for sea-of-nodes graphs.
//!
//! Turns a graph with explicit value/effect/control edges into a [`Schedule`]:
//! a control-flow graph of basic blocks in a loop-contiguous reverse
//! postorder, with every node assigned to exactly one block. Control nodes
//! become block structure; floating nodes are placed between their
//! earliest legal block (below everything they consume) and their latest
//! useful one (the common dominator of everything that consumes them), with
//! loop-invariant work hoisted into pre-headers along the way.
//!
//! ```
//! use marlin_graph::{Graph, Operator};
//! use marlin_scheduler::Scheduler;
//!
//! let mut graph = Graph::new();
//! let start = graph.add_node(Operator::start(), &[]);
//! let value = graph.add_node(Operator::parameter(), &[start]);
//! let ret = graph.add_node(Operator::ret(), &[value, start, start]);
//! let end = graph.add_node(Operator::end(1), &[ret]);
//! graph.set_start(start);
//! graph.set_end(end);
//!
//! let schedule = Scheduler::compute_schedule(&graph);
//! assert_eq!(schedule.rpo_order().len(), 2);
//! ```

mod bit_vector;
mod schedule;
mod scheduler;

pub use bit_vector::BitVector;
pub use schedule::{BasicBlock, BlockControl, BlockId, Schedule};
pub use scheduler::{Placement, Scheduler};
