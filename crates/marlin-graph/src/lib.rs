// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Sea-of-nodes graph model.
//!
//! Nodes carry an [`Operator`] and an explicit input list laid out as
//! `[values.., effects.., controls..]`. The graph records use back-references
//! so consumers can walk both directions; nodes are immutable once created
//! (except for [`Graph::replace_input`], which graph builders need to close
//! loop back edges).

mod graph;
mod opcode;
mod operator;
pub mod operator_properties;

pub use graph::{Graph, NodeId, Use};
pub use opcode::Opcode;
pub use operator::{BranchHint, Operator};
