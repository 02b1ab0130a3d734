// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Capability table over [`Operator`]: input arities and the index layout of
//! the node input list. Arity is always queried here, never guessed from the
//! length of an input slice.

use crate::operator::Operator;

pub fn value_input_count(op: &Operator) -> usize {
    op.value_inputs
}

pub fn effect_input_count(op: &Operator) -> usize {
    op.effect_inputs
}

pub fn control_input_count(op: &Operator) -> usize {
    op.control_inputs
}

pub fn total_input_count(op: &Operator) -> usize {
    op.value_inputs + op.effect_inputs + op.control_inputs
}

// Input lists are laid out as [values.., effects.., controls..].

pub fn first_value_index(_op: &Operator) -> usize {
    0
}

pub fn first_effect_index(op: &Operator) -> usize {
    op.value_inputs
}

pub fn first_control_index(op: &Operator) -> usize {
    op.value_inputs + op.effect_inputs
}
