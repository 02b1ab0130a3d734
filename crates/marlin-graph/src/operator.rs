// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::opcode::Opcode;

/// Static branch prediction attached to a `Branch` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchHint {
    None,
    True,
    False,
}

/// An operator: opcode plus the static properties scheduling needs.
///
/// Input arities are split by kind; the node's input list is laid out as
/// `[values.., effects.., controls..]` (see
/// [`operator_properties`](crate::operator_properties)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub value_inputs: usize,
    pub effect_inputs: usize,
    pub control_inputs: usize,
    pub hint: BranchHint,
}

impl Operator {
    fn new(
        opcode: Opcode,
        mnemonic: &'static str,
        value_inputs: usize,
        effect_inputs: usize,
        control_inputs: usize,
    ) -> Self {
        Operator {
            opcode,
            mnemonic,
            value_inputs,
            effect_inputs,
            control_inputs,
            hint: BranchHint::None,
        }
    }

    pub fn start() -> Self {
        Self::new(Opcode::Start, "Start", 0, 0, 0)
    }

    /// The end node collects every terminal control path (returns, throws,
    /// loop terminators).
    pub fn end(control_inputs: usize) -> Self {
        Self::new(Opcode::End, "End", 0, 0, control_inputs)
    }

    pub fn parameter() -> Self {
        Self::new(Opcode::Parameter, "Parameter", 0, 0, 1)
    }

    pub fn merge(control_inputs: usize) -> Self {
        Self::new(Opcode::Merge, "Merge", 0, 0, control_inputs)
    }

    /// A loop header join. The first control input is the entry edge; the
    /// remaining ones are back edges, typically patched in with
    /// [`Graph::replace_input`](crate::Graph::replace_input).
    pub fn loop_(control_inputs: usize) -> Self {
        Self::new(Opcode::Loop, "Loop", 0, 0, control_inputs)
    }

    /// Keeps the end node reachable from a non-terminating loop.
    pub fn terminate() -> Self {
        Self::new(Opcode::Terminate, "Terminate", 0, 1, 1)
    }

    pub fn branch(hint: BranchHint) -> Self {
        let mut op = Self::new(Opcode::Branch, "Branch", 1, 0, 1);
        op.hint = hint;
        op
    }

    pub fn if_true() -> Self {
        Self::new(Opcode::IfTrue, "IfTrue", 0, 0, 1)
    }

    pub fn if_false() -> Self {
        Self::new(Opcode::IfFalse, "IfFalse", 0, 0, 1)
    }

    pub fn ret() -> Self {
        Self::new(Opcode::Return, "Return", 1, 1, 1)
    }

    pub fn throw() -> Self {
        Self::new(Opcode::Throw, "Throw", 1, 1, 1)
    }

    pub fn phi(value_inputs: usize) -> Self {
        Self::new(Opcode::Phi, "Phi", value_inputs, 0, 1)
    }

    pub fn effect_phi(effect_inputs: usize) -> Self {
        Self::new(Opcode::EffectPhi, "EffectPhi", 0, effect_inputs, 1)
    }

    /// An opaque side-effect-free value operator.
    pub fn pure_op(mnemonic: &'static str, value_inputs: usize) -> Self {
        Self::new(Opcode::Pure, mnemonic, value_inputs, 0, 0)
    }

    /// An opaque operator threaded on the effect (and optionally control)
    /// chain.
    pub fn effectful_op(
        mnemonic: &'static str,
        value_inputs: usize,
        effect_inputs: usize,
        control_inputs: usize,
    ) -> Self {
        Self::new(
            Opcode::Effectful,
            mnemonic,
            value_inputs,
            effect_inputs,
            control_inputs,
        )
    }
}
