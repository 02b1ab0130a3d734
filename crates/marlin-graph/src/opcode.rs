// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

/// The closed set of operator kinds the scheduler understands.
///
/// `Pure` and `Effectful` stand in for the open-ended families of value
/// operators (arithmetic, loads, calls, ...); scheduling only cares about
/// their arities, which live on the [`Operator`](crate::Operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Start,
    End,
    Parameter,
    Merge,
    Loop,
    Terminate,
    Branch,
    IfTrue,
    IfFalse,
    Return,
    Throw,
    Phi,
    EffectPhi,
    Pure,
    Effectful,
}

impl Opcode {
    /// Operators that produce (or consume only) control.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Opcode::Start
                | Opcode::End
                | Opcode::Merge
                | Opcode::Loop
                | Opcode::Terminate
                | Opcode::Branch
                | Opcode::IfTrue
                | Opcode::IfFalse
                | Opcode::Return
                | Opcode::Throw
        )
    }

    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi | Opcode::EffectPhi)
    }

    /// Control-join operators: the ones that get their own basic block.
    pub fn is_merge(self) -> bool {
        matches!(self, Opcode::Merge | Opcode::Loop)
    }
}
