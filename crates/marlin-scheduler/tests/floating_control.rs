// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Fusion of floating control into the CFG.
//!
//! A branch/merge diamond consumed only through value or effect phis is
//! invisible to the backward control walk; late scheduling fuses it into the
//! CFG at the common dominator of the phi's uses.

mod common;

use marlin_graph::{BranchHint, Graph, Operator};
use marlin_scheduler::{BlockControl, Scheduler};

#[test]
fn floating_diamond_is_fused_at_its_use() {
    let mut g = Graph::new();
    let start = g.add_node(Operator::start(), &[]);
    let cond = g.add_node(Operator::parameter(), &[start]);
    let branch = g.add_node(Operator::branch(BranchHint::None), &[cond, start]);
    let t = g.add_node(Operator::if_true(), &[branch]);
    let f = g.add_node(Operator::if_false(), &[branch]);
    let m = g.add_node(Operator::merge(2), &[t, f]);
    let v1 = g.add_node(Operator::pure_op("int32", 0), &[]);
    let v2 = g.add_node(Operator::pure_op("int32", 0), &[]);
    let phi = g.add_node(Operator::phi(2), &[v1, v2, m]);
    let ret = g.add_node(Operator::ret(), &[phi, start, start]);
    let end = g.add_node(Operator::end(1), &[ret]);
    g.set_start(start);
    g.set_end(end);

    let schedule = Scheduler::compute_schedule(&g);

    // The diamond got real blocks: entry, two arms, merge, end.
    assert_eq!(schedule.basic_block_count(), 5);
    let tblock = schedule.block(t).unwrap();
    let fblock = schedule.block(f).unwrap();
    let mblock = schedule.block(m).unwrap();

    // The branch was spliced into the start block; the return moved below
    // the merge.
    let entry = schedule.get(schedule.start());
    assert_eq!(entry.control(), BlockControl::Branch);
    assert_eq!(entry.control_input(), Some(branch));
    assert_eq!(entry.successors(), &[tblock, fblock]);
    assert_eq!(schedule.block(ret), Some(mblock));
    assert_eq!(schedule.get(mblock).control(), BlockControl::Return);
    assert_eq!(schedule.get(mblock).successors(), &[schedule.end()]);

    // The coupled phi landed with its merge; its inputs split into the arms.
    assert_eq!(schedule.block(phi), Some(mblock));
    assert_eq!(schedule.get(mblock).nodes(), &[m, phi]);
    assert_eq!(schedule.block(v1), Some(tblock));
    assert_eq!(schedule.block(v2), Some(fblock));
    // The condition stays above the branch that consumes it.
    assert_eq!(schedule.block(cond), Some(schedule.start()));

    common::verify_schedule(&g, &schedule);
    common::check_dominators_against_petgraph(&schedule);
}

#[test]
fn floating_diamond_with_effect_phi() {
    let mut g = Graph::new();
    let start = g.add_node(Operator::start(), &[]);
    let cond = g.add_node(Operator::parameter(), &[start]);
    let branch = g.add_node(Operator::branch(BranchHint::None), &[cond, start]);
    let t = g.add_node(Operator::if_true(), &[branch]);
    let f = g.add_node(Operator::if_false(), &[branch]);
    let m = g.add_node(Operator::merge(2), &[t, f]);
    let e1 = g.add_node(Operator::effectful_op("read", 0, 1, 1), &[start, start]);
    let e2 = g.add_node(Operator::effectful_op("read", 0, 1, 1), &[start, start]);
    let ephi = g.add_node(Operator::effect_phi(2), &[e1, e2, m]);
    let v = g.add_node(Operator::pure_op("int32", 0), &[]);
    let ret = g.add_node(Operator::ret(), &[v, ephi, start]);
    let end = g.add_node(Operator::end(1), &[ret]);
    g.set_start(start);
    g.set_end(end);

    let schedule = Scheduler::compute_schedule(&g);

    let tblock = schedule.block(t).unwrap();
    let fblock = schedule.block(f).unwrap();
    let mblock = schedule.block(m).unwrap();

    // The effect phi couples to the merge exactly like a value phi, and the
    // effect producers split into the arms that feed it.
    assert_eq!(schedule.block(ephi), Some(mblock));
    assert_eq!(schedule.get(mblock).nodes(), &[m, ephi]);
    assert_eq!(schedule.block(e1), Some(tblock));
    assert_eq!(schedule.block(e2), Some(fblock));
    assert_eq!(schedule.block(ret), Some(mblock));

    common::verify_schedule(&g, &schedule);
    common::check_dominators_against_petgraph(&schedule);
}

#[test]
fn nested_floating_diamonds_fuse_as_one_component() {
    let mut g = Graph::new();
    let start = g.add_node(Operator::start(), &[]);
    let c1 = g.add_node(Operator::parameter(), &[start]);
    let c2 = g.add_node(Operator::parameter(), &[start]);
    let b1 = g.add_node(Operator::branch(BranchHint::None), &[c1, start]);
    let t1 = g.add_node(Operator::if_true(), &[b1]);
    let f1 = g.add_node(Operator::if_false(), &[b1]);
    let b2 = g.add_node(Operator::branch(BranchHint::None), &[c2, f1]);
    let t2 = g.add_node(Operator::if_true(), &[b2]);
    let f2 = g.add_node(Operator::if_false(), &[b2]);
    let m2 = g.add_node(Operator::merge(2), &[t2, f2]);
    let v3 = g.add_node(Operator::pure_op("int32", 0), &[]);
    let v4 = g.add_node(Operator::pure_op("int32", 0), &[]);
    let phi2 = g.add_node(Operator::phi(2), &[v3, v4, m2]);
    let m1 = g.add_node(Operator::merge(2), &[t1, m2]);
    let v0 = g.add_node(Operator::pure_op("int32", 0), &[]);
    let phi1 = g.add_node(Operator::phi(2), &[v0, phi2, m1]);
    let ret = g.add_node(Operator::ret(), &[phi1, start, start]);
    let end = g.add_node(Operator::end(1), &[ret]);
    g.set_start(start);
    g.set_end(end);

    let schedule = Scheduler::compute_schedule(&g);

    // 2 fixed blocks + inner and outer merges, three arms, one split block
    // shared by the inner branch.
    assert_eq!(schedule.basic_block_count(), 8);
    let m1block = schedule.block(m1).unwrap();
    let m2block = schedule.block(m2).unwrap();
    let f1block = schedule.block(f1).unwrap();

    // The outer branch took over the start block; the inner one terminates
    // the false arm of the outer.
    assert_eq!(schedule.get(schedule.start()).control_input(), Some(b1));
    assert_eq!(schedule.get(f1block).control(), BlockControl::Branch);
    assert_eq!(schedule.get(f1block).control_input(), Some(b2));

    // Both phis are pinned to their merges, inner values to the inner arms.
    assert_eq!(schedule.block(phi1), Some(m1block));
    assert_eq!(schedule.block(phi2), Some(m2block));
    assert_eq!(schedule.block(v0), Some(schedule.block(t1).unwrap()));
    assert_eq!(schedule.block(v3), Some(schedule.block(t2).unwrap()));
    assert_eq!(schedule.block(v4), Some(schedule.block(f2).unwrap()));
    assert_eq!(schedule.block(ret), Some(m1block));

    // The inner merge flows into the outer one.
    assert_eq!(schedule.get(m2block).successors(), &[m1block]);
    assert_eq!(schedule.get(m2block).control(), BlockControl::Goto);

    common::verify_schedule(&g, &schedule);
    common::check_dominators_against_petgraph(&schedule);
}

#[test]
fn fused_schedules_are_deterministic() {
    let build = || {
        let mut g = Graph::new();
        let start = g.add_node(Operator::start(), &[]);
        let cond = g.add_node(Operator::parameter(), &[start]);
        let branch = g.add_node(Operator::branch(BranchHint::None), &[cond, start]);
        let t = g.add_node(Operator::if_true(), &[branch]);
        let f = g.add_node(Operator::if_false(), &[branch]);
        let m = g.add_node(Operator::merge(2), &[t, f]);
        let v1 = g.add_node(Operator::pure_op("int32", 0), &[]);
        let v2 = g.add_node(Operator::pure_op("int32", 0), &[]);
        let phi = g.add_node(Operator::phi(2), &[v1, v2, m]);
        let ret = g.add_node(Operator::ret(), &[phi, start, start]);
        let end = g.add_node(Operator::end(1), &[ret]);
        g.set_start(start);
        g.set_end(end);
        g
    };
    let g = build();
    let first = Scheduler::compute_schedule(&g);
    let second = Scheduler::compute_schedule(&g);
    assert_eq!(first.rpo_order(), second.rpo_order());
    for node in g.node_ids() {
        assert_eq!(first.block(node), second.block(node));
    }
}
