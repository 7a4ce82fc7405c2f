//! Not-null parameter inference with an explicit continuation stack.
//!
//! Each explored state gets a result computed from its successors' results, so the
//! exploration is a post-order walk. The walk is driven by [`Action`]s on a heap
//! stack instead of recursion so deep methods cannot overflow the thread stack.

use std::collections::{BTreeSet, HashMap};

use crate::analysis::budget::Budget;
use crate::analysis::frame::AbstractValue;
use crate::analysis::interp;
use crate::analysis::key::{Direction, EKey, Member};
use crate::analysis::lattice::{ELattice, Value};
use crate::analysis::result::EResult;
use crate::analysis::worklist::{self, Hypothesis, State, Successor};
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::flow::ControlFlowGraph;
use crate::opcodes;

enum Action {
    /// Explore the state with the given id.
    Proceed(usize),
    /// Combine the children's results once they are all computed.
    MakeResult {
        id: usize,
        children: Vec<usize>,
        keys: BTreeSet<EKey>,
    },
}

/// Derives `In { param, nullable: false }`: `NotNull` when every path that sees a
/// null parameter dereferences it or fails because of it.
pub fn analyze(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    param: usize,
    budget: &mut Budget<'_>,
) -> Result<EResult, AnalysisAbort> {
    let lattice = ELattice::for_direction(Direction::In {
        param,
        nullable: false,
    });
    let hypothesis = Some(Hypothesis {
        param,
        value: Value::Null,
    });
    let tracked = AbstractValue::Param(param);

    let mut states = vec![State::entry(body)?];
    let mut memo: HashMap<State, usize> = HashMap::from([(states[0].clone(), 0)]);
    let mut started = vec![false];
    let mut results: Vec<Option<EResult>> = vec![None];
    let mut actions = vec![Action::Proceed(0)];

    while let Some(action) = actions.pop() {
        match action {
            Action::Proceed(id) => {
                if started[id] {
                    continue;
                }
                started[id] = true;
                budget.step()?;
                let state = states[id].clone();
                let insn = worklist::instruction(body, state.conf.insn)?;
                let stack = &state.conf.frame.stack;

                if interp::dereferenced(insn, stack) == Some(&tracked) {
                    results[id] = Some(EResult::Final(Value::NotNull));
                    continue;
                }
                if opcodes::is_return(insn.opcode) {
                    results[id] = Some(EResult::Final(Value::Top));
                    continue;
                }
                if insn.opcode == opcodes::ATHROW {
                    let value = if state.taken {
                        Value::NotNull
                    } else {
                        Value::Top
                    };
                    results[id] = Some(EResult::Final(value));
                    continue;
                }

                let mut keys = BTreeSet::new();
                if let Some((call, args)) = worklist::call_arguments(insn, stack) {
                    for position in worklist::passed_positions(args, param) {
                        keys.insert(EKey::new(
                            Member::new(&call.owner, &call.name, &call.descriptor),
                            Direction::In {
                                param: position,
                                nullable: false,
                            },
                            call.kind.is_stable(),
                        ));
                    }
                }

                let after = worklist::execute(body, &state)?;
                let mut children = Vec::new();
                let mut to_explore = Vec::new();
                for successor in worklist::successors(body, cfg, &state, after, hypothesis)? {
                    // Folded loop headers contribute the bottom value.
                    let Successor::Next(next) = successor else {
                        continue;
                    };
                    let child = match memo.get(&next) {
                        Some(&child) => child,
                        None => {
                            let child = states.len();
                            memo.insert(next.clone(), child);
                            states.push(next);
                            started.push(false);
                            results.push(None);
                            child
                        }
                    };
                    if !started[child] {
                        to_explore.push(child);
                    }
                    children.push(child);
                }
                actions.push(Action::MakeResult { id, children, keys });
                actions.extend(to_explore.into_iter().map(Action::Proceed));
            }
            Action::MakeResult { id, children, keys } => {
                let mut result = EResult::Final(lattice.bot);
                for child in children {
                    // A child still in progress is an ancestor reached through a cycle.
                    if let Some(child_result) = &results[child] {
                        result = result.join(child_result, &lattice);
                    }
                }
                let result = result.meet_ids(&keys, &lattice);
                budget.check_size(result.id_count())?;
                results[id] = Some(result);
            }
        }
    }

    results
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| AnalysisAbort::malformed("entry state was not evaluated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::budget::{AnalysisConfig, NeverCancel};
    use crate::analysis::contracts::tests::{
        constant, invoke, jump, load, op, static_method,
    };
    use crate::flow::build_flow_graph;
    use crate::ir::{Constant, Insn, Method, Operand};

    fn run(method: &Method, param: usize) -> Result<EResult, AnalysisAbort> {
        let body = MethodBody::new("Test", method)?;
        let cfg = build_flow_graph(method)?;
        let config = AnalysisConfig::default();
        let mut budget = Budget::new(&config, &NeverCancel);
        analyze(&body, &cfg, param, &mut budget)
    }

    #[test]
    fn dereferenced_parameter_must_be_not_null() {
        // static int h(Object x) { return x.hashCode(); }
        let method = static_method(
            "(Ljava/lang/Object;)I",
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
                op(opcodes::IRETURN),
            ],
        );
        assert_eq!(run(&method, 0), Ok(EResult::Final(Value::NotNull)));
    }

    #[test]
    fn null_guarded_parameter_is_not_required() {
        // static int h(Object x) { if (x == null) return 0; return x.hashCode(); }
        let method = static_method(
            "(Ljava/lang/Object;)I",
            1,
            vec![
                load(opcodes::ALOAD, 0),
                jump(opcodes::IFNONNULL, 4),
                constant(opcodes::ICONST_0, Constant::Int(0)),
                op(opcodes::IRETURN),
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
                op(opcodes::IRETURN),
            ],
        );
        assert_eq!(run(&method, 0), Ok(EResult::Final(Value::Top)));
    }

    #[test]
    fn explicit_null_check_that_throws_requires_not_null() {
        let method = static_method(
            "(Ljava/lang/Object;)V",
            1,
            vec![
                load(opcodes::ALOAD, 0),
                jump(opcodes::IFNONNULL, 6),
                Insn::new(0, opcodes::NEW, Operand::Type("java/lang/NullPointerException".to_string())),
                op(opcodes::DUP),
                invoke(opcodes::INVOKESPECIAL, "java/lang/NullPointerException", "<init>", "()V"),
                op(opcodes::ATHROW),
                op(opcodes::RETURN),
            ],
        );
        assert_eq!(run(&method, 0), Ok(EResult::Final(Value::NotNull)));
    }

    #[test]
    fn passing_parameter_to_callee_depends_on_callee() {
        let method = static_method(
            "(Ljava/lang/Object;)V",
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKESTATIC, "Util", "check", "(Ljava/lang/Object;)V"),
                op(opcodes::RETURN),
            ],
        );
        let callee = EKey::new(
            Member::new("Util", "check", "(Ljava/lang/Object;)V"),
            Direction::In {
                param: 0,
                nullable: false,
            },
            true,
        );
        assert_eq!(run(&method, 0), Ok(EResult::pending(Value::Top, [callee])));
    }

    #[test]
    fn loops_terminate_and_keep_bottom_for_folded_paths() {
        // while (cond()) { x.hashCode(); } return;
        let method = static_method(
            "(Ljava/lang/Object;)V",
            1,
            vec![
                invoke(opcodes::INVOKESTATIC, "Util", "cond", "()Z"),
                jump(opcodes::IFEQ, 6),
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
                op(opcodes::POP),
                jump(opcodes::GOTO, 0),
                op(opcodes::RETURN),
            ],
        );
        assert_eq!(run(&method, 0), Ok(EResult::Final(Value::Top)));
    }
}
