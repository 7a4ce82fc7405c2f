//! Bounded worklist derivation of return, failure and nullable-parameter contracts.

use std::collections::{BTreeSet, HashSet};

use crate::analysis::budget::Budget;
use crate::analysis::frame::{AbstractValue, TrackedCall};
use crate::analysis::interp;
use crate::analysis::key::{Direction, EKey, Member};
use crate::analysis::lattice::{ELattice, Value};
use crate::analysis::result::{Component, EResult, Pending};
use crate::analysis::worklist::{self, Conf, Hypothesis, State, Successor};
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::flow::ControlFlowGraph;
use crate::ir::Kind;
use crate::opcodes;

/// Derives the equation right-hand side for `direction` by exploring paths.
///
/// Handles `Out`, `NullableOut`, `Throw`, `InOut`, `InThrow` and nullable `In`;
/// not-null `In` is derived by [`crate::analysis::nonnull_in`].
pub fn analyze(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    direction: Direction,
    budget: &mut Budget<'_>,
) -> Result<EResult, AnalysisAbort> {
    match direction {
        Direction::In {
            param,
            nullable: true,
        } => nullable_in(body, cfg, param, budget),
        Direction::Out
        | Direction::NullableOut
        | Direction::Throw
        | Direction::InOut { .. }
        | Direction::InThrow { .. } => derive(body, cfg, direction, budget),
        other => Err(AnalysisAbort::AssumptionViolated(format!(
            "{other} is not derived by path exploration"
        ))),
    }
}

fn derive(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    direction: Direction,
    budget: &mut Budget<'_>,
) -> Result<EResult, AnalysisAbort> {
    let lattice = ELattice::for_direction(direction);
    let hypothesis = Hypothesis::for_direction(direction);
    let mut result = EResult::Final(lattice.bot);
    let mut sure = false;
    let mut seen = HashSet::new();
    let mut pending = vec![State::entry(body)?];

    while let Some(state) = pending.pop() {
        budget.step()?;
        if !seen.insert(state.clone()) {
            continue;
        }
        let index = state.conf.insn;
        let insn = worklist::instruction(body, index)?;
        let frame = &state.conf.frame;

        let path = match hypothesis {
            Some(hypothesis)
                if hypothesis.is_null()
                    && interp::dereferenced(insn, &frame.stack)
                        == Some(&AbstractValue::Param(hypothesis.param)) =>
            {
                if let Some(&handler) = cfg.npe_targets.get(&index) {
                    pending.push(State {
                        conf: Conf {
                            insn: handler,
                            frame: frame.exception_frame(AbstractValue::Plain(Kind::Reference)),
                        },
                        history: state.history.clone(),
                        taken: true,
                        unsure: state.unsure,
                    });
                    continue;
                }
                Some(match direction {
                    Direction::InThrow { .. } => EResult::Final(Value::Fail),
                    _ => EResult::Final(lattice.bot),
                })
            }
            _ if opcodes::is_return(insn.opcode) => {
                Some(return_result(body, direction, hypothesis, frame.peek(0)))
            }
            _ if insn.opcode == opcodes::ATHROW => Some(EResult::Final(match direction {
                Direction::Throw => Value::Fail,
                Direction::InThrow { .. } if state.taken => Value::Fail,
                _ => lattice.bot,
            })),
            _ => None,
        };

        let Some(path) = path else {
            let after = worklist::execute(body, &state)?;
            for successor in worklist::successors(body, cfg, &state, after, hypothesis)? {
                if let Successor::Next(next) = successor {
                    pending.push(next);
                }
            }
            continue;
        };
        sure |= !state.unsure;
        result = result.join(&path, &lattice);
        budget.check_size(result.id_count())?;
        if !state.unsure && result == EResult::Final(lattice.top) {
            return Ok(result);
        }
    }

    if !sure {
        return Ok(EResult::Final(lattice.bot));
    }
    Ok(result)
}

/// Contribution of a path ending in a return instruction.
pub(crate) fn return_result(
    body: &MethodBody<'_>,
    direction: Direction,
    hypothesis: Option<Hypothesis>,
    returned: Option<&AbstractValue>,
) -> EResult {
    match direction {
        Direction::Throw | Direction::InThrow { .. } => EResult::Final(Value::Top),
        Direction::NullableOut => match returned {
            Some(AbstractValue::TrackedNull(_)) => EResult::Final(Value::Null),
            Some(AbstractValue::Call(call)) => {
                EResult::pending(Value::Null, [call_key(call, Direction::NullableOut)])
            }
            _ => EResult::Final(Value::Bot),
        },
        _ => {
            let Some(returned) = returned else {
                return EResult::Final(Value::Top);
            };
            let value = match returned {
                AbstractValue::This | AbstractValue::NotNull => Value::NotNull,
                AbstractValue::TrackedNull(_) => Value::Null,
                AbstractValue::BoolConst(true) if body.returns_boolean() => Value::True,
                AbstractValue::BoolConst(false) if body.returns_boolean() => Value::False,
                AbstractValue::Param(param) => match hypothesis {
                    Some(hypothesis) if hypothesis.param == *param => hypothesis.value,
                    _ => Value::Top,
                },
                AbstractValue::InstanceOf(param) => match hypothesis {
                    Some(hypothesis) if hypothesis.param == *param && hypothesis.is_null() => {
                        Value::False
                    }
                    _ => Value::Top,
                },
                AbstractValue::Call(call) => {
                    let callee_direction = hypothesis
                        .and_then(|hypothesis| {
                            call.arg_position(hypothesis.param).map(|param| Direction::InOut {
                                param,
                                value: hypothesis.value,
                            })
                        })
                        .unwrap_or(Direction::Out);
                    return EResult::pending(Value::Top, [call_key(call, callee_direction)]);
                }
                _ => Value::Top,
            };
            EResult::Final(value)
        }
    }
}

pub(crate) fn call_key(call: &TrackedCall, direction: Direction) -> EKey {
    EKey::new(call.callee.clone(), direction, call.stable)
}

/// Nullable parameter: safe unless some path dereferences or leaks it.
fn nullable_in(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    param: usize,
    budget: &mut Budget<'_>,
) -> Result<EResult, AnalysisAbort> {
    let hypothesis = Some(Hypothesis {
        param,
        value: Value::Null,
    });
    let tracked = AbstractValue::Param(param);
    let mut calls = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut pending = vec![State::entry(body)?];

    while let Some(state) = pending.pop() {
        budget.step()?;
        if !seen.insert(state.clone()) {
            continue;
        }
        let insn = worklist::instruction(body, state.conf.insn)?;
        let stack = &state.conf.frame.stack;
        if interp::dereferenced(insn, stack) == Some(&tracked)
            || interp::stored(insn, stack) == Some(&tracked)
        {
            return Ok(EResult::Final(Value::Top));
        }
        if opcodes::is_return(insn.opcode) || insn.opcode == opcodes::ATHROW {
            continue;
        }
        if let Some((call, args)) = worklist::call_arguments(insn, stack) {
            for position in worklist::passed_positions(args, param) {
                calls.insert(EKey::new(
                    Member::new(&call.owner, &call.name, &call.descriptor),
                    Direction::In {
                        param: position,
                        nullable: true,
                    },
                    call.kind.is_stable(),
                ));
            }
            budget.check_size(calls.len())?;
        }
        let after = worklist::execute(body, &state)?;
        for successor in worklist::successors(body, cfg, &state, after, hypothesis)? {
            if let Successor::Next(next) = successor {
                pending.push(next);
            }
        }
    }

    Ok(nullable_result(calls))
}

/// Null is safe only if every callee accepts it: one component per callee.
pub(crate) fn nullable_result(calls: BTreeSet<EKey>) -> EResult {
    if calls.is_empty() {
        return EResult::Final(Value::Null);
    }
    EResult::Pending(Pending::new(
        calls
            .into_iter()
            .map(|key| Component::new(Value::Top, [key]))
            .collect(),
    ))
}
