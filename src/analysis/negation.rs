use crate::analysis::budget::Budget;
use crate::analysis::contracts::call_key;
use crate::analysis::frame::{AbstractValue, TrackedCall};
use crate::analysis::key::Direction;
use crate::analysis::lattice::Value;
use crate::analysis::result::EResult;
use crate::analysis::worklist::{self, Conf, State};
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::flow::ControlFlowGraph;
use crate::ir::{Constant, Operand};
use crate::opcodes;

fn violated(message: &str) -> AnalysisAbort {
    AnalysisAbort::AssumptionViolated(message.to_string())
}

/// Recognizes boolean methods of the shape `return call(..) ? c : !c` and expresses
/// their `Out` and `InOut` directions through the tested call's keys.
pub fn analyze(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    directions: &[Direction],
    budget: &mut Budget<'_>,
) -> Result<Vec<(Direction, EResult)>, AnalysisAbort> {
    if !body.returns_boolean() {
        return Err(violated("method does not return boolean"));
    }
    let (call, jumps_when_false, index) = tested_call(body, cfg, budget)?;
    let Some(&target) = worklist::transitions(cfg, index)?.get(1) else {
        return Err(violated("conditional without a jump target"));
    };
    let (when_true, when_false) = if jumps_when_false {
        (index + 1, target)
    } else {
        (target, index + 1)
    };
    let returned_when_true = returned_constant(body, when_true)?;
    if returned_constant(body, when_false)? == returned_when_true {
        return Err(violated("both branches return the same constant"));
    }
    let negated = !returned_when_true;

    let mut results = Vec::new();
    for &direction in directions {
        let callee_direction = match direction {
            Direction::Out => Direction::Out,
            Direction::InOut { param, value } => match call.arg_position(param) {
                Some(position) => Direction::InOut {
                    param: position,
                    value,
                },
                None => Direction::Out,
            },
            _ => continue,
        };
        let mut key = call_key(&call, callee_direction);
        if negated {
            key = key.negate();
        }
        results.push((direction, EResult::pending(Value::Top, [key])));
    }
    Ok(results)
}

/// Runs straight-line code up to the first conditional, which must test a call result.
fn tested_call(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    budget: &mut Budget<'_>,
) -> Result<(TrackedCall, bool, usize), AnalysisAbort> {
    let mut state = State::entry(body)?;
    loop {
        budget.step()?;
        let index = state.conf.insn;
        let insn = worklist::instruction(body, index)?;
        if insn.opcode == opcodes::IFEQ || insn.opcode == opcodes::IFNE {
            let Some(AbstractValue::Call(call)) = state.conf.frame.peek(0) else {
                return Err(violated("condition is not a call result"));
            };
            return Ok((call.clone(), insn.opcode == opcodes::IFEQ, index));
        }
        let &[next] = worklist::transitions(cfg, index)? else {
            return Err(violated("branching before the tested call"));
        };
        if cfg.is_error_edge(index, next) {
            return Err(violated("branching before the tested call"));
        }
        let frame = worklist::execute(body, &state)?;
        state.conf = Conf { insn: next, frame };
    }
}

/// Constant returned by an `iconst; ireturn` pair starting at `index`.
fn returned_constant(body: &MethodBody<'_>, index: usize) -> Result<bool, AnalysisAbort> {
    let constant = worklist::instruction(body, index)?;
    let ret = worklist::instruction(body, index + 1)?;
    if ret.opcode != opcodes::IRETURN {
        return Err(violated("branch does not return immediately"));
    }
    match constant.operand {
        Operand::Constant(Constant::Int(0)) => Ok(false),
        Operand::Constant(Constant::Int(1)) => Ok(true),
        _ => Err(violated("branch does not return a boolean constant")),
    }
}
