//! Configurations, states and successor computation shared by the contract strategies.

use crate::analysis::frame::{AbstractValue, Frame, TrackedCall};
use crate::analysis::interp::{self, Domain};
use crate::analysis::key::{Direction, Member};
use crate::analysis::lattice::Value;
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::flow::ControlFlowGraph;
use crate::ir::{CallSite, Constant, Kind, Operand, ValueType};
use crate::opcodes;

/// Program point plus abstract frame.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Conf {
    pub insn: usize,
    pub frame: Frame<AbstractValue>,
}

/// One path prefix explored by a worklist strategy.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct State {
    pub conf: Conf,
    /// Generalized configurations of the loop headers passed so far.
    pub history: Vec<Conf>,
    /// Whether a branch on the hypothesis parameter was taken.
    pub taken: bool,
    /// Whether the path goes through an exception edge that may not be realizable.
    pub unsure: bool,
}

impl State {
    pub fn entry(body: &MethodBody<'_>) -> Result<Self, AnalysisAbort> {
        if body.insns.is_empty() {
            return Err(AnalysisAbort::malformed("method has no instructions"));
        }
        Ok(Self {
            conf: Conf {
                insn: 0,
                frame: Frame::entry(body)?,
            },
            history: Vec::new(),
            taken: false,
            unsure: false,
        })
    }
}

/// Value assumed for one parameter while deriving an equation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Hypothesis {
    pub param: usize,
    pub value: Value,
}

impl Hypothesis {
    /// `In` directions explore the paths where the parameter is null.
    pub fn for_direction(direction: Direction) -> Option<Self> {
        match direction {
            Direction::In { param, .. } => Some(Self {
                param,
                value: Value::Null,
            }),
            Direction::InOut { param, value } | Direction::InThrow { param, value } => {
                Some(Self { param, value })
            }
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value == Value::Null
    }
}

/// Transfer hooks tracking nullness, boolean constants and call results.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContractDomain;

impl Domain for ContractDomain {
    type Value = AbstractValue;

    fn plain(&self, kind: Kind) -> AbstractValue {
        AbstractValue::Plain(kind)
    }

    fn is_wide(&self, value: &AbstractValue) -> bool {
        value.kind().is_wide()
    }

    fn constant(&mut self, insn: usize, constant: &Constant) -> AbstractValue {
        match constant {
            Constant::Null => AbstractValue::TrackedNull(insn),
            Constant::Int(0) => AbstractValue::BoolConst(false),
            Constant::Int(1) => AbstractValue::BoolConst(true),
            Constant::String(_) | Constant::Class(_) | Constant::OtherReference => {
                AbstractValue::NotNull
            }
            other => AbstractValue::Plain(other.kind()),
        }
    }

    fn new_object(&mut self, _insn: usize, _class: &str) -> AbstractValue {
        AbstractValue::NotNull
    }

    fn new_array(&mut self, _insn: usize) -> AbstractValue {
        AbstractValue::NotNull
    }

    fn invoke(
        &mut self,
        insn: usize,
        call: &CallSite,
        receiver: Option<AbstractValue>,
        args: Vec<AbstractValue>,
    ) -> Result<Option<AbstractValue>, AnalysisAbort> {
        if !call.returns.is_trackable() {
            return Ok(call.returns.kind().map(AbstractValue::Plain));
        }
        Ok(Some(AbstractValue::Call(TrackedCall {
            callee: Member::new(&call.owner, &call.name, &call.descriptor),
            stable: call.kind.is_stable(),
            args,
            this_call: receiver == Some(AbstractValue::This),
            origin: insn,
        })))
    }

    fn invoke_dynamic(
        &mut self,
        _insn: usize,
        returns: ValueType,
        _args: Vec<AbstractValue>,
    ) -> Result<Option<AbstractValue>, AnalysisAbort> {
        // Call sites bootstrap to lambdas and concatenations that never yield null.
        Ok(match returns {
            ValueType::Reference => Some(AbstractValue::NotNull),
            other => other.kind().map(AbstractValue::Plain),
        })
    }

    fn instance_of(&mut self, _insn: usize, value: AbstractValue) -> AbstractValue {
        match value {
            AbstractValue::Param(param) => AbstractValue::InstanceOf(param),
            _ => AbstractValue::Plain(Kind::Int),
        }
    }
}

/// Executes the instruction of `state` and returns the frame after it.
pub fn execute(body: &MethodBody<'_>, state: &State) -> Result<Frame<AbstractValue>, AnalysisAbort> {
    let insn = instruction(body, state.conf.insn)?;
    let mut frame = state.conf.frame.clone();
    interp::execute(&mut ContractDomain, &mut frame, state.conf.insn, insn)?;
    Ok(frame)
}

pub fn instruction<'a>(
    body: &MethodBody<'a>,
    index: usize,
) -> Result<&'a crate::ir::Insn, AnalysisAbort> {
    body.insns
        .get(index)
        .ok_or_else(|| AnalysisAbort::malformed(format!("instruction {index} out of range")))
}

pub fn transitions<'a>(
    cfg: &'a ControlFlowGraph,
    index: usize,
) -> Result<&'a [usize], AnalysisAbort> {
    cfg.transitions
        .get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| AnalysisAbort::malformed(format!("no transitions for {index}")))
}

/// Result of successor computation for one state.
pub enum Successor {
    Next(State),
    /// The successor is a loop header already seen with an equivalent configuration.
    Folded,
}

/// Successors of `state` given the frame after its instruction.
///
/// Branches whose outcome is fixed by the hypothesis or by a tracked constant are
/// pruned. Loop headers are generalized and folded against the path history.
pub fn successors(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    state: &State,
    after: Frame<AbstractValue>,
    hypothesis: Option<Hypothesis>,
) -> Result<Vec<Successor>, AnalysisAbort> {
    let index = state.conf.insn;
    let insn = instruction(body, index)?;
    let before = &state.conf.frame;
    let mut taken = state.taken;
    let all = transitions(cfg, index)?;
    let pruned = match (before.peek(0), &insn.operand) {
        (Some(tested), Operand::Jump(target)) => {
            prune_branch(insn.opcode, tested, hypothesis).map(|(jump, on_hypothesis)| {
                taken |= on_hypothesis;
                if jump { *target } else { index + 1 }
            })
        }
        _ => None,
    };

    let dereferenced_may_be_null = interp::dereferenced(insn, &before.stack)
        .is_some_and(AbstractValue::may_be_null);
    let keep = hypothesis.map(|hypothesis| hypothesis.param);
    let mut next = Vec::new();
    for &target in all {
        let error_edge = cfg.is_error_edge(index, target);
        if let Some(chosen) = pruned {
            if target != chosen && !error_edge {
                continue;
            }
        }
        let (frame, unsure) = if error_edge {
            (
                before.exception_frame(AbstractValue::Plain(Kind::Reference)),
                state.unsure || dereferenced_may_be_null,
            )
        } else {
            (after.clone(), state.unsure)
        };
        let mut history = state.history.clone();
        let conf = if cfg.loop_enters.get(target).copied().unwrap_or(false) {
            let conf = Conf {
                insn: target,
                frame: frame.generalize(keep),
            };
            if history.contains(&conf) {
                next.push(Successor::Folded);
                continue;
            }
            history.push(conf.clone());
            conf
        } else {
            Conf {
                insn: target,
                frame,
            }
        };
        next.push(Successor::Next(State {
            conf,
            history,
            taken,
            unsure,
        }));
    }
    Ok(next)
}

/// Call site of an invoke instruction with its arguments as they sit on the stack.
pub fn call_arguments<'a>(
    insn: &'a crate::ir::Insn,
    stack: &'a [AbstractValue],
) -> Option<(&'a CallSite, &'a [AbstractValue])> {
    let Operand::Invoke(call) = &insn.operand else {
        return None;
    };
    let start = stack.len().checked_sub(call.args.len())?;
    Some((call, &stack[start..]))
}

/// Argument positions of `call` at which parameter `param` is passed.
pub fn passed_positions(args: &[AbstractValue], param: usize) -> impl Iterator<Item = usize> + '_ {
    args.iter()
        .enumerate()
        .filter(move |(_, arg)| **arg == AbstractValue::Param(param))
        .map(|(position, _)| position)
}

/// Decides a conditional branch statically: `Some((jumps, decided_by_hypothesis))`.
fn prune_branch(
    opcode: u8,
    tested: &AbstractValue,
    hypothesis: Option<Hypothesis>,
) -> Option<(bool, bool)> {
    match opcode {
        opcodes::IFNULL | opcodes::IFNONNULL => {
            let (is_null, on_hypothesis) = match tested {
                AbstractValue::Param(param) => match hypothesis {
                    Some(Hypothesis { param: hyp, value }) if hyp == *param => match value {
                        Value::Null => (true, true),
                        Value::NotNull => (false, true),
                        _ => return None,
                    },
                    _ => return None,
                },
                AbstractValue::NotNull | AbstractValue::This => (false, false),
                AbstractValue::TrackedNull(_) => (true, false),
                _ => return None,
            };
            Some((is_null == (opcode == opcodes::IFNULL), on_hypothesis))
        }
        opcodes::IFEQ | opcodes::IFNE => {
            let (is_true, on_hypothesis) = match tested {
                AbstractValue::Param(param) => match hypothesis {
                    Some(Hypothesis { param: hyp, value }) if hyp == *param => match value {
                        Value::True => (true, true),
                        Value::False => (false, true),
                        _ => return None,
                    },
                    _ => return None,
                },
                AbstractValue::InstanceOf(param) => match hypothesis {
                    Some(Hypothesis { param: hyp, value: Value::Null }) if hyp == *param => {
                        (false, true)
                    }
                    _ => return None,
                },
                AbstractValue::BoolConst(value) => (*value, false),
                _ => return None,
            };
            Some((is_true == (opcode == opcodes::IFNE), on_hypothesis))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypothesis(value: Value) -> Option<Hypothesis> {
        Some(Hypothesis { param: 0, value })
    }

    #[test]
    fn null_tests_on_the_hypothesis_parameter_are_decided() {
        let param = AbstractValue::Param(0);
        assert_eq!(
            prune_branch(opcodes::IFNULL, &param, hypothesis(Value::Null)),
            Some((true, true))
        );
        assert_eq!(
            prune_branch(opcodes::IFNONNULL, &param, hypothesis(Value::Null)),
            Some((false, true))
        );
        assert_eq!(
            prune_branch(opcodes::IFNULL, &param, hypothesis(Value::NotNull)),
            Some((false, true))
        );
        assert_eq!(prune_branch(opcodes::IFNULL, &AbstractValue::Param(1), hypothesis(Value::Null)), None);
    }

    #[test]
    fn tracked_values_decide_null_tests_without_taking() {
        assert_eq!(
            prune_branch(opcodes::IFNULL, &AbstractValue::This, None),
            Some((false, false))
        );
        assert_eq!(
            prune_branch(opcodes::IFNONNULL, &AbstractValue::TrackedNull(4), None),
            Some((false, false))
        );
    }

    #[test]
    fn boolean_tests_follow_the_hypothesis() {
        assert_eq!(
            prune_branch(opcodes::IFEQ, &AbstractValue::Param(0), hypothesis(Value::False)),
            Some((true, true))
        );
        assert_eq!(
            prune_branch(opcodes::IFNE, &AbstractValue::InstanceOf(0), hypothesis(Value::Null)),
            Some((false, true))
        );
        assert_eq!(
            prune_branch(opcodes::IFNE, &AbstractValue::BoolConst(true), None),
            Some((true, false))
        );
    }
}
