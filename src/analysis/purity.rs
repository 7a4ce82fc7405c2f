//! Purity inference: a dataflow fixpoint tracking where references come from and
//! which instructions have observable effects.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::budget::Budget;
use crate::analysis::effects::{DataValue, EffectQuantum};
use crate::analysis::frame::Frame;
use crate::analysis::interp::{self, Domain};
use crate::analysis::key::{Direction, EKey, Member};
use crate::analysis::knowledge;
use crate::analysis::result::Effects;
use crate::analysis::worklist;
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::flow::ControlFlowGraph;
use crate::ir::{CallSite, FieldRef, Kind, ValueType};
use crate::opcodes;

struct PurityDomain {
    in_constructor: bool,
    /// At most one effect per instruction; re-execution replaces it.
    effects: BTreeMap<usize, EffectQuantum>,
}

impl PurityDomain {
    fn record(&mut self, insn: usize, effect: Option<EffectQuantum>) {
        let effect = match effect {
            Some(EffectQuantum::ThisChange) if self.in_constructor => None,
            other => other,
        };
        match effect {
            Some(effect) => {
                self.effects.insert(insn, effect);
            }
            None => {
                self.effects.remove(&insn);
            }
        }
    }
}

fn unknown(kind: Kind) -> DataValue {
    if kind.is_wide() {
        DataValue::Unknown2
    } else {
        DataValue::Unknown1
    }
}

impl Domain for PurityDomain {
    type Value = DataValue;

    fn plain(&self, kind: Kind) -> DataValue {
        unknown(kind)
    }

    fn is_wide(&self, value: &DataValue) -> bool {
        matches!(value, DataValue::Unknown2)
    }

    fn new_object(&mut self, _insn: usize, _class: &str) -> DataValue {
        DataValue::Local
    }

    fn new_array(&mut self, _insn: usize) -> DataValue {
        DataValue::Local
    }

    fn get_field(
        &mut self,
        insn: usize,
        field: &FieldRef,
        receiver: Option<DataValue>,
    ) -> Result<DataValue, AnalysisAbort> {
        let key = EKey::new(
            Member::new(&field.owner, &field.name, &field.descriptor),
            Direction::Volatile,
            true,
        );
        self.record(insn, Some(EffectQuantum::FieldRead(key)));
        if field.kind != Kind::Reference {
            return Ok(unknown(field.kind));
        }
        Ok(match receiver {
            Some(DataValue::This | DataValue::Owned) => DataValue::Owned,
            Some(DataValue::Local) => DataValue::Local,
            _ => DataValue::Unknown1,
        })
    }

    fn put_field(
        &mut self,
        insn: usize,
        _field: &FieldRef,
        receiver: Option<DataValue>,
        _value: DataValue,
    ) -> Result<(), AnalysisAbort> {
        let effect = match receiver {
            Some(receiver) => receiver.change_effect(),
            None => Some(EffectQuantum::Top),
        };
        self.record(insn, effect);
        Ok(())
    }

    fn invoke(
        &mut self,
        insn: usize,
        call: &CallSite,
        receiver: Option<DataValue>,
        args: Vec<DataValue>,
    ) -> Result<Option<DataValue>, AnalysisAbort> {
        let callee = Member::new(&call.owner, &call.name, &call.descriptor);
        let returned = |key: Option<&EKey>| match (call.returns, key) {
            (ValueType::Void, _) => None,
            (ValueType::Reference, Some(key)) => Some(DataValue::Return(key.clone())),
            (other, _) => other.kind().map(unknown),
        };
        if knowledge::is_pure(&callee) {
            self.record(insn, None);
            return Ok(returned(None));
        }
        let key = EKey::new(callee, Direction::Pure, call.kind.is_stable());
        let value = returned(Some(&key));
        let is_static = receiver.is_none();
        let data = receiver.into_iter().chain(args).collect();
        self.record(
            insn,
            Some(EffectQuantum::Call {
                key,
                data,
                is_static,
            }),
        );
        Ok(value)
    }

    fn invoke_dynamic(
        &mut self,
        insn: usize,
        returns: ValueType,
        _args: Vec<DataValue>,
    ) -> Result<Option<DataValue>, AnalysisAbort> {
        self.record(insn, Some(EffectQuantum::Top));
        Ok(returns.kind().map(unknown))
    }

    fn array_store(&mut self, insn: usize, array: DataValue, _value: DataValue) {
        self.record(insn, array.change_effect());
    }

    fn monitor(&mut self, insn: usize, _value: DataValue) {
        self.record(insn, Some(EffectQuantum::Top));
    }
}

fn entry_frame(body: &MethodBody<'_>) -> Result<Frame<DataValue>, AnalysisAbort> {
    let mut locals = Vec::with_capacity(body.max_locals);
    if !body.is_static {
        locals.push(DataValue::This);
    }
    for (param, ty) in body.params.iter().enumerate() {
        match ty.kind() {
            Some(Kind::Reference) => locals.push(DataValue::Param(param)),
            Some(kind) if kind.is_wide() => {
                locals.push(DataValue::Unknown2);
                locals.push(DataValue::Unknown1);
            }
            _ => locals.push(DataValue::Unknown1),
        }
    }
    if locals.len() > body.max_locals {
        return Err(AnalysisAbort::malformed("parameters exceed max_locals"));
    }
    locals.resize(body.max_locals, DataValue::Unknown1);
    Ok(Frame::new(locals))
}

/// Derives the `Pure` equation of a method, or `None` when the method has an
/// unconditional effect and returns nothing trackable.
pub fn analyze(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    budget: &mut Budget<'_>,
) -> Result<Option<Effects>, AnalysisAbort> {
    let count = body.insns.len();
    if count == 0 {
        return Err(AnalysisAbort::malformed("method has no instructions"));
    }
    let mut domain = PurityDomain {
        in_constructor: body.is_constructor,
        effects: BTreeMap::new(),
    };
    let mut frames: Vec<Option<Frame<DataValue>>> = vec![None; count];
    frames[0] = Some(entry_frame(body)?);
    let mut queue = vec![0usize];
    let mut returned: Option<DataValue> = None;

    while let Some(index) = queue.pop() {
        budget.step()?;
        let Some(frame) = frames.get(index).cloned().flatten() else {
            continue;
        };
        let insn = worklist::instruction(body, index)?;
        if insn.opcode == opcodes::ARETURN {
            let value = frame.peek(0).cloned().unwrap_or(DataValue::Unknown1);
            returned = Some(match returned {
                Some(previous) => previous.join(&value),
                None => value,
            });
        }
        let mut after = frame.clone();
        interp::execute(&mut domain, &mut after, index, insn)?;
        for &target in worklist::transitions(cfg, index)? {
            let incoming = if cfg.is_error_edge(index, target) {
                frame.exception_frame(DataValue::Unknown1)
            } else {
                after.clone()
            };
            let slot = frames.get_mut(target).ok_or_else(|| {
                AnalysisAbort::malformed(format!("{index} transfers control to {target} outside the method"))
            })?;
            let merged = match slot.as_ref() {
                Some(existing) => existing.merge(&incoming)?,
                None => incoming,
            };
            if slot.as_ref() != Some(&merged) {
                *slot = Some(merged);
                queue.push(target);
            }
        }
    }

    let return_value = match body.returns {
        ValueType::Reference => returned.unwrap_or(DataValue::Unknown1),
        _ => DataValue::Unknown1,
    };
    let mut effects: BTreeSet<EffectQuantum> = domain.effects.into_values().collect();
    if effects.contains(&EffectQuantum::Top) {
        if return_value.is_unknown() {
            return Ok(None);
        }
        effects = BTreeSet::from([EffectQuantum::Top]);
    }
    Ok(Some(Effects::new(return_value, effects)))
}
