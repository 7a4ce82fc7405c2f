use crate::analysis::effects::DataValue;
use crate::analysis::key::Member;
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::ir::{Kind, ValueType};

/// Result of a call whose callee summary may decide what the method returns.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TrackedCall {
    pub callee: Member,
    pub stable: bool,
    /// Arguments without the receiver.
    pub args: Vec<AbstractValue>,
    /// Whether the receiver is `this`.
    pub this_call: bool,
    pub origin: usize,
}

impl TrackedCall {
    /// First argument position holding parameter `param`.
    pub fn arg_position(&self, param: usize) -> Option<usize> {
        self.args
            .iter()
            .position(|arg| *arg == AbstractValue::Param(param))
    }
}

/// Symbolic value held in a frame slot by the contract interpreters.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AbstractValue {
    Plain(Kind),
    This,
    Param(usize),
    NotNull,
    /// `null` pushed at the given instruction.
    TrackedNull(usize),
    BoolConst(bool),
    Call(TrackedCall),
    /// Result of `param instanceof T`.
    InstanceOf(usize),
}

impl AbstractValue {
    pub fn kind(&self) -> Kind {
        match self {
            AbstractValue::Plain(kind) => *kind,
            AbstractValue::BoolConst(_) | AbstractValue::InstanceOf(_) => Kind::Int,
            AbstractValue::Call(_) | AbstractValue::Param(_) => Kind::Reference,
            AbstractValue::This | AbstractValue::NotNull | AbstractValue::TrackedNull(_) => {
                Kind::Reference
            }
        }
    }

    /// Whether dereferencing the value may fail depending on inputs.
    pub fn may_be_null(&self) -> bool {
        matches!(
            self,
            AbstractValue::Param(_) | AbstractValue::Call(_) | AbstractValue::TrackedNull(_)
        )
    }
}

/// Boolean parameters are tracked as ints; their kind follows the declared type.
pub(crate) fn param_value(param: usize, ty: ValueType) -> AbstractValue {
    match ty {
        ValueType::Reference | ValueType::Boolean => AbstractValue::Param(param),
        other => AbstractValue::Plain(other.kind().unwrap_or(Kind::Undefined)),
    }
}

/// Local variables and operand stack, one entry per value.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame<V> {
    pub locals: Vec<V>,
    pub stack: Vec<V>,
}

impl<V: Clone> Frame<V> {
    pub fn new(locals: Vec<V>) -> Self {
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    pub fn push(&mut self, value: V) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<V, AnalysisAbort> {
        self.stack
            .pop()
            .ok_or_else(|| AnalysisAbort::malformed("operand stack underflow"))
    }

    /// Pops `count` values, returning them in push order.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<V>, AnalysisAbort> {
        if self.stack.len() < count {
            return Err(AnalysisAbort::malformed("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Value `depth` entries below the top.
    pub fn peek(&self, depth: usize) -> Option<&V> {
        self.stack.len().checked_sub(depth + 1).map(|index| &self.stack[index])
    }

    pub fn local(&self, slot: usize) -> Result<&V, AnalysisAbort> {
        self.locals
            .get(slot)
            .ok_or_else(|| AnalysisAbort::malformed(format!("local {slot} out of range")))
    }

    pub fn set_local(&mut self, slot: usize, value: V) -> Result<(), AnalysisAbort> {
        let target = self
            .locals
            .get_mut(slot)
            .ok_or_else(|| AnalysisAbort::malformed(format!("local {slot} out of range")))?;
        *target = value;
        Ok(())
    }

    /// Frame seen by an exception handler: same locals, only the thrown value on the stack.
    pub fn exception_frame(&self, thrown: V) -> Frame<V> {
        Frame {
            locals: self.locals.clone(),
            stack: vec![thrown],
        }
    }
}

impl Frame<AbstractValue> {
    /// Entry frame: `this`, then parameters, then unset locals.
    pub fn entry(body: &MethodBody<'_>) -> Result<Self, AnalysisAbort> {
        let mut locals = Vec::with_capacity(body.max_locals);
        if !body.is_static {
            locals.push(AbstractValue::This);
        }
        for (param, ty) in body.params.iter().enumerate() {
            locals.push(param_value(param, *ty));
            if ty.kind().is_some_and(Kind::is_wide) {
                locals.push(AbstractValue::Plain(Kind::Undefined));
            }
        }
        if locals.len() > body.max_locals {
            return Err(AnalysisAbort::malformed("parameters exceed max_locals"));
        }
        locals.resize(body.max_locals, AbstractValue::Plain(Kind::Undefined));
        Ok(Frame::new(locals))
    }

    /// Widens every value to its plain kind except parameter `keep`.
    pub fn generalize(&self, keep: Option<usize>) -> Self {
        let widen = |value: &AbstractValue| match value {
            AbstractValue::Param(param) if Some(*param) == keep => value.clone(),
            AbstractValue::Plain(_) => value.clone(),
            other => AbstractValue::Plain(other.kind()),
        };
        Frame {
            locals: self.locals.iter().map(widen).collect(),
            stack: self.stack.iter().map(widen).collect(),
        }
    }
}

/// Slot values that can be merged where control flow joins.
pub trait Merge {
    fn merge(&self, other: &Self) -> Self;
}

impl Merge for AbstractValue {
    /// Keeps identical values, otherwise degrades to the common kind.
    fn merge(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        let (left, right) = (self.kind(), other.kind());
        AbstractValue::Plain(if left == right { left } else { Kind::Undefined })
    }
}

impl Merge for DataValue {
    fn merge(&self, other: &Self) -> Self {
        self.join(other)
    }
}

impl<V: Merge> Frame<V> {
    /// Slot-wise merge of two frames of the same shape.
    pub fn merge(&self, other: &Self) -> Result<Self, AnalysisAbort> {
        if self.stack.len() != other.stack.len() || self.locals.len() != other.locals.len() {
            return Err(AnalysisAbort::malformed("frame shapes differ at merge point"));
        }
        let merge_all = |left: &[V], right: &[V]| -> Vec<V> {
            left.iter()
                .zip(right)
                .map(|(left, right)| left.merge(right))
                .collect()
        };
        Ok(Frame {
            locals: merge_all(&self.locals, &other.locals),
            stack: merge_all(&self.stack, &other.stack),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(origin: usize) -> AbstractValue {
        AbstractValue::Call(TrackedCall {
            callee: Member::new("A", "f", "()Ljava/lang/Object;"),
            stable: false,
            args: vec![AbstractValue::Param(0)],
            this_call: false,
            origin,
        })
    }

    #[test]
    fn merge_keeps_identical_values_only() {
        assert_eq!(call(3).merge(&call(3)), call(3));
        assert_eq!(
            call(3).merge(&AbstractValue::NotNull),
            AbstractValue::Plain(Kind::Reference)
        );
        assert_eq!(
            AbstractValue::BoolConst(true).merge(&AbstractValue::NotNull),
            AbstractValue::Plain(Kind::Undefined)
        );
    }

    #[test]
    fn generalization_keeps_only_the_hypothesis_parameter() {
        let frame = Frame {
            locals: vec![AbstractValue::This, AbstractValue::Param(0), AbstractValue::Param(1)],
            stack: vec![call(1), AbstractValue::BoolConst(false)],
        };
        let generalized = frame.generalize(Some(1));
        assert_eq!(
            generalized.locals,
            vec![
                AbstractValue::Plain(Kind::Reference),
                AbstractValue::Plain(Kind::Reference),
                AbstractValue::Param(1),
            ]
        );
        assert_eq!(
            generalized.stack,
            vec![AbstractValue::Plain(Kind::Reference), AbstractValue::Plain(Kind::Int)]
        );
        assert_eq!(generalized.generalize(Some(1)), generalized);
    }

    #[test]
    fn pop_n_returns_values_in_push_order() {
        let mut frame = Frame::new(Vec::<AbstractValue>::new());
        frame.push(AbstractValue::Param(0));
        frame.push(AbstractValue::NotNull);
        assert_eq!(
            frame.pop_n(2).expect("two values"),
            vec![AbstractValue::Param(0), AbstractValue::NotNull]
        );
        assert!(frame.pop().is_err());
    }
}
