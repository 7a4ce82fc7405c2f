//! Equation generation and solving for bytecode contract inference.

pub mod budget;
pub mod cache;
pub mod codec;
pub mod combined;
pub mod contracts;
pub mod effects;
pub mod frame;
pub mod interp;
pub mod key;
pub mod knowledge;
pub mod lattice;
pub mod negation;
pub mod nonnull_in;
pub mod purity;
pub mod result;
pub mod solver;
pub mod worklist;

use thiserror::Error;

use crate::descriptor::method_types;
use crate::ir::{Insn, Method, ValueType};
use key::Member;

pub use budget::{AnalysisConfig, Budget, Cancellation, CancellationToken, NeverCancel};
pub use effects::{DataValue, EffectQuantum};
pub use key::{Direction, EKey, HMember, MemberDescriptor};
pub use lattice::{ELattice, Value};
pub use result::{Component, EResult, Effects, Equation, Equations, Pending};

/// Reason an equation (or a whole solve request) was given up.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AnalysisAbort {
    #[error("step budget exceeded")]
    StepBudget,
    #[error("pending result too large")]
    SizeBudget,
    #[error("too many keys in solve request")]
    KeyBudget,
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("assumption violated: {0}")]
    AssumptionViolated(String),
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisAbort {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        AnalysisAbort::MalformedInput(message.into())
    }
}

/// Instructions and signature facts of one method, as consumed by the strategies.
#[derive(Clone, Debug)]
pub struct MethodBody<'a> {
    pub member: Member,
    pub insns: &'a [Insn],
    pub max_locals: usize,
    pub is_static: bool,
    pub is_constructor: bool,
    pub params: Vec<ValueType>,
    pub returns: ValueType,
}

impl<'a> MethodBody<'a> {
    pub fn new(owner: &str, method: &'a Method) -> Result<Self, AnalysisAbort> {
        let (params, returns) = method_types(&method.descriptor)
            .map_err(|err| AnalysisAbort::malformed(format!("{err:#}")))?;
        Ok(Self {
            member: Member::new(owner, method.name.clone(), method.descriptor.clone()),
            insns: &method.insns,
            max_locals: method.max_locals as usize,
            is_static: method.access.is_static,
            is_constructor: method.is_constructor(),
            params,
            returns,
        })
    }

    /// Local slot holding parameter `param` on entry.
    pub fn param_slot(&self, param: usize) -> usize {
        let receiver = usize::from(!self.is_static);
        receiver
            + self.params[..param]
                .iter()
                .map(|ty| if ty.kind().is_some_and(|kind| kind.is_wide()) { 2 } else { 1 })
                .sum::<usize>()
    }

    pub fn returns_boolean(&self) -> bool {
        self.returns == ValueType::Boolean
    }
}
