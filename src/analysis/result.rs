use std::collections::BTreeSet;

use crate::analysis::effects::{DataValue, EffectQuantum};
use crate::analysis::key::{Direction, EKey};
use crate::analysis::lattice::{ELattice, Value};

/// Conjunctive term of a pending result: `value` holds once every id is resolved.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Component {
    pub value: Value,
    pub ids: BTreeSet<EKey>,
}

impl Component {
    pub fn new(value: Value, ids: impl IntoIterator<Item = EKey>) -> Self {
        Self {
            value,
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Strikes `id` out of the component, returning whether it was present.
    pub fn remove(&mut self, id: &EKey) -> bool {
        self.ids.remove(id)
    }
}

/// Join of components still waiting on other keys.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Pending {
    pub components: Vec<Component>,
}

impl Pending {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn id_count(&self) -> usize {
        self.components
            .iter()
            .map(|component| component.ids.len())
            .sum()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EKey> {
        self.components
            .iter()
            .flat_map(|component| component.ids.iter())
    }
}

/// Purity summary: what the method returns and which effects it has.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Effects {
    pub return_value: DataValue,
    pub effects: BTreeSet<EffectQuantum>,
}

impl Effects {
    pub fn new(return_value: DataValue, effects: BTreeSet<EffectQuantum>) -> Self {
        Self {
            return_value,
            effects,
        }
    }

    pub fn pure(return_value: DataValue) -> Self {
        Self::new(return_value, BTreeSet::new())
    }

    pub fn top() -> Self {
        Self::new(DataValue::Unknown1, BTreeSet::from([EffectQuantum::Top]))
    }

    pub fn is_top(&self) -> bool {
        self.effects.contains(&EffectQuantum::Top)
    }

    pub fn join(&self, other: &Effects) -> Effects {
        let mut effects = self.effects.clone();
        effects.extend(other.effects.iter().cloned());
        Effects::new(self.return_value.join(&other.return_value), effects)
    }

    pub fn hashed(&self) -> Effects {
        Effects::new(
            self.return_value.hashed(),
            self.effects.iter().map(EffectQuantum::hashed).collect(),
        )
    }
}

/// Right-hand side of an equation.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum EResult {
    Final(Value),
    Pending(Pending),
    Effects(Effects),
}

impl EResult {
    /// Pending result depending on `ids` with tentative `value`, or the value itself
    /// when there is nothing to wait for.
    pub fn pending(value: Value, ids: impl IntoIterator<Item = EKey>) -> EResult {
        let component = Component::new(value, ids);
        if component.is_empty() {
            return EResult::Final(value);
        }
        EResult::Pending(Pending::new(vec![component]))
    }

    pub fn join(&self, other: &EResult, lattice: &ELattice) -> EResult {
        match (self, other) {
            (EResult::Final(left), EResult::Final(right)) => {
                EResult::Final(lattice.join(*left, *right))
            }
            (EResult::Final(value), EResult::Pending(pending))
            | (EResult::Pending(pending), EResult::Final(value)) => {
                if *value == lattice.bot {
                    return EResult::Pending(pending.clone());
                }
                let mut components = pending.components.clone();
                components.push(Component::new(*value, []));
                EResult::Pending(Pending::new(components))
            }
            (EResult::Pending(left), EResult::Pending(right)) => {
                let mut components = left.components.clone();
                for component in &right.components {
                    if !components.contains(component) {
                        components.push(component.clone());
                    }
                }
                EResult::Pending(Pending::new(components))
            }
            (EResult::Effects(left), EResult::Effects(right)) => {
                EResult::Effects(left.join(right))
            }
            (EResult::Effects(_), _) | (_, EResult::Effects(_)) => {
                EResult::Effects(Effects::top())
            }
        }
    }

    /// Meets every alternative of the result with the conjunction of `ids`.
    pub fn meet_ids(&self, ids: &BTreeSet<EKey>, lattice: &ELattice) -> EResult {
        if ids.is_empty() {
            return self.clone();
        }
        match self {
            EResult::Final(value) if *value == lattice.bot => self.clone(),
            EResult::Final(value) => {
                EResult::Pending(Pending::new(vec![Component::new(*value, ids.iter().cloned())]))
            }
            EResult::Pending(pending) => {
                let components = pending
                    .components
                    .iter()
                    .map(|component| {
                        let mut component = component.clone();
                        if component.value != lattice.bot {
                            component.ids.extend(ids.iter().cloned());
                        }
                        component
                    })
                    .collect();
                EResult::Pending(Pending::new(components))
            }
            EResult::Effects(_) => self.clone(),
        }
    }

    pub fn as_value(&self) -> Option<Value> {
        match self {
            EResult::Final(value) => Some(*value),
            _ => None,
        }
    }

    pub fn id_count(&self) -> usize {
        match self {
            EResult::Pending(pending) => pending.id_count(),
            _ => 0,
        }
    }

    /// Keys this result depends on.
    pub fn dependencies(&self) -> Vec<EKey> {
        match self {
            EResult::Final(_) => Vec::new(),
            EResult::Pending(pending) => pending.ids().cloned().collect(),
            EResult::Effects(effects) => {
                let mut keys: Vec<EKey> = effects
                    .effects
                    .iter()
                    .filter_map(EffectQuantum::dependency)
                    .cloned()
                    .collect();
                if let DataValue::Return(key) = &effects.return_value {
                    keys.push(key.clone());
                }
                keys
            }
        }
    }

    pub fn hashed(&self) -> EResult {
        match self {
            EResult::Final(value) => EResult::Final(*value),
            EResult::Pending(pending) => EResult::Pending(Pending::new(
                pending
                    .components
                    .iter()
                    .map(|component| {
                        Component::new(component.value, component.ids.iter().map(EKey::hashed))
                    })
                    .collect(),
            )),
            EResult::Effects(effects) => EResult::Effects(effects.hashed()),
        }
    }
}

impl From<Value> for EResult {
    fn from(value: Value) -> Self {
        EResult::Final(value)
    }
}

/// One row of the system: a key and what it resolves to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Equation {
    pub key: EKey,
    pub result: EResult,
}

impl Equation {
    pub fn new(key: EKey, result: impl Into<EResult>) -> Self {
        Self {
            key,
            result: result.into(),
        }
    }
}

impl From<Effects> for EResult {
    fn from(effects: Effects) -> Self {
        EResult::Effects(effects)
    }
}

/// Result for one direction of a member, as stored in [`Equations`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectionResultPair {
    pub direction: Direction,
    pub result: EResult,
}

/// All results known for one physical member; the cached unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Equations {
    pub results: Vec<DirectionResultPair>,
    pub stable: bool,
}

impl Equations {
    pub fn new(stable: bool) -> Self {
        Self {
            results: Vec::new(),
            stable,
        }
    }

    /// Adds a result, joining with an existing one for the same direction.
    pub fn add(&mut self, direction: Direction, result: EResult) {
        let lattice = ELattice::for_direction(direction);
        if let Some(existing) = self
            .results
            .iter_mut()
            .find(|pair| pair.direction == direction)
        {
            existing.result = existing.result.join(&result, &lattice);
            return;
        }
        self.results.push(DirectionResultPair { direction, result });
    }

    pub fn find(&self, direction: Direction) -> Option<&EResult> {
        self.results
            .iter()
            .find(|pair| pair.direction == direction)
            .map(|pair| &pair.result)
    }

    /// Merges equations produced for the same member from another origin.
    pub fn merge(&mut self, other: &Equations) {
        self.stable &= other.stable;
        for pair in &other.results {
            self.add(pair.direction, pair.result.clone());
        }
    }

    pub fn hashed(&self) -> Equations {
        Equations {
            results: self
                .results
                .iter()
                .map(|pair| DirectionResultPair {
                    direction: pair.direction,
                    result: pair.result.hashed(),
                })
                .collect(),
            stable: self.stable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::key::Member;

    fn key(name: &str) -> EKey {
        EKey::new(Member::new("A", name, "()Ljava/lang/Object;"), Direction::Out, true)
    }

    #[test]
    fn pending_without_ids_is_final() {
        assert_eq!(EResult::pending(Value::Top, []), EResult::Final(Value::Top));
    }

    #[test]
    fn join_of_final_and_pending_adds_unconditional_component() {
        let lattice = ELattice::for_direction(Direction::Out);
        let pending = EResult::pending(Value::Top, [key("a")]);
        let joined = pending.join(&EResult::Final(Value::NotNull), &lattice);
        let EResult::Pending(joined) = joined else {
            panic!("expected pending result");
        };
        assert_eq!(joined.components.len(), 2);
        assert!(joined.components[1].is_empty());
    }

    #[test]
    fn join_with_bottom_keeps_pending() {
        let lattice = ELattice::for_direction(Direction::Out);
        let pending = EResult::pending(Value::Top, [key("a")]);
        assert_eq!(pending.join(&EResult::Final(Value::Bot), &lattice), pending);
    }

    #[test]
    fn meet_ids_extends_every_component() {
        let lattice = ELattice::for_direction(Direction::In {
            param: 0,
            nullable: false,
        });
        let ids = BTreeSet::from([key("b")]);
        let result = EResult::pending(Value::Top, [key("a")]).meet_ids(&ids, &lattice);
        let EResult::Pending(pending) = result else {
            panic!("expected pending result");
        };
        assert_eq!(pending.id_count(), 2);
        assert_eq!(
            EResult::Final(Value::NotNull).meet_ids(&ids, &lattice),
            EResult::Final(Value::NotNull)
        );
    }

    #[test]
    fn equations_join_results_for_same_direction() {
        let mut equations = Equations::new(true);
        equations.add(Direction::Out, EResult::Final(Value::NotNull));
        equations.add(Direction::Out, EResult::Final(Value::Null));
        assert_eq!(
            equations.find(Direction::Out),
            Some(&EResult::Final(Value::Top))
        );
        let mut other = Equations::new(false);
        other.add(Direction::Throw, EResult::Final(Value::Fail));
        equations.merge(&other);
        assert!(!equations.stable);
        assert_eq!(equations.results.len(), 2);
    }
}
