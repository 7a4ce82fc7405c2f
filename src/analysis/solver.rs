//! Global fixpoint over the generated equations.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::analysis::effects::{DataValue, EffectQuantum};
use crate::analysis::key::EKey;
use crate::analysis::knowledge;
use crate::analysis::lattice::{ELattice, Value};
use crate::analysis::result::{EResult, Effects, Equation, Pending};

/// Key identity the solver merges on: stability is tracked separately.
fn normalized(key: &EKey) -> EKey {
    key.mk_stable()
}

/// Solver for one lattice family.
pub struct Solver {
    lattice: ELattice,
    unstable_value: Value,
    /// Merged right-hand side and AND-ed stability per normalized key.
    equations: BTreeMap<EKey, (EResult, bool)>,
}

impl Solver {
    pub fn new(lattice: ELattice, unstable_value: Value) -> Self {
        Self {
            lattice,
            unstable_value,
            equations: BTreeMap::new(),
        }
    }

    pub fn add_equation(&mut self, equation: Equation) {
        let key = normalized(&equation.key);
        match self.equations.get_mut(&key) {
            Some((result, stable)) => {
                *result = result.join(&equation.result, &self.lattice);
                *stable &= equation.key.stable;
            }
            None => {
                self.equations
                    .insert(key, (equation.result, equation.key.stable));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    /// Resolves every equation; keys left unresolved get the unstable value.
    pub fn solve(&self) -> BTreeMap<EKey, Value> {
        let mut solved: BTreeMap<EKey, Value> = BTreeMap::new();
        let mut moving: VecDeque<(EKey, Value)> = VecDeque::new();
        let mut pending: HashMap<EKey, Pending> = HashMap::new();
        let mut dependents: HashMap<EKey, BTreeSet<EKey>> = HashMap::new();
        let mut mentioned: BTreeSet<EKey> = BTreeSet::new();

        for (key, (result, stable)) in &self.equations {
            let key = if *stable {
                key.clone()
            } else {
                key.mk_unstable()
            };
            mentioned.insert(key.clone());
            match result {
                EResult::Final(value) => moving.push_back((key, *value)),
                EResult::Pending(components) => match self.normalize(components) {
                    Some(value) => moving.push_back((key, value)),
                    None => {
                        for id in components.ids() {
                            mentioned.insert(id.clone());
                            dependents.entry(id.clone()).or_default().insert(key.clone());
                        }
                        pending.insert(key, components.clone());
                    }
                },
                EResult::Effects(_) => {
                    debug!("solver: ignoring purity equation for {key}");
                }
            }
        }

        while let Some((key, value)) = moving.pop_front() {
            if solved.contains_key(&key) {
                continue;
            }
            for (id, id_value) in self.fan_out(&key, value) {
                if id != key && solved.contains_key(&id) {
                    continue;
                }
                solved.insert(id.clone(), id_value);
                let Some(waiting) = dependents.remove(&id) else {
                    continue;
                };
                for dependent in waiting {
                    let Some(components) = pending.get_mut(&dependent) else {
                        continue;
                    };
                    for component in &mut components.components {
                        if component.remove(&id) {
                            component.value = self.lattice.meet(component.value, id_value);
                        }
                    }
                    if let Some(resolved) = self.normalize(components) {
                        pending.remove(&dependent);
                        moving.push_back((dependent, resolved));
                    }
                }
            }
        }

        for key in mentioned {
            solved.entry(key).or_insert(self.unstable_value);
        }
        solved
    }

    /// The solved key, its stability flip and the negations of both.
    /// Negation leaves non-boolean values unchanged.
    fn fan_out(&self, key: &EKey, value: Value) -> [(EKey, Value); 4] {
        let flip = key.invert_stability();
        let flip_value = if flip.stable {
            value
        } else {
            self.unstable_value
        };
        [
            (key.clone(), value),
            (flip.clone(), flip_value),
            (key.negate(), value.negate()),
            (flip.negate(), flip_value.negate()),
        ]
    }

    /// Collapses a pending result whose outcome no longer depends on open ids.
    fn normalize(&self, pending: &Pending) -> Option<Value> {
        let mut acc = self.lattice.bot;
        let mut resolved = true;
        for component in &pending.components {
            if component.is_empty() || component.value == self.lattice.bot {
                acc = self.lattice.join(acc, component.value);
            } else {
                resolved = false;
            }
        }
        (resolved || acc == self.lattice.top).then_some(acc)
    }
}

/// Solver for purity equations: substitutes callee effects by reachable closure.
#[derive(Default)]
pub struct PuritySolver {
    equations: BTreeMap<EKey, Effects>,
    /// Results of `Volatile` field keys.
    fields: BTreeMap<EKey, Value>,
}

impl PuritySolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_equation(&mut self, key: &EKey, effects: Effects) {
        let key = normalized(key);
        match self.equations.get_mut(&key) {
            Some(existing) => *existing = existing.join(&effects),
            None => {
                self.equations.insert(key, effects);
            }
        }
    }

    pub fn add_field(&mut self, key: &EKey, value: Value) {
        self.fields.insert(normalized(key), value);
    }

    /// Fully substituted effects of `key`: only `Top`, `ThisChange` and `ParamChange` remain.
    pub fn solve(&self, key: &EKey) -> Effects {
        let mut memo = HashMap::new();
        let mut in_progress = HashSet::new();
        self.resolve(key, &mut memo, &mut in_progress).0
    }

    /// Returns the effects and whether a cycle was cut while computing them.
    fn resolve(
        &self,
        key: &EKey,
        memo: &mut HashMap<EKey, Effects>,
        in_progress: &mut HashSet<EKey>,
    ) -> (Effects, bool) {
        let key = normalized(key);
        if let Some(done) = memo.get(&key) {
            return (done.clone(), false);
        }
        if in_progress.contains(&key) {
            return (Effects::pure(DataValue::Unknown1), true);
        }
        let Some(own) = self.equations.get(&key).cloned().or_else(|| {
            knowledge::lookup(&key.member).and_then(|facts| facts.effects.clone())
        }) else {
            return (Effects::top(), false);
        };

        in_progress.insert(key.clone());
        let mut cut = false;
        let mut effects = BTreeSet::new();
        for quantum in &own.effects {
            match quantum {
                EffectQuantum::Top | EffectQuantum::ThisChange | EffectQuantum::ParamChange(_) => {
                    effects.insert(quantum.clone());
                }
                EffectQuantum::Call {
                    key: callee,
                    data,
                    is_static,
                } => {
                    let (callee_effects, callee_cut) = self.resolve(callee, memo, in_progress);
                    cut |= callee_cut;
                    let receiver = usize::from(!is_static);
                    for effect in &callee_effects.effects {
                        let mapped = match effect {
                            EffectQuantum::ThisChange if !is_static => {
                                data.first().and_then(DataValue::change_effect)
                            }
                            EffectQuantum::ParamChange(param) => data
                                .get(param + receiver)
                                .map_or(Some(EffectQuantum::Top), DataValue::change_effect),
                            _ => Some(EffectQuantum::Top),
                        };
                        let resolved = match mapped {
                            Some(EffectQuantum::ReturnChange(source)) => {
                                let (change, source_cut) =
                                    self.return_change(&source, memo, in_progress);
                                cut |= source_cut;
                                change
                            }
                            other => other,
                        };
                        effects.extend(resolved);
                    }
                }
                EffectQuantum::FieldRead(field) => {
                    let value = self.fields.get(&normalized(field)).copied();
                    if value != Some(Value::Bot) {
                        effects.insert(EffectQuantum::Top);
                    }
                }
                EffectQuantum::ReturnChange(source) => {
                    let (change, source_cut) = self.return_change(source, memo, in_progress);
                    cut |= source_cut;
                    effects.extend(change);
                }
            }
        }
        let return_value = match &own.return_value {
            DataValue::Return(source) => {
                let (source_effects, source_cut) = self.resolve(source, memo, in_progress);
                cut |= source_cut;
                if source_effects.return_value == DataValue::Local {
                    DataValue::Local
                } else {
                    DataValue::Unknown1
                }
            }
            other => other.clone(),
        };
        in_progress.remove(&key);

        if effects.contains(&EffectQuantum::Top) {
            effects = BTreeSet::from([EffectQuantum::Top]);
        }
        let resolved = Effects::new(return_value, effects);
        if !cut {
            memo.insert(key, resolved.clone());
        }
        (resolved, cut)
    }

    /// A change to the value returned by `source` is local when `source` returns a fresh object.
    fn return_change(
        &self,
        source: &EKey,
        memo: &mut HashMap<EKey, Effects>,
        in_progress: &mut HashSet<EKey>,
    ) -> (Option<EffectQuantum>, bool) {
        let (source_effects, cut) = self.resolve(source, memo, in_progress);
        let change = (source_effects.return_value != DataValue::Local).then_some(EffectQuantum::Top);
        (change, cut)
    }
}
