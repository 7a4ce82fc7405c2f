use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use opentelemetry::KeyValue;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::analysis::budget::{AnalysisConfig, Budget, Cancellation, NeverCancel};
use crate::analysis::cache::{ClassEquations, EquationCache};
use crate::analysis::effects::DataValue;
use crate::analysis::key::{Direction, EKey, HMember, Member};
use crate::analysis::knowledge;
use crate::analysis::lattice::{ELattice, Value};
use crate::analysis::result::{EResult, Effects, Equation, Equations};
use crate::analysis::solver::{PuritySolver, Solver};
use crate::analysis::{
    AnalysisAbort, MethodBody, combined, contracts, negation, nonnull_in, purity,
};
use crate::flow::{ControlFlowGraph, build_flow_graph};
use crate::hierarchy::build_overrides;
use crate::ir::{Class, Method, ValueType};
use crate::telemetry::{Telemetry, add_current_span_event, current_context, with_span, with_span_in};

/// Equation generation and solving over a set of scanned classes.
pub struct Engine {
    config: AnalysisConfig,
    cancellation: Arc<dyn Cancellation>,
    cache: Option<Arc<dyn EquationCache>>,
}

impl Engine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            cancellation: Arc::new(NeverCancel),
            cache: None,
        }
    }

    pub fn with_cancellation(mut self, cancellation: Arc<dyn Cancellation>) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn EquationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Generates hashed equations for every member of `classes`, in parallel per class.
    pub fn generate(&self, classes: &[Class], telemetry: Option<&Telemetry>) -> EquationIndex {
        let generated: Vec<ClassEquations> = with_span(
            telemetry,
            "generate",
            &[KeyValue::new("bytecontract.phase", "generate")],
            || {
                let parent = current_context();
                classes
                    .par_iter()
                    .map(|class| {
                        let attributes = [KeyValue::new("bytecontract.class", class.name.clone())];
                        with_span_in(telemetry, "class", &attributes, &parent, || {
                            self.class_equations(class)
                        })
                    })
                    .collect()
            },
        );

        let mut index = EquationIndex::default();
        for (class, members) in classes.iter().zip(generated) {
            index.insert_class(class, members);
        }
        for (member, overrides) in build_overrides(classes).iter() {
            index.overrides.insert(
                member.hashed(),
                overrides.iter().map(Member::hashed).collect(),
            );
        }
        info!(
            "generated equations for {} members of {} classes",
            index.equations.len(),
            classes.len()
        );
        index
    }

    /// Equations of one class, taken from the cache when its content is unchanged.
    pub fn class_equations(&self, class: &Class) -> ClassEquations {
        if let Some(cached) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(&class.content_hash))
        {
            debug!("cache hit for {}", class.name);
            return cached;
        }
        let mut members = Vec::new();
        for method in &class.methods {
            if let Some(equations) = self.method_equations(class, method) {
                let member = Member::new(&class.name, &method.name, &method.descriptor);
                members.push((member.hashed(), equations.hashed()));
            }
        }
        for field in &class.fields {
            let member = Member::new(&class.name, &field.name, &field.descriptor);
            let value = if field.access.is_volatile {
                Value::Top
            } else {
                Value::Bot
            };
            let mut equations = Equations::new(true);
            equations.add(Direction::Volatile, EResult::Final(value));
            members.push((member.hashed(), equations));
        }
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.put(class.content_hash, &members) {
                warn!("failed to cache equations of {}: {err:#}", class.name);
            }
        }
        members
    }

    /// Runs every applicable strategy on one method. Aborted directions are dropped.
    pub fn method_equations(&self, class: &Class, method: &Method) -> Option<Equations> {
        if !method.has_code() {
            return None;
        }
        let body = match MethodBody::new(&class.name, method) {
            Ok(body) => body,
            Err(err) => {
                debug!("skipping {}.{}{}: {err}", class.name, method.name, method.descriptor);
                return None;
            }
        };
        let cfg = match build_flow_graph(method) {
            Ok(cfg) => cfg,
            Err(err) => {
                debug!("skipping {}: {err}", body.member);
                return None;
            }
        };

        let mut equations = Equations::new(is_stable(class, method));
        let mut directions = directions(&body);
        if body.returns_boolean() {
            let negatable: Vec<Direction> = directions
                .iter()
                .copied()
                .filter(|direction| matches!(direction, Direction::Out | Direction::InOut { .. }))
                .collect();
            let mut budget = self.budget();
            if let Ok(results) = negation::analyze(&body, &cfg, &negatable, &mut budget) {
                for (direction, result) in results {
                    directions.retain(|other| *other != direction);
                    equations.add(direction, result);
                }
            }
        }
        for (direction, result) in self.contract_results(&body, &cfg, &directions) {
            equations.add(direction, result);
        }

        let mut budget = self.budget();
        match purity::analyze(&body, &cfg, &mut budget) {
            Ok(Some(effects)) => equations.add(Direction::Pure, EResult::Effects(effects)),
            Ok(None) => {}
            Err(err) => dropped(&body, Direction::Pure, &err),
        }
        Some(equations)
    }

    fn contract_results(
        &self,
        body: &MethodBody<'_>,
        cfg: &ControlFlowGraph,
        directions: &[Direction],
    ) -> Vec<(Direction, EResult)> {
        if cfg.is_single_path() {
            let mut budget = self.budget();
            match combined::analyze(body, cfg, directions, &mut budget) {
                Ok(results) => return results,
                Err(err) => debug!("single-pass analysis of {} failed: {err}", body.member),
            }
        }
        let mut results = Vec::with_capacity(directions.len());
        for &direction in directions {
            let mut budget = self.budget();
            let result = match direction {
                Direction::In {
                    param,
                    nullable: false,
                } => nonnull_in::analyze(body, cfg, param, &mut budget),
                _ => contracts::analyze(body, cfg, direction, &mut budget),
            };
            match result {
                Ok(result) => results.push((direction, result)),
                Err(err) => dropped(body, direction, &err),
            }
        }
        results
    }

    fn budget(&self) -> Budget<'_> {
        Budget::new(&self.config, self.cancellation.as_ref())
    }
}

fn dropped(body: &MethodBody<'_>, direction: Direction, err: &AnalysisAbort) {
    debug!("dropping {}@{direction}: {err}", body.member);
    add_current_span_event(
        "bytecontract.abort",
        &[
            KeyValue::new("bytecontract.member", body.member.to_string()),
            KeyValue::new("bytecontract.direction", direction.to_string()),
            KeyValue::new("bytecontract.reason", err.to_string()),
        ],
    );
}

/// Whether no other declaration can be dispatched to instead of this method.
fn is_stable(class: &Class, method: &Method) -> bool {
    method.access.is_static
        || method.access.is_private
        || method.access.is_final
        || method.is_constructor()
        || class.access.is_final
}

/// Directions generated for a method with the given signature.
pub fn directions(body: &MethodBody<'_>) -> Vec<Direction> {
    let mut directions = Vec::new();
    let returns_value = body.returns.is_trackable();
    if returns_value {
        directions.push(Direction::Out);
    }
    if body.returns.is_reference() {
        directions.push(Direction::NullableOut);
    }
    for (param, ty) in body.params.iter().enumerate() {
        let hypotheses: &[Value] = match ty {
            ValueType::Reference => {
                directions.push(Direction::In {
                    param,
                    nullable: false,
                });
                directions.push(Direction::In {
                    param,
                    nullable: true,
                });
                &[Value::Null, Value::NotNull]
            }
            ValueType::Boolean => &[Value::True, Value::False],
            _ => continue,
        };
        for &value in hypotheses {
            if returns_value {
                directions.push(Direction::InOut { param, value });
            }
            directions.push(Direction::InThrow { param, value });
        }
    }
    directions.push(Direction::Throw);
    directions
}

/// Hashed equations of every scanned member plus the override relation.
#[derive(Debug, Default)]
pub struct EquationIndex {
    equations: BTreeMap<HMember, Equations>,
    names: BTreeMap<HMember, Member>,
    overrides: BTreeMap<HMember, Vec<HMember>>,
    targets: Vec<Member>,
}

impl EquationIndex {
    fn insert_class(&mut self, class: &Class, members: ClassEquations) {
        let names: Vec<Member> = class
            .methods
            .iter()
            .map(|method| Member::new(&class.name, &method.name, &method.descriptor))
            .chain(
                class
                    .fields
                    .iter()
                    .map(|field| Member::new(&class.name, &field.name, &field.descriptor)),
            )
            .collect();
        for name in names {
            let Entry::Vacant(slot) = self.names.entry(name.hashed()) else {
                continue;
            };
            if class.is_target && name.descriptor.starts_with('(') {
                self.targets.push(name.clone());
            }
            slot.insert(name);
        }
        // A class found more than once contributes the join of every declaration.
        for (member, equations) in members {
            match self.equations.entry(member) {
                Entry::Occupied(mut existing) => existing.get_mut().merge(&equations),
                Entry::Vacant(slot) => {
                    slot.insert(equations);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    pub fn equations(&self, member: &HMember) -> Option<&Equations> {
        self.equations.get(member)
    }

    pub fn name(&self, member: &HMember) -> Option<&Member> {
        self.names.get(member)
    }

    /// Methods declared by analysis target classes, in scan order.
    pub fn targets(&self) -> &[Member] {
        &self.targets
    }

    /// Keys with a generated equation for `member`, stable and unnegated.
    pub fn keys(&self, member: &Member) -> Vec<EKey> {
        let hashed = member.hashed();
        self.equations
            .get(&hashed)
            .map(|equations| {
                equations
                    .results
                    .iter()
                    .map(|pair| EKey::new(hashed, pair.direction, true))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Solves contract keys: pulls the equations they depend on transitively, merges
    /// overriding declarations into unstable keys and runs one solver per lattice family.
    pub fn solve(
        &self,
        requested: &[EKey],
        config: &AnalysisConfig,
    ) -> Result<BTreeMap<EKey, Value>, AnalysisAbort> {
        let mut solvers: Vec<(ELattice, Solver)> = Vec::new();
        let mut pull = Pull::new(requested, config.key_limit);
        while let Some(key) = pull.next()? {
            if key.direction == Direction::Pure {
                continue;
            }
            let lattice = ELattice::for_direction(key.direction);
            let position = match solvers.iter().position(|(family, _)| *family == lattice) {
                Some(position) => position,
                None => {
                    solvers.push((lattice, Solver::new(lattice, lattice.unknown())));
                    solvers.len() - 1
                }
            };
            let solver = &mut solvers[position].1;
            for result in self.right_hand_sides(&key) {
                pull.extend(result.dependencies());
                solver.add_equation(Equation::new(key.clone(), result));
            }
        }

        let mut solved = BTreeMap::new();
        for (_, solver) in &solvers {
            solved.extend(solver.solve());
        }
        Ok(requested
            .iter()
            .map(|key| {
                let hashed = key.hashed();
                let value = solved
                    .get(&hashed)
                    .copied()
                    .unwrap_or_else(|| ELattice::for_direction(key.direction).unknown());
                (key.clone(), value)
            })
            .collect())
    }

    /// Solves purity keys to their fully substituted effects.
    pub fn solve_purity(
        &self,
        requested: &[EKey],
        config: &AnalysisConfig,
    ) -> Result<BTreeMap<EKey, Effects>, AnalysisAbort> {
        let mut solver = PuritySolver::new();
        let mut pull = Pull::new(requested, config.key_limit);
        while let Some(key) = pull.next()? {
            match key.direction {
                Direction::Pure => {
                    for result in self.right_hand_sides(&key) {
                        let EResult::Effects(effects) = result else {
                            continue;
                        };
                        pull.extend(effects.effects.iter().filter_map(|e| e.dependency().cloned()));
                        if let DataValue::Return(source) = &effects.return_value {
                            pull.extend([source.clone()]);
                        }
                        solver.add_equation(&key, effects);
                    }
                }
                Direction::Volatile => {
                    if let Some(value) = self
                        .equations
                        .get(&key.member.as_hashed())
                        .and_then(|equations| equations.find(Direction::Volatile))
                        .and_then(EResult::as_value)
                    {
                        solver.add_field(&key, value);
                    }
                }
                _ => {}
            }
        }
        Ok(requested
            .iter()
            .map(|key| (key.clone(), solver.solve(&key.hashed())))
            .collect())
    }

    /// Right-hand sides contributing to `key`. An unstable key of an overridable member
    /// also collects every overriding declaration; a member that cannot be overridden
    /// answers both keys with its own result.
    fn right_hand_sides(&self, key: &EKey) -> Vec<EResult> {
        let member = key.member.as_hashed();
        let mut found = Vec::new();
        match self.equations.get(&member) {
            Some(equations) => {
                if let Some(result) = equations.find(key.direction) {
                    found.push(result.clone());
                }
                if !key.stable && !equations.stable {
                    for overriding in self.overrides.get(&member).into_iter().flatten() {
                        if let Some(result) = self
                            .equations
                            .get(overriding)
                            .and_then(|equations| equations.find(key.direction))
                        {
                            found.push(result.clone());
                        }
                    }
                }
            }
            None => {
                if let Some(facts) = knowledge::lookup(&key.member) {
                    match key.direction {
                        Direction::Pure => {
                            if let Some(effects) = &facts.effects {
                                found.push(EResult::Effects(effects.hashed()));
                            }
                        }
                        direction => {
                            if let Some(value) = facts.contract(direction) {
                                found.push(EResult::Final(value));
                            }
                        }
                    }
                }
            }
        }
        found
    }
}

/// Transitive closure of keys reachable from a solve request, bounded by the key budget.
struct Pull {
    queue: VecDeque<EKey>,
    visited: BTreeSet<EKey>,
    limit: usize,
}

impl Pull {
    fn new(requested: &[EKey], limit: usize) -> Self {
        let mut pull = Self {
            queue: VecDeque::new(),
            visited: BTreeSet::new(),
            limit,
        };
        pull.extend(requested.iter().cloned());
        pull
    }

    fn extend(&mut self, keys: impl IntoIterator<Item = EKey>) {
        for key in keys {
            let mut key = key.hashed();
            key.negated = false;
            if self.visited.insert(key.clone()) {
                self.queue.push_back(key);
            }
        }
    }

    fn next(&mut self) -> Result<Option<EKey>, AnalysisAbort> {
        if self.visited.len() > self.limit {
            return Err(AnalysisAbort::KeyBudget);
        }
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::budget::CancellationToken;
    use crate::analysis::cache::LruEquationCache;
    use crate::analysis::contracts::tests::{constant, invoke, jump, load, op};
    use crate::ir::{ClassAccess, Constant, Field, FieldAccess, FieldRef, Insn, Kind, MethodAccess, Operand};
    use crate::opcodes;
    use std::num::NonZeroUsize;

    fn class(name: &str, super_name: Option<&str>, methods: Vec<Method>) -> Class {
        Class {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods,
            content_hash: [name.len() as u8; 32],
            is_target: true,
        }
    }

    fn method(name: &str, descriptor: &str, access: MethodAccess, max_locals: u16, insns: Vec<Insn>) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            max_locals,
            insns,
            handlers: Vec::new(),
        }
    }

    fn static_access() -> MethodAccess {
        MethodAccess {
            is_public: true,
            is_static: true,
            ..MethodAccess::default()
        }
    }

    fn virtual_access() -> MethodAccess {
        MethodAccess {
            is_public: true,
            ..MethodAccess::default()
        }
    }

    fn key(owner: &str, name: &str, descriptor: &str, direction: Direction, stable: bool) -> EKey {
        EKey::new(Member::new(owner, name, descriptor), direction, stable)
    }

    fn solve_one(index: &EquationIndex, key: EKey) -> Value {
        let solved = index
            .solve(std::slice::from_ref(&key), &AnalysisConfig::default())
            .expect("solve");
        solved[&key]
    }

    fn engine() -> Engine {
        Engine::new(AnalysisConfig::default())
    }

    const OBJECT_ID: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";

    /// `static Object id(Object x) { return x; }`
    fn identity() -> Method {
        method(
            "id",
            OBJECT_ID,
            static_access(),
            1,
            vec![load(opcodes::ALOAD, 0), op(opcodes::ARETURN)],
        )
    }

    #[test]
    fn identity_returns_not_null_for_not_null_argument() {
        let index = engine().generate(&[class("Util", None, vec![identity()])], None);
        let in_out = Direction::InOut {
            param: 0,
            value: Value::NotNull,
        };
        assert_eq!(solve_one(&index, key("Util", "id", OBJECT_ID, in_out, true)), Value::NotNull);
        let in_out_null = Direction::InOut {
            param: 0,
            value: Value::Null,
        };
        assert_eq!(solve_one(&index, key("Util", "id", OBJECT_ID, in_out_null, true)), Value::Null);
    }

    #[test]
    fn dereferenced_parameter_is_not_null() {
        // static int hash(Object x) { return x.hashCode(); }
        let hash = method(
            "hash",
            "(Ljava/lang/Object;)I",
            static_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
                op(opcodes::IRETURN),
            ],
        );
        let index = engine().generate(&[class("Util", None, vec![hash])], None);
        let in_key = key(
            "Util",
            "hash",
            "(Ljava/lang/Object;)I",
            Direction::In {
                param: 0,
                nullable: false,
            },
            true,
        );
        assert_eq!(solve_one(&index, in_key), Value::NotNull);
    }

    #[test]
    fn always_throwing_method_fails() {
        // static void fail() { throw new RuntimeException(); }
        let fail = method(
            "fail",
            "()V",
            static_access(),
            0,
            vec![
                Insn::new(0, opcodes::NEW, Operand::Type("java/lang/RuntimeException".to_string())),
                op(opcodes::DUP),
                invoke(opcodes::INVOKESPECIAL, "java/lang/RuntimeException", "<init>", "()V"),
                op(opcodes::ATHROW),
            ],
        );
        let index = engine().generate(&[class("Util", None, vec![fail])], None);
        assert_eq!(
            solve_one(&index, key("Util", "fail", "()V", Direction::Throw, true)),
            Value::Fail
        );
    }

    fn returning(name: &str, owner_constant: Option<&str>) -> Method {
        let insns = match owner_constant {
            Some(text) => vec![
                constant(opcodes::LDC, Constant::String(text.to_string())),
                op(opcodes::ARETURN),
            ],
            None => vec![load(opcodes::ALOAD, 1), op(opcodes::ARETURN)],
        };
        method(name, OBJECT_ID, virtual_access(), 2, insns)
    }

    #[test]
    fn unstable_key_joins_overriding_declarations() {
        let base = class("Base", Some("java/lang/Object"), vec![returning("get", Some("base"))]);
        let sub = class("Sub", Some("Base"), vec![returning("get", None)]);
        let index = engine().generate(&[base, sub], None);

        let unstable = key("Base", "get", OBJECT_ID, Direction::Out, false);
        let stable = unstable.mk_stable();
        assert_eq!(solve_one(&index, unstable), Value::Top);
        assert_eq!(solve_one(&index, stable.clone()), Value::NotNull);

        let both = index
            .solve(&[stable.clone(), stable.mk_unstable()], &AnalysisConfig::default())
            .expect("solve");
        // Merging both keys of one member keeps the conservative answer for each.
        assert_eq!(both[&stable], Value::Top);
    }

    #[test]
    fn duplicate_classes_join_their_equations() {
        // static Object id(Object x) { return ""; }
        let constant_id = method(
            "id",
            OBJECT_ID,
            static_access(),
            1,
            vec![
                constant(opcodes::LDC, Constant::String(String::new())),
                op(opcodes::ARETURN),
            ],
        );
        let first = class("Util", None, vec![identity()]);
        let second = class("Util", None, vec![constant_id]);
        let alone = engine().generate(std::slice::from_ref(&first), None);
        let index = engine().generate(&[first, second], None);
        assert_eq!(index.len(), 1);
        assert_eq!(index.targets().len(), 1);

        let null = Direction::InOut {
            param: 0,
            value: Value::Null,
        };
        let not_null = Direction::InOut {
            param: 0,
            value: Value::NotNull,
        };
        assert_eq!(solve_one(&alone, key("Util", "id", OBJECT_ID, null, true)), Value::Null);
        assert_eq!(solve_one(&index, key("Util", "id", OBJECT_ID, null, true)), Value::Top);
        assert_eq!(
            solve_one(&index, key("Util", "id", OBJECT_ID, not_null, true)),
            Value::NotNull
        );
    }

    #[test]
    fn calling_known_pure_method_has_no_effects() {
        // static int length(String s) { return s.length(); }
        let length = method(
            "length",
            "(Ljava/lang/String;)I",
            static_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKEVIRTUAL, "java/lang/String", "length", "()I"),
                op(opcodes::IRETURN),
            ],
        );
        let index = engine().generate(&[class("Util", None, vec![length])], None);
        let pure = key("Util", "length", "(Ljava/lang/String;)I", Direction::Pure, true);
        let solved = index
            .solve_purity(std::slice::from_ref(&pure), &AnalysisConfig::default())
            .expect("solve");
        assert!(solved[&pure].effects.is_empty());
    }

    #[test]
    fn calls_resolve_through_callee_equations() {
        // static Object wrap(Object x) { return Util.id(x); }
        let wrap = method(
            "wrap",
            OBJECT_ID,
            static_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKESTATIC, "Util", "id", OBJECT_ID),
                op(opcodes::ARETURN),
            ],
        );
        let index = engine().generate(&[class("Util", None, vec![identity(), wrap])], None);
        let in_out = Direction::InOut {
            param: 0,
            value: Value::NotNull,
        };
        assert_eq!(solve_one(&index, key("Util", "wrap", OBJECT_ID, in_out, true)), Value::NotNull);
    }

    #[test]
    fn missing_callees_fall_back_to_knowledge_base() {
        // static Object check(Object x) { return Objects.requireNonNull(x); }
        let check = method(
            "check",
            OBJECT_ID,
            static_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(
                    opcodes::INVOKESTATIC,
                    "java/util/Objects",
                    "requireNonNull",
                    "(Ljava/lang/Object;)Ljava/lang/Object;",
                ),
                op(opcodes::ARETURN),
            ],
        );
        let index = engine().generate(&[class("Util", None, vec![check])], None);
        assert_eq!(
            solve_one(&index, key("Util", "check", OBJECT_ID, Direction::Out, true)),
            Value::NotNull
        );
    }

    #[test]
    fn volatile_reads_make_getters_impure() {
        let getter = method(
            "get",
            "()Ljava/lang/Object;",
            virtual_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                Insn::new(
                    0,
                    opcodes::GETFIELD,
                    Operand::Field(FieldRef {
                        owner: "Holder".to_string(),
                        name: "value".to_string(),
                        descriptor: "Ljava/lang/Object;".to_string(),
                        kind: Kind::Reference,
                    }),
                ),
                op(opcodes::ARETURN),
            ],
        );
        let field = |is_volatile| Field {
            name: "value".to_string(),
            descriptor: "Ljava/lang/Object;".to_string(),
            access: FieldAccess {
                is_static: false,
                is_volatile,
            },
        };
        let pure = key("Holder", "get", "()Ljava/lang/Object;", Direction::Pure, true);
        for (is_volatile, expected_pure) in [(false, true), (true, false)] {
            let mut holder = class("Holder", None, vec![getter.clone()]);
            holder.fields.push(field(is_volatile));
            let index = engine().generate(&[holder], None);
            let solved = index
                .solve_purity(std::slice::from_ref(&pure), &AnalysisConfig::default())
                .expect("solve");
            assert_eq!(solved[&pure].effects.is_empty(), expected_pure);
        }
    }

    #[test]
    fn boolean_negation_is_solved_through_callee() {
        // static boolean isEmpty(String s) { return s == null; }  (Null -> true)
        let is_empty = method(
            "isEmpty",
            "(Ljava/lang/String;)Z",
            static_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                jump(opcodes::IFNONNULL, 4),
                constant(opcodes::ICONST_1, Constant::Int(1)),
                op(opcodes::IRETURN),
                constant(opcodes::ICONST_0, Constant::Int(0)),
                op(opcodes::IRETURN),
            ],
        );
        // static boolean isPresent(String s) { return !isEmpty(s); }
        let is_present = method(
            "isPresent",
            "(Ljava/lang/String;)Z",
            static_access(),
            1,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKESTATIC, "Util", "isEmpty", "(Ljava/lang/String;)Z"),
                jump(opcodes::IFNE, 5),
                constant(opcodes::ICONST_1, Constant::Int(1)),
                op(opcodes::IRETURN),
                constant(opcodes::ICONST_0, Constant::Int(0)),
                op(opcodes::IRETURN),
            ],
        );
        let index = engine().generate(&[class("Util", None, vec![is_empty, is_present])], None);
        let null_in = Direction::InOut {
            param: 0,
            value: Value::Null,
        };
        assert_eq!(
            solve_one(&index, key("Util", "isPresent", "(Ljava/lang/String;)Z", null_in, true)),
            Value::False
        );
    }

    #[test]
    fn aborted_directions_are_dropped() {
        let config = AnalysisConfig {
            step_limit: 1,
            ..AnalysisConfig::default()
        };
        let equations = Engine::new(config)
            .method_equations(&class("Util", None, Vec::new()), &identity())
            .expect("method has code");
        assert!(equations.results.is_empty());
    }

    #[test]
    fn cancelled_generation_drops_every_direction() {
        let token = CancellationToken::new();
        token.cancel();
        let config = AnalysisConfig {
            cancel_check_interval: 1,
            ..AnalysisConfig::default()
        };
        let engine = Engine::new(config).with_cancellation(Arc::new(token));
        let equations = engine
            .method_equations(&class("Util", None, Vec::new()), &identity())
            .expect("method has code");
        assert!(equations.results.is_empty());
    }

    #[test]
    fn key_budget_aborts_solve_request() {
        let index = engine().generate(&[class("Util", None, vec![identity()])], None);
        let config = AnalysisConfig {
            key_limit: 0,
            ..AnalysisConfig::default()
        };
        let request = [key("Util", "id", OBJECT_ID, Direction::Out, true)];
        assert_eq!(index.solve(&request, &config), Err(AnalysisAbort::KeyBudget));
    }

    #[test]
    fn cached_equations_are_reused() {
        let cache = Arc::new(LruEquationCache::new(NonZeroUsize::new(8).expect("capacity")));
        let engine = engine().with_cache(cache.clone());
        let util = class("Util", None, vec![identity()]);
        let first = engine.class_equations(&util);
        assert_eq!(cache.len(), 1);

        // Same content hash: the cached bundle is returned even for different code.
        let mut changed = util.clone();
        changed.methods.clear();
        assert_eq!(engine.class_equations(&changed), first);
        cache.invalidate(&util.content_hash);
        assert!(engine.class_equations(&changed).is_empty());
    }

    #[test]
    fn directions_follow_signature() {
        let method = method("f", "(Ljava/lang/Object;ZI)Z", static_access(), 3, vec![op(opcodes::RETURN)]);
        let body = MethodBody::new("A", &method).expect("body");
        let directions = directions(&body);
        assert_eq!(directions.first(), Some(&Direction::Out));
        assert!(!directions.contains(&Direction::NullableOut));
        assert!(directions.contains(&Direction::InOut {
            param: 1,
            value: Value::True
        }));
        assert!(!directions.iter().any(|direction| direction.param() == Some(2)));
        assert_eq!(directions.last(), Some(&Direction::Throw));
        assert_eq!(directions.len(), 1 + 2 + 4 + 4 + 1);
    }
}
