//! JSON summary of the facts inferred for analysis targets.

use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::analysis::budget::AnalysisConfig;
use crate::analysis::effects::EffectQuantum;
use crate::analysis::key::{Direction, EKey, Member};
use crate::analysis::lattice::Value;
use crate::analysis::result::Effects;
use crate::engine::EquationIndex;

/// Top-level report document.
#[derive(Debug, Serialize)]
pub struct Report {
    pub tool: &'static str,
    pub version: &'static str,
    pub stats: ReportStats,
    pub members: Vec<MemberReport>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReportStats {
    pub class_count: usize,
    pub skipped_classes: usize,
    pub analyzed_members: usize,
    /// Members whose solve request exceeded the key budget.
    pub aborted_members: usize,
}

/// Non-trivial facts of one method.
#[derive(Debug, Serialize)]
pub struct MemberReport {
    pub member: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contracts: Vec<ContractFact>,
    /// Remaining effects after solving; empty means the method is pure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effects: Option<Vec<String>>,
}

#[derive(Debug, Eq, PartialEq, Serialize)]
pub struct ContractFact {
    pub direction: String,
    pub value: Value,
}

/// Solves every target method of `index` and keeps the informative answers.
pub fn build_report(
    index: &EquationIndex,
    config: &AnalysisConfig,
    class_count: usize,
    skipped_classes: usize,
) -> Report {
    let outcomes: Vec<Option<MemberReport>> = index
        .targets()
        .par_iter()
        .map(|member| member_report(index, config, member))
        .collect();

    let mut stats = ReportStats {
        class_count,
        skipped_classes,
        ..ReportStats::default()
    };
    let mut members = Vec::new();
    for outcome in outcomes {
        match outcome {
            Some(report) => {
                stats.analyzed_members += 1;
                if !report.contracts.is_empty() || report.effects.is_some() {
                    members.push(report);
                }
            }
            None => stats.aborted_members += 1,
        }
    }
    Report {
        tool: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        stats,
        members,
    }
}

fn member_report(
    index: &EquationIndex,
    config: &AnalysisConfig,
    member: &Member,
) -> Option<MemberReport> {
    let (purity_keys, contract_keys): (Vec<EKey>, Vec<EKey>) = index
        .keys(member)
        .into_iter()
        .partition(|key| key.direction == Direction::Pure);

    let solved = match index.solve(&contract_keys, config) {
        Ok(solved) => solved,
        Err(err) => {
            warn!("no contracts for {member}: {err}");
            return None;
        }
    };
    let contracts = contract_keys
        .iter()
        .filter_map(|key| {
            let value = *solved.get(key)?;
            is_informative(value).then(|| ContractFact {
                direction: key.direction.to_string(),
                value,
            })
        })
        .collect();

    let effects = match index.solve_purity(&purity_keys, config) {
        Ok(solved) => purity_keys
            .first()
            .and_then(|key| solved.get(key))
            .map(describe_effects),
        Err(err) => {
            warn!("no effects for {member}: {err}");
            None
        }
    };
    Some(MemberReport {
        member: member.to_string(),
        contracts,
        effects,
    })
}

fn is_informative(value: Value) -> bool {
    !matches!(value, Value::Top | Value::Bot)
}

fn describe_effects(effects: &Effects) -> Vec<String> {
    effects
        .effects
        .iter()
        .map(|effect| match effect {
            EffectQuantum::ThisChange => "this".to_string(),
            EffectQuantum::ParamChange(param) => format!("param{param}"),
            _ => "top".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::scan::parse_class;
    use crate::test_harness::sample_class;

    fn sample_report() -> Report {
        let class = parse_class(&sample_class(), true).expect("parse sample");
        let index = Engine::new(AnalysisConfig::default()).generate(&[class], None);
        build_report(&index, &AnalysisConfig::default(), 1, 0)
    }

    fn facts<'a>(report: &'a Report, member: &str) -> &'a MemberReport {
        report
            .members
            .iter()
            .find(|candidate| candidate.member == member)
            .expect("member in report")
    }

    #[test]
    fn report_lists_informative_contracts() {
        let report = sample_report();
        assert_eq!(report.stats.analyzed_members, 3);
        assert_eq!(report.stats.aborted_members, 0);

        let id = facts(&report, "Sample.id(Ljava/lang/Object;)Ljava/lang/Object;");
        assert!(id.contracts.contains(&ContractFact {
            direction: "in-out(0,NotNull)".to_string(),
            value: Value::NotNull,
        }));
        assert!(!id.contracts.iter().any(|fact| fact.value == Value::Top));
        assert_eq!(id.effects.as_deref(), Some(&[][..]));

        let fail = facts(&report, "Sample.fail()V");
        assert_eq!(
            fail.contracts,
            vec![ContractFact {
                direction: "throw".to_string(),
                value: Value::Fail,
            }]
        );
    }

    #[test]
    fn report_serializes_values_by_name() {
        let value = serde_json::to_value(sample_report()).expect("serialize");
        assert_eq!(value["tool"], "bytecontract");
        assert_eq!(value["stats"]["class_count"], 1);
        let members = value["members"].as_array().expect("members");
        assert!(members.iter().any(|member| member["contracts"]
            .as_array()
            .is_some_and(|contracts| contracts
                .iter()
                .any(|fact| fact["value"] == "Fail"))));
    }

    #[test]
    fn effects_are_named() {
        let effects = Effects::new(
            crate::analysis::effects::DataValue::Unknown1,
            [EffectQuantum::ThisChange, EffectQuantum::ParamChange(1), EffectQuantum::Top]
                .into_iter()
                .collect(),
        );
        assert_eq!(describe_effects(&effects), vec!["top", "this", "param1"]);
    }
}
