use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::analysis::key::Member;
use crate::ir::{Class, Method};

/// Overriding declarations per overridable method, computed by class hierarchy analysis
/// over the scanned classes.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    overrides: BTreeMap<Member, Vec<Member>>,
}

impl Overrides {
    pub fn get(&self, member: &Member) -> &[Member] {
        self.overrides.get(member).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Member, &Vec<Member>)> {
        self.overrides.iter()
    }
}

/// Whether calls to the method may dispatch to another declaration.
pub fn is_overridable(method: &Method) -> bool {
    !method.access.is_static
        && !method.access.is_private
        && !method.access.is_final
        && !method.name.starts_with('<')
}

pub fn build_overrides(classes: &[Class]) -> Overrides {
    let subtypes = build_hierarchy(classes);
    let declared = index_methods(classes);
    let mut overrides = BTreeMap::new();
    for class in classes {
        if class.access.is_final {
            continue;
        }
        for method in class.methods.iter().filter(|method| is_overridable(method)) {
            let mut found = Vec::new();
            for descendant in descendants(&class.name, &subtypes) {
                let candidate = Member::new(descendant, &method.name, &method.descriptor);
                if declared.contains(&candidate) {
                    found.push(candidate);
                }
            }
            if !found.is_empty() {
                overrides.insert(
                    Member::new(&class.name, &method.name, &method.descriptor),
                    found,
                );
            }
        }
    }
    Overrides { overrides }
}

/// Transitive subtypes of `root` in breadth-first, then name order.
fn descendants<'a>(root: &str, subtypes: &'a BTreeMap<String, Vec<String>>) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([root]);
    let mut result = Vec::new();
    while let Some(current) = queue.pop_front() {
        let Some(children) = subtypes.get(current) else {
            continue;
        };
        for child in children {
            if seen.insert(child.as_str()) {
                result.push(child.as_str());
                queue.push_back(child.as_str());
            }
        }
    }
    result
}

fn build_hierarchy(classes: &[Class]) -> BTreeMap<String, Vec<String>> {
    let mut hierarchy: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for class in classes {
        for parent in class.super_name.iter().chain(&class.interfaces) {
            hierarchy
                .entry(parent.clone())
                .or_default()
                .push(class.name.clone());
        }
    }
    for children in hierarchy.values_mut() {
        children.sort();
        children.dedup();
    }
    hierarchy
}

fn index_methods(classes: &[Class]) -> BTreeSet<Member> {
    classes
        .iter()
        .flat_map(|class| {
            class
                .methods
                .iter()
                .filter(|method| !method.access.is_static)
                .map(|method| Member::new(&class.name, &method.name, &method.descriptor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassAccess, MethodAccess};

    fn method(name: &str, access: MethodAccess) -> Method {
        Method {
            name: name.to_string(),
            descriptor: "()Ljava/lang/Object;".to_string(),
            access,
            max_locals: 1,
            insns: Vec::new(),
            handlers: Vec::new(),
        }
    }

    fn class(name: &str, super_name: Option<&str>, interfaces: &[&str], methods: Vec<Method>) -> Class {
        Class {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods,
            content_hash: [0; 32],
            is_target: true,
        }
    }

    fn member(owner: &str, name: &str) -> Member {
        Member::new(owner, name, "()Ljava/lang/Object;")
    }

    #[test]
    fn overrides_include_transitive_subclasses_and_implementors() {
        let public = MethodAccess {
            is_public: true,
            ..MethodAccess::default()
        };
        let classes = vec![
            class("Api", None, &[], vec![method("get", public)]),
            class("Base", Some("java/lang/Object"), &["Api"], vec![method("get", public)]),
            class("Mid", Some("Base"), &[], Vec::new()),
            class("Leaf", Some("Mid"), &[], vec![method("get", public)]),
        ];
        let overrides = build_overrides(&classes);
        assert_eq!(
            overrides.get(&member("Api", "get")),
            &[member("Base", "get"), member("Leaf", "get")]
        );
        assert_eq!(overrides.get(&member("Base", "get")), &[member("Leaf", "get")]);
        assert!(overrides.get(&member("Leaf", "get")).is_empty());
    }

    #[test]
    fn static_private_and_constructors_are_not_overridable() {
        let classes = vec![
            class(
                "Base",
                None,
                &[],
                vec![
                    method(
                        "make",
                        MethodAccess {
                            is_static: true,
                            ..MethodAccess::default()
                        },
                    ),
                    method(
                        "hidden",
                        MethodAccess {
                            is_private: true,
                            ..MethodAccess::default()
                        },
                    ),
                    method("<init>", MethodAccess::default()),
                ],
            ),
            class(
                "Sub",
                Some("Base"),
                &[],
                vec![
                    method("make", MethodAccess::default()),
                    method("hidden", MethodAccess::default()),
                    method("<init>", MethodAccess::default()),
                ],
            ),
        ];
        assert_eq!(build_overrides(&classes).iter().count(), 0);
    }
}
