//! The solver's output: one chosen implementation per interface plus the
//! commands each was chosen to satisfy (§4.7).

use crate::candidate::SelectionCandidate;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Selections {
    by_interface: BTreeMap<String, SelectionCandidate>,
    commands_needed: BTreeMap<String, Vec<String>>,
}

impl Selections {
    pub(crate) fn from_candidates(
        by_interface: BTreeMap<String, SelectionCandidate>,
        commands_needed: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Selections { by_interface, commands_needed }
    }

    pub fn get(&self, interface_uri: &str) -> Option<&SelectionCandidate> {
        self.by_interface.get(interface_uri)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.by_interface.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_interface.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_interface.is_empty()
    }

    pub fn commands_needed_for(&self, interface_uri: &str) -> &[String] {
        self.commands_needed
            .get(interface_uri)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every manifest digest a caller must have in the store before this
    /// selection set can run, in interface order.
    pub fn required_digests(&self) -> Vec<&str> {
        self.by_interface
            .values()
            .map(|c| c.implementation.manifest_digest.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Implementation, Stability};
    use crate::requirements::Architecture;
    use crate::version::Version;
    use std::collections::BTreeMap as Map;

    fn candidate(id: &str) -> SelectionCandidate {
        SelectionCandidate {
            implementation: Implementation {
                id: id.to_string(),
                version: Version::parse("1.0").unwrap(),
                architecture: Architecture::ANY,
                stability: Stability::Stable,
                manifest_digest: format!("sha256new_{id}"),
                commands: Map::new(),
                bindings: vec![],
                dependencies: vec![],
                restrictions: vec![],
                retrieval_methods: vec![],
            },
            feed_uri: "http://example.com/app.xml".to_string(),
            is_cached: false,
            is_package: false,
            user_stability_override: None,
        }
    }

    #[test]
    fn required_digests_lists_every_chosen_implementation() {
        let mut by_interface = Map::new();
        by_interface.insert("http://example.com/app.xml".to_string(), candidate("a"));
        by_interface.insert("http://example.com/lib.xml".to_string(), candidate("b"));
        let selections = Selections::from_candidates(by_interface, Map::new());
        let digests = selections.required_digests();
        assert_eq!(digests.len(), 2);
    }

    #[test]
    fn commands_needed_defaults_to_empty_slice() {
        let selections = Selections::from_candidates(Map::new(), Map::new());
        assert!(selections.commands_needed_for("http://example.com/app.xml").is_empty());
    }
}
