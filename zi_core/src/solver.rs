//! Backtracking dependency solver (§4.7, §9).

use crate::candidate::SelectionCandidate;
use crate::errors::Error;
use crate::feed::Importance;
use crate::provider::ProviderContext;
use crate::requirements::Requirements;
use crate::selections::Selections;
use crate::version::{Version, VersionRange};
use std::collections::{BTreeMap, VecDeque};

/// One outstanding requirement the solver still needs to satisfy: either
/// the root interface/command, or a dependency pulled in transitively by
/// an already-chosen implementation's command.
#[derive(Debug, Clone)]
struct Demand {
    interface_uri: String,
    command: Option<String>,
    importance: Importance,
    /// The version range this particular dependency edge restricts its
    /// target interface to, if the `<dependency>` that introduced it
    /// carried one.
    version: Option<VersionRange>,
}

#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    /// Cap on total candidate-selection attempts across the whole search,
    /// guarding against pathological backtracking on malformed feeds.
    pub max_attempts: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig { max_attempts: 1000 }
    }
}

#[derive(Clone)]
struct SolveState {
    chosen: BTreeMap<String, SelectionCandidate>,
    commands_needed: BTreeMap<String, Vec<String>>,
    /// Version ranges every candidate for a given interface must satisfy,
    /// accumulated from `Requirements.extra_restrictions`, per-dependency
    /// `version` constraints, and `<restricts>` elements on chosen
    /// implementations.
    restrictions: BTreeMap<String, Vec<VersionRange>>,
    /// The root requirements' requested languages, consulted by every
    /// `is_usable` check regardless of which interface is being resolved.
    languages: Vec<String>,
}

impl SolveState {
    fn new(languages: Vec<String>) -> Self {
        SolveState {
            chosen: BTreeMap::new(),
            commands_needed: BTreeMap::new(),
            restrictions: BTreeMap::new(),
            languages,
        }
    }

    fn version_allowed(&self, interface_uri: &str, version: &Version) -> bool {
        match self.restrictions.get(interface_uri) {
            Some(ranges) => ranges.iter().all(|r| r.contains(version)),
            None => true,
        }
    }

    fn add_restriction(&mut self, interface_uri: &str, range: VersionRange) {
        self.restrictions.entry(interface_uri.to_string()).or_default().push(range);
    }
}

pub struct BacktrackingSolver {
    config: SolverConfig,
}

impl BacktrackingSolver {
    pub fn new(config: SolverConfig) -> Self {
        BacktrackingSolver { config }
    }

    pub fn solve(&self, root: &Requirements, ctx: &ProviderContext) -> Result<Selections, Error> {
        let mut state = SolveState::new(root.languages.clone());
        for (interface_uri, range) in &root.extra_restrictions {
            state.add_restriction(interface_uri, range.clone());
        }

        let mut demands = VecDeque::new();
        let command = if root.command.is_empty() { None } else { Some(root.command.clone()) };
        demands.push_back(Demand {
            interface_uri: root.interface_uri.clone(),
            command,
            importance: Importance::Essential,
            version: None,
        });

        let mut attempts = 0usize;
        let mut report = Vec::new();
        if self.try_fulfill_all(&mut state, demands, ctx, &mut attempts, &mut report)? {
            Ok(Selections::from_candidates(state.chosen, state.commands_needed))
        } else {
            Err(Error::SolverFailure {
                interface: root.interface_uri.clone(),
                report,
            })
        }
    }

    /// Try every demand in `demands` as the next one to resolve, in turn,
    /// before giving up -- the recursive equivalent of "for each
    /// permutation of essential demands" (§4.8 step 3), since choosing a
    /// different next pivot at every recursion level already explores every
    /// ordering. A demand whose interface is already resolved never
    /// branches (its outcome doesn't depend on ordering), so only
    /// unresolved essential demands are offered as pivots; recommended
    /// demands and already-resolved ones fall back to plain queue order.
    fn try_fulfill_all(
        &self,
        state: &mut SolveState,
        demands: VecDeque<Demand>,
        ctx: &ProviderContext,
        attempts: &mut usize,
        report: &mut Vec<String>,
    ) -> Result<bool, Error> {
        if demands.is_empty() {
            return Ok(true);
        }

        let pivots: Vec<usize> = demands
            .iter()
            .enumerate()
            .filter(|(_, d)| d.importance == Importance::Essential && !state.chosen.contains_key(&d.interface_uri))
            .map(|(i, _)| i)
            .collect();
        let pivots = if pivots.is_empty() { vec![0] } else { pivots };

        let mut last_err = None;
        let mut last_report = report.clone();
        for pos in pivots {
            let mut remaining = demands.clone();
            let demand = remaining.remove(pos).expect("pos indexes into this queue");
            let mut trial_state = state.clone();
            let mut trial_attempts = *attempts;
            let mut trial_report = report.clone();
            match self.try_one(&mut trial_state, demand, remaining, ctx, &mut trial_attempts, &mut trial_report) {
                Ok(true) => {
                    *state = trial_state;
                    *attempts = trial_attempts;
                    *report = trial_report;
                    return Ok(true);
                }
                Ok(false) => {
                    *attempts = trial_attempts;
                    last_report = trial_report;
                }
                Err(e) => last_err = Some(e),
            }
        }

        *report = last_report;
        if let Some(e) = last_err {
            return Err(e);
        }
        Ok(false)
    }

    fn try_one(
        &self,
        state: &mut SolveState,
        demand: Demand,
        demands: VecDeque<Demand>,
        ctx: &ProviderContext,
        attempts: &mut usize,
        report: &mut Vec<String>,
    ) -> Result<bool, Error> {
        if *attempts >= self.config.max_attempts {
            report.push(format!(
                "attempt cap ({}) reached while resolving '{}'",
                self.config.max_attempts, demand.interface_uri
            ));
            return Ok(false);
        }

        if let Some(range) = &demand.version {
            state.add_restriction(&demand.interface_uri, range.clone());
        }

        if let Some(existing) = state.chosen.get(&demand.interface_uri).cloned() {
            if !state.version_allowed(&demand.interface_uri, &existing.implementation.version) {
                report.push(format!(
                    "'{}' selection {} no longer satisfies an accumulated restriction",
                    demand.interface_uri, existing.implementation.version
                ));
                return Ok(false);
            }
            if let Some(command_name) = &demand.command {
                state
                    .commands_needed
                    .entry(demand.interface_uri.clone())
                    .or_default()
                    .push(command_name.clone());
                if let Some(command) = existing.implementation.commands.get(command_name) {
                    let mut next = demands.clone();
                    for dep in &command.dependencies {
                        next.push_back(Demand {
                            interface_uri: dep.interface.clone(),
                            command: Some("run".to_string()),
                            importance: dep.importance,
                            version: dep.version.clone(),
                        });
                    }
                    return self.try_fulfill_all(state, next, ctx, attempts, report);
                } else if demand.importance == Importance::Essential {
                    report.push(format!(
                        "'{}' has no command '{}'",
                        demand.interface_uri, command_name
                    ));
                    return Ok(false);
                }
            }
            return self.try_fulfill_all(state, demands, ctx, attempts, report);
        }

        let candidates = match ctx.candidates_for(&demand.interface_uri) {
            Ok(c) => c,
            Err(e) => {
                if demand.importance == Importance::Essential {
                    return Err(e);
                }
                report.push(format!("skipping recommended '{}': {e}", demand.interface_uri));
                return self.try_fulfill_all(state, demands, ctx, attempts, report);
            }
        };

        let usable: Vec<&SelectionCandidate> = candidates
            .iter()
            .filter(|c| {
                c.is_usable(ctx.host, ctx.stability_policy, &state.languages)
                    && state.version_allowed(&demand.interface_uri, &c.implementation.version)
            })
            .collect();

        if usable.is_empty() {
            if demand.importance == Importance::Recommended {
                return self.try_fulfill_all(state, demands, ctx, attempts, report);
            }
            report.push(format!("no usable implementation for '{}'", demand.interface_uri));
            return Ok(false);
        }

        for candidate in usable {
            *attempts += 1;
            let mut trial_state = state.clone();
            trial_state.chosen.insert(demand.interface_uri.clone(), candidate.clone());
            for restriction in &candidate.implementation.restrictions {
                if let Some(range) = &restriction.version {
                    trial_state.add_restriction(&restriction.interface, range.clone());
                }
            }

            let mut next = demands.clone();
            if let Some(command_name) = &demand.command {
                trial_state
                    .commands_needed
                    .entry(demand.interface_uri.clone())
                    .or_default()
                    .push(command_name.clone());
                if let Some(command) = candidate.implementation.commands.get(command_name) {
                    for dep in &command.dependencies {
                        next.push_back(Demand {
                            interface_uri: dep.interface.clone(),
                            command: Some("run".to_string()),
                            importance: dep.importance,
                            version: dep.version.clone(),
                        });
                    }
                } else if demand.importance == Importance::Essential {
                    report.push(format!(
                        "'{}' candidate '{}' has no command '{}'",
                        demand.interface_uri, candidate.implementation.id, command_name
                    ));
                    continue;
                }
            }
            for dep in &candidate.implementation.dependencies {
                next.push_back(Demand {
                    interface_uri: dep.interface.clone(),
                    command: Some("run".to_string()),
                    importance: dep.importance,
                    version: dep.version.clone(),
                });
            }

            if self.try_fulfill_all(&mut trial_state, next, ctx, attempts, report)? {
                *state = trial_state;
                return Ok(true);
            }
        }

        report.push(format!(
            "exhausted all candidates for '{}' without a solution",
            demand.interface_uri
        ));
        Ok(false)
    }
}

/// Wraps `BacktrackingSolver` with a fallback: if `solve` fails against
/// cached/local candidates only, retry once against a provider that's
/// allowed to consult fresh feed data.
pub struct RefreshingSolver {
    solver: BacktrackingSolver,
}

impl RefreshingSolver {
    pub fn new(config: SolverConfig) -> Self {
        RefreshingSolver {
            solver: BacktrackingSolver::new(config),
        }
    }

    pub fn try_solve(
        &self,
        root: &Requirements,
        cached_ctx: &ProviderContext,
        refreshed_ctx: &ProviderContext,
    ) -> Result<Selections, Error> {
        match self.solver.solve(root, cached_ctx) {
            Ok(selections) => Ok(selections),
            Err(_) => self.solver.solve(root, refreshed_ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Feed, FeedPreferences, Implementation, InterfacePreferences, Stability};
    use crate::provider::{FeedProvider, LocalFeedSource, PackageManager, Preferences};
    use crate::requirements::Architecture;
    use crate::version::Version;
    use std::collections::BTreeMap as Map;

    struct FakeFeeds(Map<String, Feed>);

    impl FeedProvider for FakeFeeds {
        fn get_feed(&self, interface_uri: &str) -> Result<Feed, Error> {
            self.0
                .get(interface_uri)
                .cloned()
                .ok_or_else(|| Error::ImplementationNotFound {
                    digest: interface_uri.to_string(),
                })
        }
    }

    struct NoPackages;
    impl PackageManager for NoPackages {
        fn query(&self, _interface_uri: &str) -> Vec<Implementation> {
            vec![]
        }
    }

    struct NoLocal;
    impl LocalFeedSource for NoLocal {
        fn local_candidates(&self, _interface_uri: &str) -> Vec<SelectionCandidate> {
            vec![]
        }
    }

    struct NoPreferences;
    impl Preferences for NoPreferences {
        fn feed_preferences(&self, _feed_uri: &str) -> FeedPreferences {
            FeedPreferences::default()
        }
        fn interface_preferences(&self, _interface_uri: &str) -> InterfacePreferences {
            InterfacePreferences::default()
        }
    }

    fn simple_impl(id: &str, version: &str) -> Implementation {
        let mut commands = Map::new();
        commands.insert(
            "run".to_string(),
            crate::feed::Command {
                name: "run".to_string(),
                path: Some("bin/run".to_string()),
                dependencies: vec![],
                bindings: vec![],
            },
        );
        Implementation {
            id: id.to_string(),
            version: Version::parse(version).unwrap(),
            architecture: Architecture::ANY,
            stability: Stability::Stable,
            languages: vec![],
            manifest_digest: format!("sha256new_{id}"),
            commands,
            bindings: vec![],
            dependencies: vec![],
            restrictions: vec![],
            retrieval_methods: vec![],
        }
    }

    #[test]
    fn solves_a_single_interface_with_no_dependencies() {
        let mut feeds = Map::new();
        feeds.insert(
            "http://example.com/app.xml".to_string(),
            Feed {
                uri: "http://example.com/app.xml".to_string(),
                feed_references: vec![],
                implementations: vec![simple_impl("a1", "1.0")],
            },
        );
        let feed_provider = FakeFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        let preferences = NoPreferences;
        let ctx = ProviderContext::new(&feed_provider, &packages, &local, &preferences, Architecture::ANY, crate::candidate::NetworkLevel::Full, crate::candidate::StabilityPolicy::DEFAULT);

        let solver = BacktrackingSolver::new(SolverConfig::default());
        let reqs = Requirements::new("http://example.com/app.xml");
        let selections = solver.solve(&reqs, &ctx).unwrap();
        assert!(selections.get("http://example.com/app.xml").is_some());
    }

    #[test]
    fn fails_with_report_when_no_implementation_exists() {
        let feeds = Map::new();
        let feed_provider = FakeFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        let preferences = NoPreferences;
        let ctx = ProviderContext::new(&feed_provider, &packages, &local, &preferences, Architecture::ANY, crate::candidate::NetworkLevel::Full, crate::candidate::StabilityPolicy::DEFAULT);

        let solver = BacktrackingSolver::new(SolverConfig::default());
        let reqs = Requirements::new("http://example.com/missing.xml");
        let err = solver.solve(&reqs, &ctx).unwrap_err();
        assert!(matches!(err, Error::SolverFailure { .. } | Error::ImplementationNotFound { .. }));
    }

    #[test]
    fn resolves_transitive_essential_dependency() {
        let mut lib_impl = simple_impl("lib1", "1.0");
        lib_impl.commands.clear();
        let mut app_impl = simple_impl("app1", "1.0");
        app_impl.commands.get_mut("run").unwrap().dependencies.push(crate::feed::Dependency {
            interface: "http://example.com/lib.xml".to_string(),
            importance: Importance::Essential,
            version: None,
        });

        let mut feeds = Map::new();
        feeds.insert(
            "http://example.com/app.xml".to_string(),
            Feed {
                uri: "http://example.com/app.xml".to_string(),
                feed_references: vec![],
                implementations: vec![app_impl],
            },
        );
        feeds.insert(
            "http://example.com/lib.xml".to_string(),
            Feed {
                uri: "http://example.com/lib.xml".to_string(),
                feed_references: vec![],
                implementations: vec![lib_impl],
            },
        );
        let feed_provider = FakeFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        let preferences = NoPreferences;
        let ctx = ProviderContext::new(&feed_provider, &packages, &local, &preferences, Architecture::ANY, crate::candidate::NetworkLevel::Full, crate::candidate::StabilityPolicy::DEFAULT);

        let solver = BacktrackingSolver::new(SolverConfig::default());
        let reqs = Requirements::new("http://example.com/app.xml");
        let selections = solver.solve(&reqs, &ctx).unwrap();
        assert!(selections.get("http://example.com/lib.xml").is_some());
    }

    #[test]
    fn extra_restriction_excludes_a_newer_version() {
        let mut feeds = Map::new();
        feeds.insert(
            "http://example.com/a.xml".to_string(),
            Feed {
                uri: "http://example.com/a.xml".to_string(),
                feed_references: vec![],
                implementations: vec![simple_impl("a1", "1.0"), simple_impl("a2", "2.0")],
            },
        );
        let feed_provider = FakeFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        let preferences = NoPreferences;
        let ctx = ProviderContext::new(
            &feed_provider,
            &packages,
            &local,
            &preferences,
            Architecture::ANY,
            crate::candidate::NetworkLevel::Full,
            crate::candidate::StabilityPolicy::DEFAULT,
        );

        let solver = BacktrackingSolver::new(SolverConfig::default());
        let mut reqs = Requirements::new("http://example.com/a.xml");
        reqs.extra_restrictions.insert(
            "http://example.com/a.xml".to_string(),
            crate::version::VersionRange::parse("..!2.0").unwrap(),
        );
        let selections = solver.solve(&reqs, &ctx).unwrap();
        let selected = selections.get("http://example.com/a.xml").unwrap();
        assert_eq!(selected.implementation.id, "a1");
    }
}
