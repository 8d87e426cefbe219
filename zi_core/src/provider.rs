//! Candidate supply for the solver: feeds, package manager lookups, and
//! local overrides, behind small collaborator traits so `BacktrackingSolver`
//! never touches the network or a package database directly.

use crate::candidate::{NetworkLevel, SelectionCandidate, StabilityPolicy};
use crate::errors::Error;
use crate::feed::{Feed, FeedPreferences, Implementation, InterfacePreferences};
use crate::requirements::Architecture;
use std::collections::HashMap;

/// Supplies parsed, normalized feed content for an interface URI. The
/// solver never parses XML itself; it asks a `FeedProvider`.
pub trait FeedProvider {
    fn get_feed(&self, interface_uri: &str) -> Result<Feed, Error>;
}

/// Supplies distro-native package candidates for an interface, when the
/// interface declares a `<package-implementation>` (modeled here as a
/// flat list the package manager resolves up front, without parsing the
/// `<package-implementation>` element itself).
pub trait PackageManager {
    fn query(&self, interface_uri: &str) -> Vec<Implementation>;
}

/// A purely local override: feeds the user pinned to a specific path or
/// version outside of any remote feed, taking priority over everything
/// `FeedProvider` returns.
pub trait LocalFeedSource {
    fn local_candidates(&self, interface_uri: &str) -> Vec<SelectionCandidate>;
}

/// User-configured feed/interface preferences (§4.7's `FeedPreferences_for`
/// collaborator, plus the interface-level `extra_feeds` list).
pub trait Preferences {
    fn feed_preferences(&self, feed_uri: &str) -> FeedPreferences;
    fn interface_preferences(&self, interface_uri: &str) -> InterfacePreferences;
}

/// Aggregates candidates for one interface URI, already filtered to those
/// runnable on `host` and ordered best-first per `candidate::compare`.
pub struct ProviderContext<'a> {
    pub feeds: &'a dyn FeedProvider,
    pub packages: &'a dyn PackageManager,
    pub local: &'a dyn LocalFeedSource,
    pub preferences: &'a dyn Preferences,
    pub host: Architecture,
    pub network: NetworkLevel,
    pub stability_policy: StabilityPolicy,
}

impl<'a> ProviderContext<'a> {
    pub fn new(
        feeds: &'a dyn FeedProvider,
        packages: &'a dyn PackageManager,
        local: &'a dyn LocalFeedSource,
        preferences: &'a dyn Preferences,
        host: Architecture,
        network: NetworkLevel,
        stability_policy: StabilityPolicy,
    ) -> Self {
        ProviderContext { feeds, packages, local, preferences, host, network, stability_policy }
    }

    /// Resolve every known candidate for one interface, in the §4.7
    /// priority order: local overrides (site-packages/native feeds), the
    /// primary feed and its `<feed>` references (recursively, cycle-safe),
    /// the interface's user-configured extra feeds, then native package
    /// candidates -- sorted best-first afterward.
    pub fn candidates_for(&self, interface_uri: &str) -> Result<Vec<SelectionCandidate>, Error> {
        let mut out = self.local.local_candidates(interface_uri);

        let mut guard = CycleGuard::new();
        self.collect_feed_tree(interface_uri, &mut guard, &mut out)?;

        let interface_prefs = self.preferences.interface_preferences(interface_uri);
        for extra_feed in &interface_prefs.extra_feeds {
            self.collect_feed_tree(extra_feed, &mut guard, &mut out)?;
        }

        let distribution_feed = format!("distribution:{interface_uri}");
        for implementation in self.packages.query(interface_uri) {
            out.push(SelectionCandidate {
                implementation,
                feed_uri: distribution_feed.clone(),
                is_cached: true,
                is_package: true,
                user_stability_override: None,
            });
        }

        let (network, policy) = (self.network, self.stability_policy);
        out.sort_by(move |a, b| crate::candidate::compare(a, b, network, policy));
        Ok(out)
    }

    fn collect_feed_tree(
        &self,
        feed_uri: &str,
        guard: &mut CycleGuard,
        out: &mut Vec<SelectionCandidate>,
    ) -> Result<(), Error> {
        guard.enter(feed_uri)?;
        let feed = self.feeds.get_feed(feed_uri)?;
        let prefs = self.preferences.feed_preferences(feed_uri);

        for implementation in feed.implementations {
            let user_stability_override = prefs.stability_overrides.get(&implementation.id).copied();
            out.push(SelectionCandidate {
                implementation,
                feed_uri: feed_uri.to_string(),
                is_cached: false,
                is_package: false,
                user_stability_override,
            });
        }

        for reference in &feed.feed_references {
            self.collect_feed_tree(reference, guard, out)?;
        }

        guard.leave(feed_uri);
        Ok(())
    }
}

/// Cycle guard for interface feed resolution: `<feed src=...>` references
/// and package-implementation lookups can loop back to an interface already
/// being resolved. Tracks the interfaces currently on the call stack.
#[derive(Default)]
pub struct CycleGuard {
    on_stack: HashMap<String, ()>,
}

impl CycleGuard {
    pub fn new() -> Self {
        CycleGuard::default()
    }

    pub fn enter(&mut self, interface_uri: &str) -> Result<(), Error> {
        if self.on_stack.contains_key(interface_uri) {
            return Err(Error::DependencyCycle {
                cycle: vec![interface_uri.to_string()],
            });
        }
        self.on_stack.insert(interface_uri.to_string(), ());
        Ok(())
    }

    pub fn leave(&mut self, interface_uri: &str) {
        self.on_stack.remove(interface_uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_guard_detects_reentrant_interface() {
        let mut guard = CycleGuard::new();
        guard.enter("http://example.com/a.xml").unwrap();
        let err = guard.enter("http://example.com/a.xml").unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
    }

    #[test]
    fn cycle_guard_allows_reentry_after_leave() {
        let mut guard = CycleGuard::new();
        guard.enter("http://example.com/a.xml").unwrap();
        guard.leave("http://example.com/a.xml");
        assert!(guard.enter("http://example.com/a.xml").is_ok());
    }

    use crate::feed::Stability;
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn bare_impl(id: &str) -> Implementation {
        Implementation {
            id: id.to_string(),
            version: Version::parse("1.0").unwrap(),
            architecture: Architecture::ANY,
            stability: Stability::Testing,
            languages: vec![],
            manifest_digest: format!("sha256new_{id}"),
            commands: BTreeMap::new(),
            bindings: vec![],
            dependencies: vec![],
            restrictions: vec![],
            retrieval_methods: vec![],
        }
    }

    struct FixedFeeds(HashMap<String, Feed>);
    impl FeedProvider for FixedFeeds {
        fn get_feed(&self, interface_uri: &str) -> Result<Feed, Error> {
            self.0
                .get(interface_uri)
                .cloned()
                .ok_or_else(|| Error::ImplementationNotFound { digest: interface_uri.to_string() })
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

    struct FixedPreferences {
        feed: FeedPreferences,
        interface: InterfacePreferences,
    }
    impl Preferences for FixedPreferences {
        fn feed_preferences(&self, _feed_uri: &str) -> FeedPreferences {
            self.feed.clone()
        }
        fn interface_preferences(&self, _interface_uri: &str) -> InterfacePreferences {
            self.interface.clone()
        }
    }

    #[test]
    fn follows_feed_references_recursively() {
        let mut feeds = HashMap::new();
        feeds.insert(
            "http://example.com/app.xml".to_string(),
            Feed {
                uri: "http://example.com/app.xml".to_string(),
                feed_references: vec!["http://example.com/extra.xml".to_string()],
                implementations: vec![bare_impl("primary")],
            },
        );
        feeds.insert(
            "http://example.com/extra.xml".to_string(),
            Feed {
                uri: "http://example.com/extra.xml".to_string(),
                feed_references: vec![],
                implementations: vec![bare_impl("from-reference")],
            },
        );
        let feed_provider = FixedFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        let preferences = FixedPreferences { feed: FeedPreferences::default(), interface: InterfacePreferences::default() };
        let ctx = ProviderContext::new(
            &feed_provider,
            &packages,
            &local,
            &preferences,
            Architecture::ANY,
            NetworkLevel::Full,
            StabilityPolicy::DEFAULT,
        );

        let candidates = ctx.candidates_for("http://example.com/app.xml").unwrap();
        assert!(candidates.iter().any(|c| c.implementation.id == "primary"));
        assert!(candidates.iter().any(|c| c.implementation.id == "from-reference"));
    }

    #[test]
    fn interface_preferences_pull_in_extra_feeds() {
        let mut feeds = HashMap::new();
        feeds.insert(
            "http://example.com/app.xml".to_string(),
            Feed {
                uri: "http://example.com/app.xml".to_string(),
                feed_references: vec![],
                implementations: vec![bare_impl("primary")],
            },
        );
        feeds.insert(
            "http://example.com/pinned.xml".to_string(),
            Feed {
                uri: "http://example.com/pinned.xml".to_string(),
                feed_references: vec![],
                implementations: vec![bare_impl("pinned")],
            },
        );
        let feed_provider = FixedFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        let preferences = FixedPreferences {
            feed: FeedPreferences::default(),
            interface: InterfacePreferences { extra_feeds: vec!["http://example.com/pinned.xml".to_string()] },
        };
        let ctx = ProviderContext::new(
            &feed_provider,
            &packages,
            &local,
            &preferences,
            Architecture::ANY,
            NetworkLevel::Full,
            StabilityPolicy::DEFAULT,
        );

        let candidates = ctx.candidates_for("http://example.com/app.xml").unwrap();
        assert!(candidates.iter().any(|c| c.implementation.id == "pinned"));
    }

    #[test]
    fn feed_preferences_raise_but_never_lower_candidate_stability() {
        let mut feeds = HashMap::new();
        feeds.insert(
            "http://example.com/app.xml".to_string(),
            Feed {
                uri: "http://example.com/app.xml".to_string(),
                feed_references: vec![],
                implementations: vec![bare_impl("a1")],
            },
        );
        let feed_provider = FixedFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        // bare_impl declares Testing; an override of Buggy is lower, so the
        // max of the two keeps the declared Testing.
        let mut stability_overrides = BTreeMap::new();
        stability_overrides.insert("a1".to_string(), Stability::Buggy);
        let preferences = FixedPreferences {
            feed: FeedPreferences { stability_overrides },
            interface: InterfacePreferences::default(),
        };
        let ctx = ProviderContext::new(
            &feed_provider,
            &packages,
            &local,
            &preferences,
            Architecture::ANY,
            NetworkLevel::Full,
            StabilityPolicy::DEFAULT,
        );

        let candidates = ctx.candidates_for("http://example.com/app.xml").unwrap();
        let a1 = candidates.iter().find(|c| c.implementation.id == "a1").unwrap();
        assert_eq!(a1.effective_stability(StabilityPolicy::DEFAULT), Stability::Testing);
    }

    #[test]
    fn feed_preferences_override_raises_stability_above_declared() {
        let mut feeds = HashMap::new();
        feeds.insert(
            "http://example.com/app.xml".to_string(),
            Feed {
                uri: "http://example.com/app.xml".to_string(),
                feed_references: vec![],
                implementations: vec![bare_impl("a1")],
            },
        );
        let feed_provider = FixedFeeds(feeds);
        let packages = NoPackages;
        let local = NoLocal;
        // bare_impl declares Testing; an override of Packaged is higher,
        // so the max takes the override.
        let mut stability_overrides = BTreeMap::new();
        stability_overrides.insert("a1".to_string(), Stability::Packaged);
        let preferences = FixedPreferences {
            feed: FeedPreferences { stability_overrides },
            interface: InterfacePreferences::default(),
        };
        let ctx = ProviderContext::new(
            &feed_provider,
            &packages,
            &local,
            &preferences,
            Architecture::ANY,
            NetworkLevel::Full,
            StabilityPolicy::DEFAULT,
        );

        let candidates = ctx.candidates_for("http://example.com/app.xml").unwrap();
        let a1 = candidates.iter().find(|c| c.implementation.id == "a1").unwrap();
        // StabilityPolicy::DEFAULT's minimum is Stable, so Packaged folds
        // down to Stable in the comparator-facing value.
        assert_eq!(a1.effective_stability(StabilityPolicy::DEFAULT), Stability::Stable);
    }
}
