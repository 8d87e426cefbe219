//! Candidate selection ordering (§4.7).

use crate::feed::{Implementation, Stability};
use crate::requirements::{languages_match, Architecture};
use std::cmp::Ordering;

/// How willing the solver is to reach out to the network for a better
/// candidate than what's already cached (§4.7 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLevel {
    /// Fetch whatever the comparator would otherwise prefer.
    Full,
    /// Prefer cached implementations; only fetch if nothing cached works.
    Minimal,
    /// Never fetch; cached implementations are the only option considered.
    Offline,
}

/// Folds every stability at or above `minimum` into one indistinguishable
/// bucket, so a feed declaring `Packaged` doesn't automatically outrank one
/// declaring `Stable` once both clear the user's bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    pub minimum: Stability,
}

impl StabilityPolicy {
    pub const DEFAULT: StabilityPolicy = StabilityPolicy { minimum: Stability::Stable };

    fn bucket(&self, stability: Stability) -> Stability {
        if stability >= self.minimum {
            self.minimum
        } else {
            stability
        }
    }
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        StabilityPolicy::DEFAULT
    }
}

/// One implementation as seen by the solver, carrying the bits of feed
/// context the 8-step comparator needs alongside the raw `Implementation`.
#[derive(Debug, Clone)]
pub struct SelectionCandidate {
    pub implementation: Implementation,
    pub feed_uri: String,
    pub is_cached: bool,
    /// `true` for implementations the local package manager provides
    /// (distro packages), `false` for ones 0install itself fetches and
    /// unpacks.
    pub is_package: bool,
    pub user_stability_override: Option<Stability>,
}

impl SelectionCandidate {
    /// Max of the implementation's declared stability and the user's
    /// override, clamped by `policy` so nothing above its `minimum` can be
    /// distinguished from `minimum` itself.
    pub fn effective_stability(&self, policy: StabilityPolicy) -> Stability {
        let raw = self.implementation.stability.max(self.user_stability_override.unwrap_or(self.implementation.stability));
        policy.bucket(raw)
    }

    pub fn is_usable(&self, host: Architecture, policy: StabilityPolicy, requested_languages: &[String]) -> bool {
        let stability = self.effective_stability(policy);
        self.implementation.architecture.runs_on(host)
            && stability != Stability::Buggy
            && stability != Stability::Insecure
            && languages_match(&self.implementation.languages, requested_languages)
    }
}

/// The §4.7 8-step comparator: earlier steps win outright; later steps only
/// apply when every earlier step tied. Returns `Ordering::Less` when `a` is
/// preferred over `b` (i.e. this is a "better than" ordering, not a natural
/// sort key -- callers sort candidates with this and take the first).
pub fn compare(a: &SelectionCandidate, b: &SelectionCandidate, network: NetworkLevel, policy: StabilityPolicy) -> Ordering {
    // 1. Cached implementations beat uncached ones, but only when the
    //    network level discourages fetching or the versions tie anyway --
    //    on a full network a strictly newer uncached version still wins.
    if network != NetworkLevel::Full || a.implementation.version == b.implementation.version {
        let by_cached = b.is_cached.cmp(&a.is_cached);
        if by_cached != Ordering::Equal {
            return by_cached;
        }
    }

    // 2. Higher stability wins, folding anything at or above the policy's
    //    minimum into one bucket first.
    let by_stability = b.effective_stability(policy).cmp(&a.effective_stability(policy));
    if by_stability != Ordering::Equal {
        return by_stability;
    }

    // 3. Native packages are preferred over 0install-managed implementations
    //    at equal stability (distro packages integrate better).
    let by_package = b.is_package.cmp(&a.is_package);
    if by_package != Ordering::Equal {
        return by_package;
    }

    // 4. More specific OS wins.
    let by_os = b
        .implementation
        .architecture
        .os_specificity()
        .cmp(&a.implementation.architecture.os_specificity());
    if by_os != Ordering::Equal {
        return by_os;
    }

    // 5. More specific CPU wins.
    let by_cpu = b
        .implementation
        .architecture
        .cpu_specificity()
        .cmp(&a.implementation.architecture.cpu_specificity());
    if by_cpu != Ordering::Equal {
        return by_cpu;
    }

    // 6. Higher version wins.
    let by_version = b.implementation.version.cmp(&a.implementation.version);
    if by_version != Ordering::Equal {
        return by_version;
    }

    // 7. Among equals, already-cached implementations still break ties
    //    (redundant with step 1 unless callers vary `is_cached` loosely;
    //    kept as its own step to mirror the upstream comparator shape).
    let by_cached_tiebreak = b.is_cached.cmp(&a.is_cached);
    if by_cached_tiebreak != Ordering::Equal {
        return by_cached_tiebreak;
    }

    // 8. Stable fallback: compare by id so the ordering is a total order.
    a.implementation.id.cmp(&b.implementation.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::{Cpu, Os};
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn impl_with(id: &str, version: &str, arch: Architecture, stability: Stability) -> Implementation {
        Implementation {
            id: id.to_string(),
            version: Version::parse(version).unwrap(),
            architecture: arch,
            stability,
            languages: vec![],
            manifest_digest: format!("sha256new_{id}"),
            commands: BTreeMap::new(),
            bindings: vec![],
            dependencies: vec![],
            restrictions: vec![],
            retrieval_methods: vec![],
        }
    }

    fn candidate(implementation: Implementation, is_cached: bool) -> SelectionCandidate {
        SelectionCandidate {
            implementation,
            feed_uri: "http://example.com/app.xml".to_string(),
            is_cached,
            is_package: false,
            user_stability_override: None,
        }
    }

    #[test]
    fn cached_beats_uncached_only_at_equal_version_or_restricted_network() {
        let any = Architecture::ANY;
        let policy = StabilityPolicy::DEFAULT;
        // Equal version: cache wins regardless of network level.
        let low = candidate(impl_with("a", "1.0", any, Stability::Stable), true);
        let low_uncached = candidate(impl_with("b", "1.0", any, Stability::Stable), false);
        assert_eq!(compare(&low, &low_uncached, NetworkLevel::Full, policy), Ordering::Less);

        // Different versions, full network: the newer uncached one still wins.
        let cached_old = candidate(impl_with("a", "1.0", any, Stability::Stable), true);
        let uncached_new = candidate(impl_with("b", "2.0", any, Stability::Stable), false);
        assert_eq!(compare(&cached_old, &uncached_new, NetworkLevel::Full, policy), Ordering::Greater);

        // Different versions, minimal network: cache wins even over a newer version.
        assert_eq!(compare(&cached_old, &uncached_new, NetworkLevel::Minimal, policy), Ordering::Less);
    }

    #[test]
    fn higher_version_wins_when_otherwise_equal() {
        let any = Architecture::ANY;
        let policy = StabilityPolicy::DEFAULT;
        let v1 = candidate(impl_with("a", "1.0", any, Stability::Stable), false);
        let v2 = candidate(impl_with("b", "2.0", any, Stability::Stable), false);
        assert_eq!(compare(&v2, &v1, NetworkLevel::Full, policy), Ordering::Less);
    }

    #[test]
    fn more_specific_os_wins_at_equal_version_and_stability() {
        let linux = Architecture { os: Os::Linux, cpu: Cpu::All };
        let any = Architecture::ANY;
        let policy = StabilityPolicy::DEFAULT;
        let specific = candidate(impl_with("a", "1.0", linux, Stability::Stable), false);
        let generic = candidate(impl_with("b", "1.0", any, Stability::Stable), false);
        assert_eq!(compare(&specific, &generic, NetworkLevel::Full, policy), Ordering::Less);
    }

    #[test]
    fn ordering_is_consistent_when_sorting_a_mixed_list() {
        let any = Architecture::ANY;
        let policy = StabilityPolicy::DEFAULT;
        let mut candidates = vec![
            candidate(impl_with("c", "1.0", any, Stability::Testing), false),
            candidate(impl_with("a", "2.0", any, Stability::Stable), true),
            candidate(impl_with("b", "1.5", any, Stability::Stable), false),
        ];
        candidates.sort_by(|a, b| compare(a, b, NetworkLevel::Full, policy));
        assert_eq!(candidates[0].implementation.id, "a");
    }

    #[test]
    fn stabilities_at_or_above_policy_minimum_are_indistinguishable() {
        let any = Architecture::ANY;
        let policy = StabilityPolicy::DEFAULT;
        let stable = candidate(impl_with("a", "1.0", any, Stability::Stable), false);
        let packaged = candidate(impl_with("b", "1.0", any, Stability::Packaged), false);
        // Both clear the Stable bar, so step 2 treats them as tied and
        // falls through to the version step, where "a" loses on id at
        // equal version -- step 8, not step 2, breaks this tie.
        assert_eq!(stable.effective_stability(policy), packaged.effective_stability(policy));
    }

    #[test]
    fn effective_stability_is_the_max_of_declared_and_override_clamped_by_policy() {
        let any = Architecture::ANY;
        let mut testing = candidate(impl_with("a", "1.0", any, Stability::Testing), false);
        testing.user_stability_override = Some(Stability::Buggy);
        // Override is lower than declared, so the max keeps Testing.
        assert_eq!(testing.effective_stability(StabilityPolicy::DEFAULT), Stability::Testing);
    }
}
