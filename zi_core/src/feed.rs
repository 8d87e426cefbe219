//! Feed data model and normalization (§4.6).
//!
//! A feed is parsed (see `feed_parser`) into a `RawFeed` whose `<group>`
//! nesting and per-implementation overrides mirror the XML structure
//! directly. `normalize()` flattens that into a `Feed` the solver and
//! candidate provider actually consume: every implementation fully
//! resolved, with group-inherited fields propagated and legacy `main=`
//! attributes rewritten into an implicit `run` command.

use crate::digest::{best_of, DigestFormat};
use crate::errors::Error;
use crate::version::{Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stability {
    Insecure,
    Buggy,
    Developer,
    Testing,
    Stable,
    Packaged,
}

impl Stability {
    pub fn parse(s: &str) -> Option<Stability> {
        match s {
            "insecure" => Some(Stability::Insecure),
            "buggy" => Some(Stability::Buggy),
            "developer" => Some(Stability::Developer),
            "testing" => Some(Stability::Testing),
            "stable" => Some(Stability::Stable),
            "packaged" => Some(Stability::Packaged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Essential,
    Recommended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub interface: String,
    pub importance: Importance,
    pub version: Option<VersionRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Environment {
        name: String,
        insert: Option<String>,
        value: Option<String>,
        mode: EnvironmentMode,
    },
    Executable {
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentMode {
    Prepend,
    Append,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub path: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalMethod {
    Archive {
        mime_type: String,
        extract_subdir: Option<String>,
        destination: Option<String>,
        href: String,
        size: u64,
    },
    SingleFile {
        destination: String,
        executable: bool,
        href: String,
    },
    Recipe {
        steps: Vec<RecipeStep>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeStep {
    Archive {
        mime_type: String,
        extract_subdir: Option<String>,
        destination: Option<String>,
        href: String,
        size: u64,
    },
    SingleFile {
        destination: String,
        executable: bool,
        href: String,
    },
    Remove {
        path: String,
    },
    Rename {
        source: String,
        destination: String,
    },
    CopyFrom {
        source: String,
        destination: String,
        from_implementation_digest: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupAttrs {
    pub arch: Option<crate::requirements::Architecture>,
    pub stability: Option<Stability>,
    pub version: Option<String>,
    /// `langs=` attribute, space-separated language codes. `None` means
    /// the group didn't set it; an inner group's own `langs=` replaces
    /// the inherited value entirely rather than appending to it.
    pub langs: Option<Vec<String>>,
    pub commands: Vec<Command>,
    pub bindings: Vec<Binding>,
    pub dependencies: Vec<Dependency>,
    pub restrictions: Vec<Dependency>,
    pub main: Option<String>,
}

impl GroupAttrs {
    /// Merge `child` onto `self`: inner values override outer, list fields
    /// append (outer first, so an inner duplicate still "wins" logically
    /// when later consumers look up by name).
    fn merge(&self, child: &GroupAttrs) -> GroupAttrs {
        GroupAttrs {
            arch: child.arch.or(self.arch),
            stability: child.stability.or(self.stability),
            version: child.version.clone().or_else(|| self.version.clone()),
            langs: child.langs.clone().or_else(|| self.langs.clone()),
            commands: {
                let mut v = self.commands.clone();
                v.extend(child.commands.clone());
                v
            },
            bindings: {
                let mut v = self.bindings.clone();
                v.extend(child.bindings.clone());
                v
            },
            dependencies: {
                let mut v = self.dependencies.clone();
                v.extend(child.dependencies.clone());
                v
            },
            restrictions: {
                let mut v = self.restrictions.clone();
                v.extend(child.restrictions.clone());
                v
            },
            main: child.main.clone().or_else(|| self.main.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Group {
    pub attrs: GroupAttrs,
    pub groups: Vec<Group>,
    pub implementations: Vec<RawImplementation>,
}

/// An `<implementation>` as parsed, before group inheritance is applied.
#[derive(Debug, Clone, Default)]
pub struct RawImplementation {
    pub id: String,
    pub manifest_digests: Vec<String>,
    pub attrs: GroupAttrs,
    pub retrieval_methods: Vec<RetrievalMethod>,
}

#[derive(Debug, Clone, Default)]
pub struct RawFeed {
    pub uri: String,
    pub name: Option<String>,
    pub feed_references: Vec<String>,
    pub root: Group,
}

/// A fully resolved implementation, post-normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub id: String,
    pub version: Version,
    pub architecture: crate::requirements::Architecture,
    pub stability: Stability,
    /// Languages this implementation supports. Empty means "any language".
    pub languages: Vec<String>,
    pub manifest_digest: String,
    pub commands: BTreeMap<String, Command>,
    pub bindings: Vec<Binding>,
    pub dependencies: Vec<Dependency>,
    pub restrictions: Vec<Dependency>,
    pub retrieval_methods: Vec<RetrievalMethod>,
}

#[derive(Debug, Clone, Default)]
pub struct Feed {
    pub uri: String,
    pub feed_references: Vec<String>,
    pub implementations: Vec<Implementation>,
}

/// Normalize a raw feed per §4.6: propagate group attributes, parse
/// digest-shaped ids, rewrite legacy `main=`, and validate that every
/// implementation has a digest and version.
pub fn normalize(raw: &RawFeed, feed_uri: &str) -> Result<Feed, Error> {
    let mut implementations = Vec::new();
    collect_group(&raw.root, &GroupAttrs::default(), &mut implementations)?;

    Ok(Feed {
        uri: feed_uri.to_string(),
        feed_references: raw.feed_references.clone(),
        implementations,
    })
}

fn collect_group(
    group: &Group,
    inherited: &GroupAttrs,
    out: &mut Vec<Implementation>,
) -> Result<(), Error> {
    let merged = inherited.merge(&group.attrs);

    for impl_ in &group.implementations {
        out.push(normalize_implementation(impl_, &merged)?);
    }
    for child in &group.groups {
        collect_group(child, &merged, out)?;
    }
    Ok(())
}

fn normalize_implementation(
    raw: &RawImplementation,
    inherited: &GroupAttrs,
) -> Result<Implementation, Error> {
    let effective = inherited.merge(&raw.attrs);

    // Step 2: an id that parses as a digest counts even with no explicit
    // <manifest-digest>.
    let mut digests = raw.manifest_digests.clone();
    if digests.is_empty() && DigestFormat::parse_id(&raw.id).is_some() {
        digests.push(raw.id.clone());
    }
    let manifest_digest = best_of(&digests)
        .cloned()
        .ok_or_else(|| Error::InvalidData {
            message: format!("implementation '{}' has no manifest digest", raw.id),
        })?;

    let version_str = effective.version.clone().ok_or_else(|| Error::InvalidData {
        message: format!("implementation '{}' has no version", raw.id),
    })?;
    let version = Version::parse(&version_str).ok_or_else(|| Error::InvalidData {
        message: format!("implementation '{}' has an unparseable version '{version_str}'", raw.id),
    })?;

    let mut commands: BTreeMap<String, Command> = effective
        .commands
        .iter()
        .map(|c| (c.name.clone(), c.clone()))
        .collect();

    // Step 3: legacy main= becomes an implicit `run` command.
    if let Some(main) = &effective.main {
        commands.entry("run".to_string()).or_insert(Command {
            name: "run".to_string(),
            path: Some(main.clone()),
            dependencies: Vec::new(),
            bindings: Vec::new(),
        });
    }

    Ok(Implementation {
        id: raw.id.clone(),
        version,
        architecture: effective.arch.unwrap_or(crate::requirements::Architecture::ANY),
        stability: effective.stability.unwrap_or(Stability::Testing),
        languages: effective.langs.clone().unwrap_or_default(),
        manifest_digest,
        commands,
        bindings: effective.bindings.clone(),
        dependencies: effective.dependencies.clone(),
        restrictions: effective.restrictions.clone(),
        retrieval_methods: raw.retrieval_methods.clone(),
    })
}

/// User-configured overrides for one feed, keyed by feed URI
/// (`FeedPreferences_for(uri)`, §4.7). `stability_overrides` lets a user
/// pin an individual implementation id to a stability more or less strict
/// than the feed's own declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPreferences {
    pub stability_overrides: BTreeMap<String, Stability>,
}

/// User-configured overrides for one interface. `extra_feeds` lists
/// additional feed URIs the candidate provider should consult alongside
/// the primary feed and its `<feed>` references (§4.7 step 4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfacePreferences {
    pub extra_feeds: Vec<String>,
}
