// src/recipe/format.rs

//! Recipe data model
//!
//! [`RecipeFile`] mirrors the TOML document; [`Recipe`] is the validated,
//! typed form the rest of the engine works with. A `Recipe` is immutable
//! once loaded.

use crate::hash::ContentHash;
use crate::version::{PackageVersion, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw recipe document as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    pub package: PackageSection,

    #[serde(default)]
    pub source: Option<SourceSection>,

    #[serde(default)]
    pub build: BuildSection,

    /// Declared configuration flags and their defaults
    #[serde(default)]
    pub options: BTreeMap<String, bool>,

    /// Custom `%(name)s` substitutions
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub steps: Vec<StepSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source location: `https://...`, `file://...` or a plain path
    ///
    /// Supports `%(version)s` substitution.
    pub uri: String,
    /// Integrity hash (`sha256:...` or `xxh128:...`)
    pub checksum: String,
    /// Extract the fetched file as a tar archive
    #[serde(default)]
    pub unpack: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Dependencies: `["zlib", "openssl >= 3.0", "make@4.4"]`
    #[serde(default)]
    pub requires: Vec<String>,
    /// Environment variables exported to every step
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Parallel job hint exported as `GALLEY_JOBS` (default: engine setting)
    #[serde(default)]
    pub jobs: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSection {
    pub name: String,
    pub run: String,
    /// Run only when this flag is enabled
    #[serde(default)]
    pub when: Option<String>,
    /// Run only when this flag is disabled
    #[serde(default)]
    pub unless: Option<String>,
}

/// Identity of a recipe: name plus version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipeId {
    pub name: String,
    pub version: PackageVersion,
}

impl RecipeId {
    pub fn new(name: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Check the package-name grammar `[A-Za-z0-9][A-Za-z0-9._+-]*`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

/// A dependency on another recipe, optionally version-constrained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    /// Parse `name`, `name >= 1.0`, `name>=1.0, <2` or `name@1.2.3`
    ///
    /// Returns a human-readable reason on failure.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        let name_end = spec
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')))
            .unwrap_or(spec.len());
        let (name, rest) = spec.split_at(name_end);

        if !is_valid_name(name) {
            return Err(format!("invalid dependency identifier '{}'", spec));
        }

        let rest = rest.trim();
        let constraint = if let Some(pinned) = rest.strip_prefix('@') {
            PackageVersion::parse(pinned)
                .map(VersionConstraint::Exact)
                .map_err(|e| format!("invalid dependency '{}': {}", spec, e))?
        } else {
            VersionConstraint::parse(rest)
                .map_err(|e| format!("invalid dependency '{}': {}", spec, e))?
        };

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::Any,
        }
    }

    pub fn matches(&self, id: &RecipeId) -> bool {
        self.name == id.name && self.constraint.satisfies(&id.version)
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_any() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} {}", self.name, self.constraint)
        }
    }
}

/// Where a recipe's source comes from and how to check it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub uri: String,
    pub checksum: ContentHash,
    pub unpack: bool,
}

/// One build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub name: String,
    pub run: String,
    pub when: Option<String>,
    pub unless: Option<String>,
}

/// A validated build recipe
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: RecipeId,
    pub summary: Option<String>,
    pub license: Option<String>,
    pub source: Option<SourceSpec>,
    pub dependencies: Vec<DependencySpec>,
    pub options: BTreeMap<String, bool>,
    pub variables: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub jobs: Option<u32>,
    pub steps: Vec<BuildStep>,
}

impl Recipe {
    #[inline]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    #[inline]
    pub fn version(&self) -> &PackageVersion {
        &self.id.version
    }

    pub fn declares_option(&self, flag: &str) -> bool {
        self.options.contains_key(flag)
    }

    /// Substitute variables in a string
    ///
    /// Replaces `%(name)s` patterns with:
    /// 1. Built-in variables (`name`, `version`, `out`, `src`)
    /// 2. Custom variables from the `[variables]` section
    pub fn substitute(&self, template: &str, out: &str, src: &str) -> String {
        let mut result = template.to_string();

        result = result.replace("%(name)s", &self.id.name);
        result = result.replace("%(version)s", self.id.version.as_str());
        result = result.replace("%(out)s", out);
        result = result.replace("%(src)s", src);

        for (key, value) in &self.variables {
            result = result.replace(&format!("%({})s", key), value);
        }

        result
    }

    /// Source URI with variables substituted
    pub fn source_uri(&self) -> Option<String> {
        self.source.as_ref().map(|s| self.substitute(&s.uri, "", ""))
    }
}
