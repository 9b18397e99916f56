// src/recipe/options.rs

//! Build configuration flags
//!
//! Recipes declare flags with defaults in `[options]`. A build resolves
//! them into an explicit [`BuildOptions`] value per recipe, combining the
//! defaults with caller overrides, and hands that value to the executor.

use crate::error::ParseError;
use crate::recipe::format::{BuildStep, Recipe};
use std::collections::BTreeMap;
use std::fmt;

/// Effective flag values for one recipe build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    flags: BTreeMap<String, bool>,
}

impl BuildOptions {
    /// Options for a recipe with only its declared defaults
    pub fn defaults(recipe: &Recipe) -> Self {
        Self {
            flags: recipe.options.clone(),
        }
    }

    pub fn is_enabled(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    /// Whether a step's `when`/`unless` guards allow it to run
    pub fn allows(&self, step: &BuildStep) -> bool {
        let when_ok = step.when.as_deref().is_none_or(|f| self.is_enabled(f));
        let unless_ok = step.unless.as_deref().is_none_or(|f| !self.is_enabled(f));
        when_ok && unless_ok
    }

    /// Flags in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn enabled_flags(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().filter(|(_, v)| **v).map(|(k, _)| k.as_str())
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .flags
            .iter()
            .map(|(k, v)| format!("{}{}", if *v { "+" } else { "-" }, k))
            .collect();
        f.write_str(&rendered.join(" "))
    }
}

/// A caller request to set a flag, optionally scoped to one recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagOverride {
    /// `None` applies to every recipe declaring the flag
    pub recipe: Option<String>,
    pub flag: String,
    pub enabled: bool,
}

impl FlagOverride {
    /// Parse `flag` or `recipe:flag`
    pub fn parse(spec: &str, enabled: bool) -> Self {
        match spec.split_once(':') {
            Some((recipe, flag)) => Self {
                recipe: Some(recipe.trim().to_string()),
                flag: flag.trim().to_string(),
                enabled,
            },
            None => Self {
                recipe: None,
                flag: spec.trim().to_string(),
                enabled,
            },
        }
    }

    fn applies_to(&self, recipe: &Recipe) -> bool {
        self.recipe.as_deref().is_none_or(|name| name == recipe.name())
            && recipe.declares_option(&self.flag)
    }
}

/// The full set of caller overrides for a build
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    overrides: Vec<FlagOverride>,
}

impl OptionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(mut self, spec: &str) -> Self {
        self.overrides.push(FlagOverride::parse(spec, true));
        self
    }

    pub fn disable(mut self, spec: &str) -> Self {
        self.overrides.push(FlagOverride::parse(spec, false));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Effective options for one recipe; later overrides win
    pub fn apply(&self, recipe: &Recipe) -> BuildOptions {
        let mut options = BuildOptions::defaults(recipe);
        for o in self.overrides.iter().filter(|o| o.applies_to(recipe)) {
            options.flags.insert(o.flag.clone(), o.enabled);
        }
        options
    }

    /// Reject overrides that no recipe in the set declares
    pub fn validate<'a>(
        &self,
        recipes: impl IntoIterator<Item = &'a Recipe> + Clone,
    ) -> Result<(), ParseError> {
        for o in &self.overrides {
            let declared = recipes.clone().into_iter().any(|r| o.applies_to(r));
            if !declared {
                return Err(ParseError::InvalidOptionReference {
                    recipe: o.recipe.clone().unwrap_or_else(|| "*".to_string()),
                    step: "<override>".to_string(),
                    flag: o.flag.clone(),
                });
            }
        }
        Ok(())
    }
}
