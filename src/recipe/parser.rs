// src/recipe/parser.rs

//! Recipe file parsing and validation

use crate::error::ParseError;
use crate::hash::ContentHash;
use crate::recipe::format::{
    is_valid_name, BuildStep, DependencySpec, Recipe, RecipeFile, RecipeId, SourceSpec,
};
use crate::version::PackageVersion;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Parse and validate a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<Recipe, ParseError> {
    parse_recipe_from(content, "<inline>")
}

/// Parse and validate a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_recipe_from(&content, &path.display().to_string())
}

/// Parse with `origin` naming the document in error messages
pub fn parse_recipe_from(content: &str, origin: &str) -> Result<Recipe, ParseError> {
    let file: RecipeFile = toml::from_str(content)
        .map_err(|e| ParseError::malformed(origin, e.message().to_string()))?;

    let recipe = build_recipe(file, origin)?;
    let warnings = validate_recipe(&recipe)?;
    for warning in &warnings {
        debug!("{}: {}", recipe.id, warning);
    }

    Ok(recipe)
}

fn build_recipe(file: RecipeFile, origin: &str) -> Result<Recipe, ParseError> {
    let name = file.package.name.trim().to_string();
    if name.is_empty() {
        return Err(ParseError::malformed(origin, "package.name cannot be empty"));
    }
    if !is_valid_name(&name) {
        return Err(ParseError::malformed(
            origin,
            format!("package.name '{}' is not a valid identifier", name),
        ));
    }

    let version = PackageVersion::parse(&file.package.version)
        .map_err(|e| ParseError::malformed(origin, format!("package.version: {}", e)))?;

    let source = file
        .source
        .map(|s| {
            if s.uri.trim().is_empty() {
                return Err(ParseError::malformed(origin, "source.uri cannot be empty"));
            }
            let checksum = ContentHash::parse_prefixed(&s.checksum).map_err(|e| {
                ParseError::malformed(
                    origin,
                    format!(
                        "source.checksum '{}': {} (expected sha256:... or xxh128:...)",
                        s.checksum, e
                    ),
                )
            })?;
            Ok(SourceSpec {
                uri: s.uri,
                checksum,
                unpack: s.unpack,
            })
        })
        .transpose()?;

    let dependencies = file
        .build
        .requires
        .iter()
        .map(|spec| DependencySpec::parse(spec).map_err(|reason| ParseError::malformed(origin, reason)))
        .collect::<Result<Vec<_>, _>>()?;

    let steps = file
        .steps
        .into_iter()
        .map(|s| BuildStep {
            name: s.name.trim().to_string(),
            run: s.run,
            when: s.when.map(|f| f.trim().to_string()),
            unless: s.unless.map(|f| f.trim().to_string()),
        })
        .collect();

    Ok(Recipe {
        id: RecipeId::new(name, version),
        summary: file.package.summary,
        license: file.package.license,
        source,
        dependencies,
        options: file.options,
        variables: file.variables,
        environment: file.build.environment,
        jobs: file.build.jobs,
        steps,
    })
}

/// Validate a recipe for completeness and correctness
///
/// Returns non-fatal warnings on success.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>, ParseError> {
    let origin = recipe.id.to_string();
    let mut warnings = Vec::new();

    let mut step_names = HashSet::new();
    for step in &recipe.steps {
        if step.name.is_empty() {
            return Err(ParseError::malformed(&origin, "step name cannot be empty"));
        }
        if step.run.trim().is_empty() {
            return Err(ParseError::malformed(
                &origin,
                format!("step '{}' has an empty run command", step.name),
            ));
        }
        if !step_names.insert(step.name.as_str()) {
            return Err(ParseError::malformed(
                &origin,
                format!("duplicate step name '{}'", step.name),
            ));
        }

        for flag in step.when.iter().chain(step.unless.iter()) {
            if !recipe.declares_option(flag) {
                return Err(ParseError::InvalidOptionReference {
                    recipe: origin.clone(),
                    step: step.name.clone(),
                    flag: flag.clone(),
                });
            }
        }
    }

    for flag in recipe.options.keys() {
        if !is_valid_name(flag) {
            return Err(ParseError::malformed(
                &origin,
                format!("option name '{}' is not a valid identifier", flag),
            ));
        }
    }

    let mut seen = HashSet::new();
    for dep in &recipe.dependencies {
        if dep.name == recipe.id.name {
            return Err(ParseError::malformed(
                &origin,
                format!("recipe depends on itself via '{}'", dep),
            ));
        }
        if !seen.insert(dep.name.as_str()) {
            warnings.push(format!("dependency '{}' listed more than once", dep.name));
        }
    }

    if recipe.summary.is_none() {
        warnings.push("Missing package summary".to_string());
    }
    if recipe.license.is_none() {
        warnings.push("Missing package license".to_string());
    }
    if recipe.steps.is_empty() {
        warnings.push("No build steps; artifact will be empty".to_string());
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[package]
name = "zlib"
version = "1.3.1"
summary = "compression library"
license = "Zlib"

[source]
uri = "https://zlib.net/zlib-%(version)s.tar.gz"
checksum = "sha256:9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
unpack = true

[build]
requires = ["libc", "make >= 4.0"]

[build.environment]
CFLAGS = "-O2"

[options]
static = false

[variables]
prefix = "/usr"

[[steps]]
name = "configure"
run = "./configure --prefix=%(prefix)s"

[[steps]]
name = "static"
run = "make static"
when = "static"
"#;

    #[test]
    fn test_parse_valid_recipe() {
        let recipe = parse_recipe(VALID).unwrap();
        assert_eq!(recipe.id.to_string(), "zlib@1.3.1");
        assert_eq!(recipe.dependencies.len(), 2);
        assert_eq!(recipe.dependencies[1].to_string(), "make >= 4.0");
        assert_eq!(recipe.steps.len(), 2);
        assert_eq!(recipe.environment.get("CFLAGS").map(String::as_str), Some("-O2"));
        assert_eq!(
            recipe.source_uri().unwrap(),
            "https://zlib.net/zlib-1.3.1.tar.gz"
        );
        assert!(recipe.source.as_ref().unwrap().unpack);
    }

    #[test]
    fn test_substitute_variables() {
        let recipe = parse_recipe(VALID).unwrap();
        let cmd = recipe.substitute(&recipe.steps[0].run, "/out", "/src");
        assert_eq!(cmd, "./configure --prefix=/usr");
        assert_eq!(recipe.substitute("%(name)s-%(out)s-%(src)s", "/o", "/s"), "zlib-/o-/s");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = parse_recipe("this is not valid toml at all {}").unwrap_err();
        assert!(matches!(err, ParseError::MalformedRecipe { .. }));
    }

    #[test]
    fn test_missing_required_field() {
        let err = parse_recipe("[package]\nname = \"zlib\"\n").unwrap_err();
        match err {
            ParseError::MalformedRecipe { reason, .. } => assert!(reason.contains("version")),
            other => panic!("unexpected error: {other}"),
        }

        let err = parse_recipe("[package]\nversion = \"1\"\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedRecipe { .. }));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = parse_recipe("[package]\nname = \"\"\nversion = \"1.0\"\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedRecipe { .. }));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let content = r#"
[package]
name = "test"
version = "1.0"

[source]
uri = "https://example.com/test.tar.gz"
checksum = "md5:abc123"
"#;
        assert!(matches!(
            parse_recipe(content).unwrap_err(),
            ParseError::MalformedRecipe { .. }
        ));
    }

    #[test]
    fn test_undeclared_option_reference() {
        let content = r#"
[package]
name = "test"
version = "1.0"

[options]
shared = true

[[steps]]
name = "lto"
run = "make lto"
when = "lto"
"#;
        match parse_recipe(content).unwrap_err() {
            ParseError::InvalidOptionReference { step, flag, .. } => {
                assert_eq!(step, "lto");
                assert_eq!(flag, "lto");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_dependency() {
        let content = r#"
[package]
name = "test"
version = "1.0"

[build]
requires = ["ok", "not valid!"]
"#;
        assert!(matches!(
            parse_recipe(content).unwrap_err(),
            ParseError::MalformedRecipe { .. }
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let content = r#"
[package]
name = "test"
version = "1.0"

[build]
requires = ["test"]
"#;
        assert!(parse_recipe(content).is_err());
    }

    #[test]
    fn test_duplicate_and_empty_steps() {
        let dup = r#"
[package]
name = "test"
version = "1.0"

[[steps]]
name = "make"
run = "make"

[[steps]]
name = "make"
run = "make install"
"#;
        assert!(parse_recipe(dup).is_err());

        let empty = r#"
[package]
name = "test"
version = "1.0"

[[steps]]
name = "make"
run = "   "
"#;
        assert!(parse_recipe(empty).is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let recipe = parse_recipe("[package]\nname = \"test\"\nversion = \"1.0\"\n").unwrap();
        let warnings = validate_recipe(&recipe).unwrap();
        assert!(warnings.iter().any(|w| w.contains("summary")));
        assert!(warnings.iter().any(|w| w.contains("license")));
        assert!(warnings.iter().any(|w| w.contains("steps")));
    }

    #[test]
    fn test_parse_recipe_file_missing() {
        let err = parse_recipe_file(Path::new("/nonexistent/recipe.toml")).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
