// src/recipe/mod.rs

//! Recipe documents and the store that holds them
//!
//! A recipe describes how to build one package from source:
//! - Source archive and its checksum
//! - Build dependencies on other recipes
//! - Ordered build steps, optionally guarded by configuration flags
//!
//! # Culinary Terminology
//!
//! - **Recipe**: The build specification (like a recipe card)
//! - **Kitchen**: The isolated build environment that cooks it
//! - **Ingredients**: Source archives and dependency artifacts
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "nginx"
//! version = "1.24.0"
//!
//! [source]
//! uri = "https://nginx.org/download/nginx-%(version)s.tar.gz"
//! checksum = "sha256:abc123..."
//! unpack = true
//!
//! [build]
//! requires = ["openssl >= 3.0", "pcre", "zlib"]
//!
//! [options]
//! http2 = true
//!
//! [[steps]]
//! name = "configure"
//! run = "./configure --prefix=%(out)s"
//!
//! [[steps]]
//! name = "install"
//! run = "make -j$GALLEY_JOBS install"
//! ```

mod format;
mod options;
pub mod parser;
mod store;

pub use format::{
    is_valid_name, BuildSection, BuildStep, DependencySpec, PackageSection, Recipe, RecipeFile,
    RecipeId, SourceSection, SourceSpec, StepSection,
};
pub use options::{BuildOptions, FlagOverride, OptionOverrides};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
pub use store::{RecipeLookup, RecipeStore};
