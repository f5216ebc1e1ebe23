//! Recipe model and recording.
//!
//! A [`Recipe`] is the declarative description of an image before variable
//! substitution and flattening: a base image, ordered items, nested
//! working-directory scopes, `skip` blocks and artifact downloads.
//!
//! Recipes are recorded through [`RecipeCtx`], either directly from Rust or
//! from a Lua recipe file via the globals in [`lua`].

mod ctx;
pub mod lua;
mod types;

pub use ctx::{Block, RecipeCtx, staging_path};
pub use types::{Item, Recipe, RecipeError};
