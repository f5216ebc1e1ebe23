//! Recipe file evaluation.
//!
//! This module provides [`load_recipe`], which reads a recipe from disk and
//! returns the recorded [`Recipe`]. Lua recipes are evaluated with the recipe
//! DSL registered as globals; `.json` files are deserialized directly.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, info};

use crate::recipe::{Recipe, RecipeCtx, RecipeError, lua::register_globals};

/// Errors that can occur during recipe evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
  /// Lua evaluation error, including errors raised by DSL calls.
  #[error("lua error: {0}")]
  Lua(#[from] LuaError),

  /// The recorded recipe is malformed.
  #[error("recipe error: {0}")]
  Recipe(#[from] RecipeError),

  #[error("cannot read {path}: {message}")]
  Io { path: String, message: String },

  #[error("invalid JSON recipe {path}: {message}")]
  Json { path: String, message: String },
}

/// Load a recipe file, dispatching on its extension.
pub fn load_recipe(path: &Path) -> Result<Recipe, EvalError> {
  match path.extension().and_then(|e| e.to_str()) {
    Some("json") => load_json_recipe(path),
    _ => evaluate_recipe(path),
  }
}

/// Evaluate a Lua recipe file.
///
/// `box.dir` is set to the canonical directory of the file, and its `lua/`
/// subdirectory (if present) is prepended to `package.path` so recipes can
/// `require` shared helpers.
///
/// # Example
/// ```ignore
/// use std::path::Path;
/// use boxlua_lib::eval::evaluate_recipe;
///
/// let recipe = evaluate_recipe(Path::new("release.lua"))?;
/// println!("Requires: {:?}", recipe.requires);
/// ```
pub fn evaluate_recipe(path: &Path) -> Result<Recipe, EvalError> {
  let canonical = dunce::canonicalize(path).map_err(|e| io_error(path, e))?;
  let source = std::fs::read_to_string(&canonical).map_err(|e| io_error(&canonical, e))?;
  let dir = canonical.parent().unwrap_or(Path::new("."));

  let recipe = evaluate_recipe_str(&source, &canonical.to_string_lossy(), dir)?;

  info!(
    path = %canonical.display(),
    items = recipe.items.len(),
    requires = recipe.requires.len(),
    "evaluated recipe"
  );
  Ok(recipe)
}

/// Evaluate Lua recipe source. `name` is used in Lua error messages and `dir`
/// is exposed as `box.dir`.
pub fn evaluate_recipe_str(source: &str, name: &str, dir: &Path) -> Result<Recipe, EvalError> {
  let ctx = Rc::new(RefCell::new(RecipeCtx::new()));

  // Evaluate in a block so the Lua state drops its handles on ctx first.
  {
    let lua = Lua::new();
    let dir_str = dir.to_string_lossy().replace('\\', "/");
    register_globals(&lua, ctx.clone(), &dir_str)?;

    let lua_dir = dir.join("lua");
    if lua_dir.is_dir() {
      set_package_path(&lua, &lua_dir)?;
    }

    lua.load(source).set_name(format!("@{}", name)).exec()?;
  }

  Ok(ctx.take().finish()?)
}

fn load_json_recipe(path: &Path) -> Result<Recipe, EvalError> {
  let content = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
  let recipe = Recipe::from_json(&content).map_err(|e| EvalError::Json {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;
  info!(path = %path.display(), items = recipe.items.len(), "loaded JSON recipe");
  Ok(recipe)
}

/// Prepend `lua_dir` to package.path in the Lua runtime.
fn set_package_path(lua: &Lua, lua_dir: &Path) -> LuaResult<()> {
  let lua_dir_str = lua_dir.to_string_lossy().replace('\\', "/");
  let new_paths = format!("{0}/?.lua;{0}/?/init.lua", lua_dir_str);

  let package: LuaTable = lua.globals().get("package")?;
  let current_path: String = package.get("path")?;
  package.set("path", format!("{};{}", new_paths, current_path))?;

  debug!(package_path = %new_paths, "set package.path");
  Ok(())
}

fn io_error(path: &Path, e: std::io::Error) -> EvalError {
  EvalError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// Collect build variables from the process environment, then apply
/// `overrides` in order (later entries win). Variables that are not valid
/// UTF-8 are skipped.
pub fn collect_variables<'a>(overrides: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
  let mut vars: BTreeMap<String, String> = std::env::vars_os()
    .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
    .collect();
  for (key, value) in overrides {
    vars.insert(key.to_string(), value.to_string());
  }
  vars
}
