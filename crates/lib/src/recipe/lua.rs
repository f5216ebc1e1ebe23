//! Lua bindings for recording recipes.
//!
//! Registers the recipe DSL as Lua globals:
//! - `from(image)`, `run(cmd)`, `copy(src, dst)`
//! - `env(key, value)` or `env{ KEY = value, ... }`
//! - `inside(path, fn)`, `skip(fn)`, `download(name, url, fn(path) [, sha256])`
//! - `set_exec{ entrypoint = {...}, cmd = {...} }`
//! - `getenv(name)` - declare a required variable, returns its placeholder
//! - `box.dir` - directory of the recipe file

use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;

use super::ctx::{Block, RecipeCtx, staging_path};

/// Register the recipe globals in the Lua runtime.
pub fn register_globals(lua: &Lua, ctx: Rc<RefCell<RecipeCtx>>, dir: &str) -> LuaResult<()> {
  let globals = lua.globals();

  let box_table = lua.create_table()?;
  box_table.set("dir", dir)?;
  box_table.set("version", env!("CARGO_PKG_VERSION"))?;
  globals.set("box", box_table)?;

  let c = ctx.clone();
  globals.set(
    "from",
    lua.create_function(move |_, image: String| c.borrow_mut().from(&image).map_err(LuaError::external))?,
  )?;

  let c = ctx.clone();
  globals.set(
    "getenv",
    lua.create_function(move |_, name: String| Ok(c.borrow_mut().getenv(&name)))?,
  )?;

  let c = ctx.clone();
  globals.set(
    "run",
    lua.create_function(move |_, cmd: String| {
      c.borrow_mut().run(&cmd);
      Ok(())
    })?,
  )?;

  let c = ctx.clone();
  globals.set(
    "copy",
    lua.create_function(move |_, (src, dst): (String, String)| {
      c.borrow_mut().copy(&src, &dst);
      Ok(())
    })?,
  )?;

  let c = ctx.clone();
  globals.set(
    "env",
    lua.create_function(move |_, (key, value): (LuaValue, Option<String>)| {
      let pairs = env_pairs(key, value)?;
      let mut ctx = c.borrow_mut();
      for (key, value) in pairs {
        ctx.env(&key, &value);
      }
      Ok(())
    })?,
  )?;

  let c = ctx.clone();
  globals.set(
    "set_exec",
    lua.create_function(move |_, spec: LuaTable| {
      let entrypoint = string_list(&spec, "entrypoint")?;
      let cmd = string_list(&spec, "cmd")?;
      c.borrow_mut().set_exec(entrypoint, cmd);
      Ok(())
    })?,
  )?;

  let c = ctx.clone();
  globals.set(
    "inside",
    lua.create_function(move |_, (path, f): (String, LuaFunction)| {
      c.borrow_mut().open(Block::Inside { path });
      f.call::<()>(())?;
      c.borrow_mut().close().map_err(LuaError::external)
    })?,
  )?;

  let c = ctx.clone();
  globals.set(
    "skip",
    lua.create_function(move |_, f: LuaFunction| {
      c.borrow_mut().open(Block::Skip);
      f.call::<()>(())?;
      c.borrow_mut().close().map_err(LuaError::external)
    })?,
  )?;

  let c = ctx;
  globals.set(
    "download",
    lua.create_function(
      move |_, (name, url, f, sha256): (String, String, LuaFunction, Option<String>)| {
        let path = staging_path(&name);
        c.borrow_mut().open(Block::Download {
          path: path.clone(),
          url,
          sha256,
        });
        f.call::<()>(path)?;
        c.borrow_mut().close().map_err(LuaError::external)
      },
    )?,
  )?;

  Ok(())
}

/// Accept both `env(key, value)` and `env{ KEY = value }`.
///
/// Table entries are returned sorted by key since Lua table iteration order
/// is unspecified.
fn env_pairs(key: LuaValue, value: Option<String>) -> LuaResult<Vec<(String, String)>> {
  match (key, value) {
    (LuaValue::String(key), Some(value)) => Ok(vec![(key.to_str()?.to_string(), value)]),
    (LuaValue::Table(table), None) => {
      let mut pairs = Vec::new();
      for pair in table.pairs::<String, String>() {
        pairs.push(pair?);
      }
      pairs.sort();
      Ok(pairs)
    }
    (LuaValue::String(_), None) => Err(LuaError::external("env(key, value) requires a value")),
    (other, _) => Err(LuaError::external(format!(
      "env expects a key and value or a table, got {}",
      other.type_name()
    ))),
  }
}

fn string_list(table: &LuaTable, field: &str) -> LuaResult<Vec<String>> {
  match table.get::<Option<LuaTable>>(field)? {
    Some(list) => list.sequence_values::<String>().collect(),
    None => Ok(Vec::new()),
  }
}
