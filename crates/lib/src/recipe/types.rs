use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placeholder::{self, Resolver};

/// A single recipe declaration.
///
/// Leaf items map one-to-one onto plan steps. Block items (`Inside`, `Skip`,
/// `Download`) contain nested items and are flattened by the plan builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
  /// Run a shell command.
  Run { cmd: String },
  /// Copy a file or directory from the build context into the image.
  Copy { src: String, dst: String },
  /// Set an image environment variable.
  Env { key: String, value: String },
  /// Set the image entrypoint and default command.
  SetExec { entrypoint: Vec<String>, cmd: Vec<String> },
  /// Execute nested items with `path` as the working directory.
  Inside { path: String, items: Vec<Item> },
  /// Nested items excluded when building from a cached artifact.
  Skip { items: Vec<Item> },
  /// Fetch `url` to `path`, run nested items, then release `path`.
  Download {
    path: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    items: Vec<Item>,
  },
}

impl Item {
  /// Returns the string arguments carried by this item itself (nested items
  /// are not included).
  pub fn args(&self) -> Vec<&str> {
    match self {
      Item::Run { cmd } => vec![cmd.as_str()],
      Item::Copy { src, dst } => vec![src.as_str(), dst.as_str()],
      Item::Env { key, value } => vec![key.as_str(), value.as_str()],
      Item::SetExec { entrypoint, cmd } => entrypoint.iter().chain(cmd.iter()).map(|s| s.as_str()).collect(),
      Item::Inside { path, .. } => vec![path.as_str()],
      Item::Skip { .. } => Vec::new(),
      Item::Download { path, url, sha256, .. } => {
        let mut args = vec![path.as_str(), url.as_str()];
        if let Some(sha256) = sha256 {
          args.push(sha256.as_str());
        }
        args
      }
    }
  }

  /// Returns the nested items of a block, or an empty slice for leaf items.
  pub fn children(&self) -> &[Item] {
    match self {
      Item::Inside { items, .. } | Item::Skip { items } | Item::Download { items, .. } => items,
      _ => &[],
    }
  }
}

/// A complete image recipe.
///
/// Recipes are produced by evaluating a Lua recipe file, by deserializing
/// JSON, or programmatically through [`RecipeCtx`](super::RecipeCtx).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
  /// Base image reference.
  #[serde(default)]
  pub from: Option<String>,

  /// Variables that must be present in the build environment.
  #[serde(default)]
  pub requires: BTreeSet<String>,

  /// Top-level items, in declaration order.
  #[serde(default)]
  pub items: Vec<Item>,
}

impl Recipe {
  /// Parse a recipe from its JSON form.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Required variables absent from `env`, in sorted order.
  pub fn missing_variables<'a>(&'a self, env: &impl Resolver) -> Vec<&'a str> {
    self
      .requires
      .iter()
      .filter(|name| env.resolve_var(name).is_err())
      .map(|s| s.as_str())
      .collect()
  }

  /// Every variable referenced anywhere in the recipe, including inside
  /// blocks that a particular build may exclude.
  ///
  /// Malformed placeholders are ignored here; they are reported when the plan
  /// is built.
  pub fn referenced_variables(&self) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Some(from) = &self.from {
      collect_vars(from, &mut names);
    }
    let mut stack: Vec<&Item> = self.items.iter().collect();
    while let Some(item) = stack.pop() {
      for arg in item.args() {
        collect_vars(arg, &mut names);
      }
      stack.extend(item.children());
    }
    names
  }

  /// Returns true if no item sets the entrypoint.
  pub fn lacks_set_exec(&self) -> bool {
    let mut stack: Vec<&Item> = self.items.iter().collect();
    while let Some(item) = stack.pop() {
      if matches!(item, Item::SetExec { .. }) {
        return false;
      }
      stack.extend(item.children());
    }
    true
  }
}

pub(crate) fn collect_vars(input: &str, names: &mut BTreeSet<String>) {
  if let Ok(vars) = placeholder::variables(input) {
    names.extend(vars);
  }
}

/// Errors raised while recording or loading a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipeError {
  #[error("base image already set to '{existing}', cannot set it to '{new}'")]
  DuplicateBase { existing: String, new: String },

  #[error("block closed without a matching open")]
  UnbalancedBlock,

  #[error("{0} block(s) left open at end of recipe")]
  UnclosedBlock(usize),
}
