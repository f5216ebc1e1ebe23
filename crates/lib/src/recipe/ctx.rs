use std::collections::BTreeSet;

use crate::consts::STAGING_DIR;
use crate::placeholder;

use super::types::{Item, Recipe, RecipeError, collect_vars};

/// An open block in a [`RecipeCtx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
  /// `inside(path) { ... }`
  Inside { path: String },
  /// `skip { ... }`
  Skip,
  /// `download(name, url) { ... }`
  Download {
    path: String,
    url: String,
    sha256: Option<String>,
  },
}

#[derive(Debug)]
struct Frame {
  block: Block,
  items: Vec<Item>,
}

/// Context for recording a recipe.
///
/// Each method call appends an item to the innermost open block. Blocks are
/// opened with [`open`](Self::open) and closed with [`close`](Self::close),
/// or recorded in one go through the closure helpers
/// ([`inside`](Self::inside), [`skip`](Self::skip), [`download`](Self::download)).
///
/// Every `${NAME}` referenced by a recorded argument is added to the recipe's
/// required variables, so a build against an environment lacking `NAME`
/// fails before any step runs.
///
/// # Example
///
/// ```
/// use boxlua_lib::recipe::RecipeCtx;
///
/// let mut ctx = RecipeCtx::new();
/// ctx.from("debian:latest").unwrap();
/// let version = ctx.getenv("VERSION");
/// ctx.inside(&format!("/tmp/ldnsd-{version}"), |ctx| {
///   ctx.run("mv -v ldnsd ldnsctl /usr/local/bin");
/// });
/// ctx.set_exec(["/entrypoint.sh"], ["/usr/local/bin/ldnsd"]);
///
/// let recipe = ctx.finish().unwrap();
/// assert!(recipe.requires.contains("VERSION"));
/// ```
#[derive(Debug, Default)]
pub struct RecipeCtx {
  from: Option<String>,
  requires: BTreeSet<String>,
  items: Vec<Item>,
  frames: Vec<Frame>,
}

impl RecipeCtx {
  /// Create a new empty recipe context.
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the base image. May only be called once.
  pub fn from(&mut self, image: &str) -> Result<(), RecipeError> {
    if let Some(existing) = &self.from {
      return Err(RecipeError::DuplicateBase {
        existing: existing.clone(),
        new: image.to_string(),
      });
    }
    collect_vars(image, &mut self.requires);
    self.from = Some(image.to_string());
    Ok(())
  }

  /// Declare `name` as a required build variable and return the placeholder
  /// that resolves to its value.
  pub fn getenv(&mut self, name: &str) -> String {
    self.requires.insert(name.to_string());
    placeholder::reference(name)
  }

  /// Record a shell command.
  pub fn run(&mut self, cmd: &str) {
    self.push(Item::Run { cmd: cmd.to_string() });
  }

  /// Record a copy from the build context into the image.
  pub fn copy(&mut self, src: &str, dst: &str) {
    self.push(Item::Copy {
      src: src.to_string(),
      dst: dst.to_string(),
    });
  }

  /// Record an image environment variable.
  pub fn env(&mut self, key: &str, value: &str) {
    self.push(Item::Env {
      key: key.to_string(),
      value: value.to_string(),
    });
  }

  /// Record the image entrypoint and default command.
  pub fn set_exec<E, C>(&mut self, entrypoint: E, cmd: C)
  where
    E: IntoIterator,
    E::Item: Into<String>,
    C: IntoIterator,
    C::Item: Into<String>,
  {
    self.push(Item::SetExec {
      entrypoint: entrypoint.into_iter().map(Into::into).collect(),
      cmd: cmd.into_iter().map(Into::into).collect(),
    });
  }

  /// Open a block. Items recorded until the matching [`close`](Self::close)
  /// become its children.
  pub fn open(&mut self, block: Block) {
    match &block {
      Block::Inside { path } => collect_vars(path, &mut self.requires),
      Block::Skip => {}
      Block::Download { path, url, sha256 } => {
        collect_vars(path, &mut self.requires);
        collect_vars(url, &mut self.requires);
        if let Some(sha256) = sha256 {
          collect_vars(sha256, &mut self.requires);
        }
      }
    }
    self.frames.push(Frame {
      block,
      items: Vec::new(),
    });
  }

  /// Close the innermost open block.
  pub fn close(&mut self) -> Result<(), RecipeError> {
    let frame = self.frames.pop().ok_or(RecipeError::UnbalancedBlock)?;
    let item = match frame.block {
      Block::Inside { path } => Item::Inside {
        path,
        items: frame.items,
      },
      Block::Skip => Item::Skip { items: frame.items },
      Block::Download { path, url, sha256 } => Item::Download {
        path,
        url,
        sha256,
        items: frame.items,
      },
    };
    self.current().push(item);
    Ok(())
  }

  /// Record items that run with `path` as their working directory.
  pub fn inside(&mut self, path: &str, f: impl FnOnce(&mut Self)) {
    self.open(Block::Inside { path: path.to_string() });
    f(self);
    self.close_opened();
  }

  /// Record items that are excluded when building from a cached artifact.
  pub fn skip(&mut self, f: impl FnOnce(&mut Self)) {
    self.open(Block::Skip);
    f(self);
    self.close_opened();
  }

  /// Record an artifact download. The closure receives the staging path;
  /// the artifact is released after the closure's items.
  pub fn download(&mut self, name: &str, url: &str, sha256: Option<&str>, f: impl FnOnce(&mut Self, &str)) {
    let path = staging_path(name);
    self.open(Block::Download {
      path: path.clone(),
      url: url.to_string(),
      sha256: sha256.map(str::to_string),
    });
    f(self, &path);
    self.close_opened();
  }

  /// Consume the context and return the recorded recipe.
  pub fn finish(self) -> Result<Recipe, RecipeError> {
    if !self.frames.is_empty() {
      return Err(RecipeError::UnclosedBlock(self.frames.len()));
    }
    Ok(Recipe {
      from: self.from,
      requires: self.requires,
      items: self.items,
    })
  }

  fn push(&mut self, item: Item) {
    for arg in item.args() {
      collect_vars(arg, &mut self.requires);
    }
    self.current().push(item);
  }

  fn current(&mut self) -> &mut Vec<Item> {
    match self.frames.last_mut() {
      Some(frame) => &mut frame.items,
      None => &mut self.items,
    }
  }

  // The closure helpers open exactly one frame, so closing cannot fail.
  fn close_opened(&mut self) {
    let _ = self.close();
  }
}

/// Staging path of an artifact named `name`.
///
/// Absolute names are used as-is; bare names are placed in the staging
/// directory.
pub fn staging_path(name: &str) -> String {
  if name.starts_with('/') {
    name.to_string()
  } else {
    format!("{}{}", STAGING_DIR, name)
  }
}
