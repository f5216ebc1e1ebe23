//! Plan construction.
//!
//! [`build`] turns a [`Recipe`] into a [`Plan`]:
//! 1. Checks that every required variable is bound
//! 2. Substitutes `${NAME}` references in every step argument
//! 3. Flattens scopes depth-first into `EnterScope` / `ExitScope` pairs
//! 4. Expands downloads into `Fetch` / `Release` pairs
//! 5. Drops `skip` blocks when building from a cached artifact
//!
//! The result depends only on the recipe, the variables and the options, so
//! identical inputs always produce identical plans.

pub mod scope;
mod types;

pub use types::{BuildError, BuildOptions, Plan, PlanError, Step};

use tracing::{debug, info, warn};

use crate::consts::ROOT_SCOPE;
use crate::placeholder::{self, PlaceholderError, Resolver};
use crate::recipe::{Item, Recipe};

/// Build a plan from a recipe.
///
/// # Errors
///
/// - [`BuildError::MissingVariable`] if a required variable is not bound
/// - [`BuildError::MissingBaseImage`] if the recipe has no `from`
/// - [`BuildError::UnresolvedVariable`] / [`BuildError::Placeholder`] if a
///   step argument cannot be substituted
pub fn build(recipe: &Recipe, env: &impl Resolver, options: &BuildOptions) -> Result<Plan, BuildError> {
  if let Some(name) = recipe.missing_variables(env).first() {
    return Err(BuildError::MissingVariable(name.to_string()));
  }

  let from = recipe.from.as_deref().ok_or(BuildError::MissingBaseImage)?;

  for name in recipe.referenced_variables().difference(&recipe.requires) {
    warn!(variable = %name, "variable is referenced but not declared in requires");
  }

  if recipe.lacks_set_exec() {
    warn!("recipe never calls set_exec, image will have no entrypoint");
  }

  let mut flattener = Flattener {
    env,
    options,
    steps: Vec::new(),
    scopes: Vec::new(),
  };
  let from = flattener.substitute(from)?;
  flattener.flatten(&recipe.items)?;

  let plan = Plan {
    from,
    steps: flattener.steps,
  };

  info!(
    from = %plan.from,
    steps = plan.steps.len(),
    from_cache = options.from_cache,
    "built plan"
  );

  Ok(plan)
}

struct Flattener<'a, R: Resolver> {
  env: &'a R,
  options: &'a BuildOptions,
  steps: Vec<Step>,
  /// Absolute working directories of the open scopes.
  scopes: Vec<String>,
}

impl<R: Resolver> Flattener<'_, R> {
  fn flatten(&mut self, items: &[Item]) -> Result<(), BuildError> {
    for item in items {
      match item {
        Item::Run { cmd } => {
          let cmd = self.substitute(cmd)?;
          self.steps.push(Step::RunCommand { cmd });
        }
        Item::Copy { src, dst } => {
          let src = self.substitute(src)?;
          let dst = self.substitute(dst)?;
          self.steps.push(Step::CopyFile { src, dst });
        }
        Item::Env { key, value } => {
          let key = self.substitute(key)?;
          let value = self.substitute(value)?;
          self.steps.push(Step::SetEnv { key, value });
        }
        Item::SetExec { entrypoint, cmd } => {
          let entrypoint = self.substitute_all(entrypoint)?;
          let cmd = self.substitute_all(cmd)?;
          self.steps.push(Step::SetExec { entrypoint, cmd });
        }
        Item::Inside { path, items } => {
          let path = scope::resolve(self.cwd(), &self.substitute(path)?);
          self.steps.push(Step::EnterScope { path: path.clone() });
          self.scopes.push(path);
          self.flatten(items)?;
          self.scopes.pop();
          self.steps.push(Step::ExitScope);
        }
        Item::Skip { items } => {
          if self.options.from_cache {
            debug!(items = items.len(), "omitting skip block");
          } else {
            self.flatten(items)?;
          }
        }
        Item::Download {
          path,
          url,
          sha256,
          items,
        } => {
          let path = scope::resolve(self.cwd(), &self.substitute(path)?);
          let url = self.substitute(url)?;
          let sha256 = sha256.as_deref().map(|s| self.substitute(s)).transpose()?;
          self.steps.push(Step::Fetch {
            url,
            path: path.clone(),
            sha256,
          });
          self.flatten(items)?;
          self.steps.push(Step::Release { path });
        }
      }
    }
    Ok(())
  }

  fn cwd(&self) -> &str {
    self.scopes.last().map(|s| s.as_str()).unwrap_or(ROOT_SCOPE)
  }

  fn substitute(&self, input: &str) -> Result<String, BuildError> {
    let position = self.steps.len();
    placeholder::substitute(input, self.env).map_err(|e| match e {
      PlaceholderError::Unresolved(name) => BuildError::UnresolvedVariable { name, position },
      source => BuildError::Placeholder { position, source },
    })
  }

  fn substitute_all(&self, inputs: &[String]) -> Result<Vec<String>, BuildError> {
    inputs.iter().map(|s| self.substitute(s)).collect()
  }
}
