//! boxlua-lib: Core types and logic for boxlua
//!
//! This crate turns declarative image recipes into reproducible build plans
//! and runs them:
//! - `Recipe`: the recorded description of an image (base, steps, scopes)
//! - `Plan`: the flattened, variable-resolved sequence of steps
//! - `PlanRunner`: strictly ordered execution producing an `ImageSpec`

pub mod consts;
pub mod eval;
pub mod execute;
pub mod placeholder;
pub mod plan;
pub mod recipe;
pub mod util;
