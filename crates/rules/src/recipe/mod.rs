//! YAML record recipes with hot reload.
//!
//! A recipe describes one record: its value type, initial value, optional
//! display/control/valueAlarm configuration, derived-value (`calc`) and
//! forward-link wiring. The loader validates recipes, checks the trigger
//! graph for cycles, and installs records with their rule engines into a
//! [`MemoryRegistry`](crate::registry::MemoryRegistry).

mod build;
mod core;
mod error;
mod links;
mod schema;
mod watcher;


pub use self::core::{install_recipes, parse_recipes, RecipeLoader};
pub use self::error::{LoadResult, LoadStatus, RecipeError, Result};
pub use self::links::{check_links, trigger_graph};
pub use self::schema::{
    CalcRecipe, ControlRecipe, DisplayRecipe, ReadOnlyField, Recipe, RecipeFile, RecipeType,
    SeveritySpec, ValueAlarmRecipe,
};
