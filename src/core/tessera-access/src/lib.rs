//! # Tessera Access
//!
//! Role-based and module-based access decisions for the Tessera workspace.
//!
//! ## Model
//!
//! - A [`Role`] grants a fixed list of [`Permission`]s (module + actions).
//! - A [`Module`] admits a fixed list of roles.
//!
//! Both tables are compiled in and immutable. Anything not explicitly granted
//! is denied, including module names that do not parse.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod policy;
pub mod types;

pub use error::AccessError;
pub use policy::{
    accessible_modules, allowed_roles, can, can_access_module, can_access_module_named,
    has_action, permissions_for,
};
pub use types::{Action, Module, Permission, Role};
