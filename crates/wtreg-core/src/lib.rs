pub mod config;
pub mod document;
pub mod error;
pub mod git;
pub mod io;
pub mod naming;
pub mod paths;
pub mod ports;
pub mod probe;
pub mod registry;
pub mod store;
pub mod types;
pub mod validate;
pub mod worktree;

pub use error::{RegistryError, Result};
pub use registry::Registry;
