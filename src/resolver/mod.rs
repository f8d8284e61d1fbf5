pub mod api;
pub use api::*;

pub mod error;
pub use error::*;

pub mod join_spec;
pub use join_spec::*;

pub mod cursor;
pub use cursor::*;

pub mod cursor_filter;
pub use cursor_filter::*;

pub mod field_builder;
pub use field_builder::*;

pub mod table_scope;
pub use table_scope::*;

pub mod query_state;
pub use query_state::*;

pub mod fetch_map;
pub use fetch_map::*;

pub mod tree;
pub use tree::*;

pub mod child_fetch;

pub mod root_fetch;

pub mod build;
pub use build::*;

#[cfg(test)]
mod _tests;
