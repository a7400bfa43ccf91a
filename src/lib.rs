//! Retrieval and reporting over monthly BiciMAD trip archives.
//!
//! The [`resolver`] discovers and downloads the compressed archive for a
//! given month from the EMT open data portal; the [`dataset`] parses the
//! contained CSV into trip records and answers descriptive aggregate
//! queries over them.

pub mod dataset;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;
pub mod parser;
pub mod resolver;
