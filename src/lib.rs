//! Turn a monolithic SQL dump into idempotent statements split across a fixed
//! number of ordered batch files.
//!
//! ```
//! use dump_stager::pipeline::transform_text;
//! use dump_stager::rewriter::RewriteOptions;
//!
//! let out = transform_text(
//!     "SET statement_timeout = 0;\nCREATE TABLE t (id int);\n",
//!     &RewriteOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(out.statements[0].text, "CREATE TABLE IF NOT EXISTS t (id int);");
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod json_schema;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod rewriter;
pub mod writer;
