//! # jar-remapper
//!
//! Renames classes, fields, methods and local variables across compiled JVM
//! bytecode, driven by a multi-namespace mapping table.
//!
//! ## Architecture
//!
//! - **mapping**: Tiny v1 mapping tables and their projection onto a namespace pair
//! - **classfile**: Class file decoding and encoding
//! - **descriptor**: Descriptor and generic signature parsing and remapping
//! - **access**: Access flags and visibility
//! - **input**: Reading classes and resources from jars, directories and class files
//! - **model**: The structural summary of a class used for resolution
//! - **registry**: Name-keyed class registry with lazy classpath loading
//! - **hierarchy**: Class graph, ancestor lists and method propagation groups
//! - **resolve**: Rename decisions, mutable while resolving and frozen afterwards
//! - **conflict**: Name collision handling and package access checks
//! - **locals**: Replacement names for unusable local variable names
//! - **rewrite**: Emitting remapped class bytes
//! - **applier**: Per-class remapping
//! - **pipeline**: The phase driver and its worker pool
//! - **output**: Output entries, `META-INF` handling and jar/directory sinks
//! - **report**: The JSON run summary
//! - **config**: Options consumed by the engine
//! - **cli**: Command line arguments
//! - **error**: Errors and warnings

pub mod access;
pub mod applier;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod descriptor;
pub mod error;
pub mod hierarchy;
pub mod input;
pub mod locals;
pub mod mapping;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod rewrite;

pub use config::RemapOptions;
pub use error::{PipelineFailure, RemapError, Warning};
pub use pipeline::{Phase, Pipeline};
