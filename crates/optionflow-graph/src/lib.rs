//! Pipeline graphs: typed nodes connected by edges, validated into a
//! `CompiledPlan` before anything runs.
//!
//! A graph starts at a single `control.start` node, pulls data from one
//! source, pushes it through a chain of transforms, and ends at the single
//! `output.options` node. The same pipeline can also be written as a linear
//! `PipelineAst`; `convert` moves between the two forms.

pub mod compiler;
pub mod convert;
pub mod definition;
pub mod edge;
pub mod graph;
pub mod node;
pub mod plan_cache;
pub mod steps;

pub use compiler::{compile_definition, compile_graph, compile_raw, CompileIssue, CompiledPlan};
pub use convert::{graph_to_pipeline_ast, pipeline_ast_to_graph, ConvertError, PipelineAst};
pub use definition::{CacheSettings, DslPipeline, FunctionBody, FunctionDefinition};
pub use edge::Edge;
pub use graph::{Graph, RawGraph};
pub use node::{Node, NodeKind, PortType, Position};
pub use plan_cache::PlanCache;
pub use steps::{OutputMapping, SourceStep, TransformStep, ValueSelector, RESERVED_OPTION_KEYS};
