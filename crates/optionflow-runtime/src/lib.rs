pub mod builtins;
pub mod cache;
pub mod context;
pub mod executor;
pub mod http;
pub mod orchestrator;
pub mod output;

pub use builtins::{BuiltinFunction, BuiltinRegistry, BUILTIN_FIELDS, BUILTIN_GRIDS, BUILTIN_GRID_ROWS};
pub use cache::{cache_key, ResultCache, MAX_TTL};
pub use context::ResolveContext;
pub use executor::{Capabilities, Execution, ExecutionInput, Executor};
pub use http::ReqwestTransport;
pub use orchestrator::{OptionResolver, ResolveRequest};
pub use output::map_rows_to_options;
