pub mod executor;
pub mod fetch;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use fetch::{FetchPageArgs, FetchPageTool, FETCH_PAGE_TEXT};
pub use registry::{parse_args, RegisteredTool, Tool, ToolRegistry, ToolSpecification};
pub use schema::{empty_object_schema, json_schema_for};
