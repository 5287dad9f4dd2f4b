mod registry;

pub use registry::{empty_input_schema, into_envelope, FnTool, Tool, ToolRegistry};
