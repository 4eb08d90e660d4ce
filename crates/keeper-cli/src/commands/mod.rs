pub mod openapi;
pub mod serve;

pub use openapi::OpenApiCommand;
pub use serve::ServeCommand;
