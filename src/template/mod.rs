pub mod compiler;
pub mod handlers;
pub mod model;
pub mod service;

pub use compiler::TemplateCompiler;
pub use service::TemplateService;
