pub mod llm;
pub mod tools;

pub use llm::LlmService;
pub use tools::ToolService;
