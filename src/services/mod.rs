pub mod chapters;
pub mod llm;
pub mod metadata;
pub mod persistence;
pub mod prompts;
pub mod wizard;
