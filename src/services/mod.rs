pub mod beat;
pub mod export;
pub mod illustration;
pub mod image;
pub mod llm;
pub mod script;
pub mod session;
pub mod setup;
pub mod workflow;
