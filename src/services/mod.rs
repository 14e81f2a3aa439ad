pub mod assembler;
pub mod assets;
pub mod imagegen;
pub mod llm;
pub mod pipeline;
pub mod planner;
