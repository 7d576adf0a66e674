// Optimization pipeline core: requirement extraction, alignment, bullet refinement,
// ATS scoring, and the loop that ties them together.
// All language-model calls go through the `LanguageModel` trait in llm_client.

pub mod alignment;
pub mod extractor;
pub mod optimizer;
pub mod prompts;
pub mod refiner;
pub mod requirements;
pub mod scorer;
pub mod summary;
pub mod text;
