//! Four-layer grading of the final report: schema, structure, fast
//! heuristics, then the authoritative full-LM rubric. Layers 1-3 are cheap
//! pre-checks; layer 4 always runs.

pub mod full;
pub mod grade;
pub mod heuristic;
pub mod schema;
pub mod structure;

pub use full::{FullValidator, ValidationOutcome};
pub use grade::LetterGrade;
pub use heuristic::heuristic_validate;
pub use schema::schema_validate;
pub use structure::{structure_validate, Finding, Severity, StructureReport};
