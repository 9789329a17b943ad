// Pipeline processing: header normalization, type casting and the quality gate

pub mod cast;
pub mod normalize;
pub mod quality_gate;

pub use cast::{CastMode, TypeCaster};
pub use normalize::{normalize_column_name, normalize_column_names};
pub use quality_gate::{ValidationCheck, ValidationFailure, ValidationReport, Validator};
