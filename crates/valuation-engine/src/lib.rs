pub mod dcf;
pub mod tools;

pub use dcf::{calculate_dcf, ValuationError};
pub use tools::{SensitivityGrid, SensitivityPoint, SensitivityReport, ToolError, ToolRequest, ToolResponse, ToolServer};
