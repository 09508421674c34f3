pub mod program;
pub mod records;
pub mod traits;
