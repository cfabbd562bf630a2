pub mod batch;
pub mod core;
pub mod receipt;
pub mod sheet;
pub mod students;
