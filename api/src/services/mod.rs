pub mod error;
pub mod inference;
