pub mod data;
pub mod identity;
