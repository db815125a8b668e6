pub mod mapping;
pub mod rules;
