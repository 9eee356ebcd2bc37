pub mod id;
pub mod token;
