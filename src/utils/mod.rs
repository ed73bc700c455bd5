pub mod flush;
pub mod jwt;
