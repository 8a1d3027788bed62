pub mod acoustic;
pub mod digest;
pub mod resolver;
