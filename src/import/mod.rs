pub mod cancel;
pub mod outcome;
pub mod pipeline;
