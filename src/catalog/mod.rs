pub mod locks;
pub mod model;
pub mod queue;
pub mod schema;
pub mod store;
