mod middleware;

pub use middleware::{AdminToken, require_admin};
