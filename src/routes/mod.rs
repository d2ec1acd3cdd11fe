pub mod constants;
mod health_check;
mod issues;
mod subscriptions;
mod subscriptions_verify;

pub use health_check::*;
pub use issues::*;
pub use subscriptions::*;
pub use subscriptions_verify::*;
