pub mod authentication;
pub mod authoring;
pub mod clock;
pub mod configuration;
pub mod content;
pub mod domain;
pub mod email_client;
pub mod issue_dispatch;
pub mod routes;
pub mod startup;
pub mod store;
pub mod subscription_lifecycle;
pub mod telemetry;
pub mod utils;
pub mod verification_worker;
