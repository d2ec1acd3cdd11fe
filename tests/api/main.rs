mod issues;
mod postgres_store;
mod subscriptions_verify;
