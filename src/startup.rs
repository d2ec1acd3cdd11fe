use crate::authentication::{AdminToken, require_admin};
use crate::authoring::IssueAuthoring;
use crate::configuration::{DatabaseSettings, Settings};
use crate::issue_dispatch::DispatchCoordinator;
use crate::routes::{
    create_issue, delete_issue, get_issue, health_check, list_issues, send_issue, subscribe,
    update_issue, verify,
};
use crate::store::{PostgresStore, Store};
use crate::subscription_lifecycle::SubscriptionManager;
use axum::Router;
use axum::routing::{get, post, put};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub fn get_connection_pool(db_configuration: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(db_configuration.connect_options())
}

/// Shared state for all route handlers
pub struct AppState<S> {
    pub subscriptions: Arc<SubscriptionManager<S>>,
    pub dispatcher: Arc<DispatchCoordinator<S>>,
    pub authoring: Arc<IssueAuthoring<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            subscriptions: self.subscriptions.clone(),
            dispatcher: self.dispatcher.clone(),
            authoring: self.authoring.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(configuration: &Settings, store: S) -> Self {
        let email_client = configuration.email_client.client();
        let subscriptions = SubscriptionManager::new(
            store.clone(),
            email_client.clone(),
            configuration.lifecycle_config(),
        );
        let dispatcher = Arc::new(DispatchCoordinator::new(
            store.clone(),
            email_client,
            configuration.dispatch_config(),
        ));
        let authoring = IssueAuthoring::new(store, dispatcher.clone());
        Self {
            subscriptions: Arc::new(subscriptions),
            dispatcher,
            authoring: Arc::new(authoring),
        }
    }
}

pub fn router<S: Store>(state: AppState<S>, admin_token: AdminToken) -> Router {
    let admin = Router::new()
        .route("/api/issues", post(create_issue::<S>))
        .route(
            "/api/issues/{slug}",
            put(update_issue::<S>).delete(delete_issue::<S>),
        )
        .route("/api/issues/{slug}/send", post(send_issue::<S>))
        .route_layer(axum::middleware::from_fn_with_state(
            admin_token,
            require_admin,
        ));

    Router::new()
        .route("/health_check", get(health_check))
        .route("/api/subscribers", post(subscribe::<S>))
        .route("/api/subscribers/verify", post(verify::<S>))
        .route("/api/issues", get(list_issues::<S>))
        .route("/api/issues/{slug}", get(get_issue::<S>))
        .merge(admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let store = PostgresStore::new(get_connection_pool(&configuration.database));
        Self::build_with_store(&configuration, store).await
    }

    pub async fn build_with_store<S: Store>(
        configuration: &Settings,
        store: S,
    ) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(address).await?;
        let port = listener.local_addr()?.port();
        let state = AppState::new(configuration, store);
        let admin_token = AdminToken::new(configuration.application.admin_token.clone());
        let router = router(state, admin_token);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        tracing::info!("Listening on port {}", self.port);
        axum::serve(self.listener, self.router).await
    }
}
