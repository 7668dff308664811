//! Application startup and lifecycle management.

use axum::Router;
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::SettlementConfig;
use crate::services::notifier::{HttpNotificationSender, LogNotificationSender};
use crate::services::{
    MobileMoneyClient, MongoSettlementStore, NotificationQueue, NotificationSender,
};
use crate::{build_router, AppState};

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Connect the store, wire the services and bind the HTTP listener.
    pub async fn build(config: SettlementConfig) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.database.uri.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.database.database);

        let store = MongoSettlementStore::new(&db);
        store.init_indexes().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize database indexes");
            AppError::DatabaseError(e)
        })?;

        let gateway = MobileMoneyClient::new(config.gateway.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to build gateway client");
            AppError::ConfigError(e)
        })?;
        if config.gateway.webhook_secret.is_none() {
            tracing::warn!("GATEWAY_WEBHOOK_SECRET not set - webhook signatures are not verified");
        }

        let sender: Arc<dyn NotificationSender> = match &config.notifications.service_url {
            Some(url) => Arc::new(HttpNotificationSender::new(url)),
            None => {
                tracing::warn!("NOTIFICATION_SERVICE_URL not set - notifications are only logged");
                Arc::new(LogNotificationSender)
            }
        };
        let notifications = NotificationQueue::start(sender, &config.notifications);

        let state = AppState::new(
            Arc::new(store),
            Arc::new(gateway),
            notifications,
            config.payments.clone(),
            config.gateway.webhook_secret.clone(),
            config.rate_limit_per_minute,
        );
        let router = build_router(state);

        let addr = config.common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!(port = port, "Settlement service listener bound");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Port the server is listening on. Useful when binding port 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}
