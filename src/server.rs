use crate::{config::Config, model_service::LandmarkModel, routes::api_routes, telemetry::Metrics};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct SharedState {
    pub model: Arc<dyn LandmarkModel>,
    pub metrics: Arc<Metrics>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

/// Routes, state and CORS policy. No allow-list: the endpoint is expected to
/// be called from arbitrary browser origins.
pub fn build_router(app_state: SharedState) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes())
        .with_state(app_state)
        .layer(cors_layer)
}

impl HttpServer {
    pub async fn new(model: Arc<dyn LandmarkModel>, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new());
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState { model, metrics };

        let router = build_router(app_state).layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", &self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                let server = axum::serve(listener, router);
                server
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        landmarks::HolisticDetection,
        model_service::{LandmarkModel, ModelError},
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    struct NoopModel;

    #[async_trait]
    impl LandmarkModel for NoopModel {
        async fn detect(&self, _image_data: Vec<u8>) -> Result<HolisticDetection, ModelError> {
            Ok(HolisticDetection::default())
        }
    }

    #[tokio::test]
    async fn test_cross_origin_requests_are_allowed() {
        let state = SharedState {
            model: Arc::new(NoopModel),
            metrics: Arc::new(Metrics::new()),
        };
        let router = build_router(state);

        let request = Request::builder()
            .method("GET")
            .uri("/health_check")
            .header(header::ORIGIN, "https://example.com")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }
}
