// weather_collector - Periodic collector of OpenWeather observations
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::observation::EntityKey;
use crate::store::DocumentStore;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// State shared by every HTTP handler.
#[derive(Debug)]
pub struct RequestContext {
    registry: Registry,
    documents: Arc<DocumentStore>,
}

impl RequestContext {
    pub fn new(registry: Registry, documents: Arc<DocumentStore>) -> Self {
        RequestContext { registry, documents }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

/// Routes for metrics and read-only access to stored observations.
///
/// * `GET /metrics` - OpenMetrics text format.
/// * `GET /cities` - JSON array of cities with stored observations.
/// * `GET /cities/:city/observations[?limit=N]` - JSON array of observations for a
///   city, oldest first. With `limit` only the newest N are returned.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/metrics", get(text_metrics))
        .route("/cities", get(cities))
        .route("/cities/:city/observations", get(observations))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();
    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn cities(State(context): State<Arc<RequestContext>>) -> Response {
    match context.documents.collections() {
        Ok(names) => Json(names).into_response(),
        Err(e) => {
            tracing::error!(message = "error listing cities", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn observations(
    State(context): State<Arc<RequestContext>>,
    Path(city): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let key = EntityKey::normalize(&city);
    let res = match params.limit {
        Some(limit) => context.documents.latest(&key, limit).map(|mut obs| {
            obs.reverse();
            obs
        }),
        None => context.documents.history(&key),
    };

    match res {
        Ok(obs) => Json(obs).into_response(),
        Err(e) => {
            tracing::error!(message = "error reading observations", city = %city, error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
