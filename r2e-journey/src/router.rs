//! HTTP surface a suspended journey resumes through: a posted form
//! continuation, and a GET callback for redirect-based steps (e.g.
//! `external_idp`). Both converge on [`JourneyEngine::resume`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Router};

use crate::engine::JourneyEngine;

pub fn router(engine: Arc<JourneyEngine>) -> Router {
    Router::new()
        .route("/t/{tenant_id}/journey/{journey_id}", post(resume_form_handler))
        .route("/t/{tenant_id}/journey/{journey_id}/callback", get(resume_callback_handler))
        .with_state(engine)
}

async fn resume_form_handler(
    State(engine): State<Arc<JourneyEngine>>,
    Path((tenant_id, journey_id)): Path<(String, String)>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    engine.resume(&tenant_id, &journey_id, params).await
}

async fn resume_callback_handler(
    State(engine): State<Arc<JourneyEngine>>,
    Path((tenant_id, journey_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    engine.resume(&tenant_id, &journey_id, params).await
}
