use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use px_sync::{DriverError, SubmissionState, SubmitError};
use px_types::{ColorPair, Pixel};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ApiError, ApiResult, AppState, bad_request, conflict, unavailable};

#[derive(Debug, Serialize)]
pub(crate) struct PixelsResponse {
    pixels: Vec<Pixel>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CountResponse {
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ColorsRequest {
    color_a: String,
    color_b: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitRequest {
    color_a: Option<String>,
    color_b: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    accepted: bool,
    colors: Option<ColorPair>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AcknowledgeResponse {
    acknowledged: bool,
}

pub(crate) async fn list_pixels(State(state): State<AppState>) -> Json<PixelsResponse> {
    Json(PixelsResponse {
        pixels: state.sync.view().pixels,
    })
}

pub(crate) async fn pixel_count(State(state): State<AppState>) -> Json<CountResponse> {
    Json(CountResponse {
        total_count: state.sync.view().total_count,
    })
}

pub(crate) async fn draft_colors(State(state): State<AppState>) -> Json<ColorPair> {
    Json(state.sync.view().draft)
}

pub(crate) async fn set_colors(
    State(state): State<AppState>,
    Json(request): Json<ColorsRequest>,
) -> ApiResult<ColorPair> {
    let colors = ColorPair::parse(&request.color_a, &request.color_b)
        .map_err(|err| bad_request(&err.to_string()))?;
    state
        .sync
        .set_colors(colors.clone())
        .await
        .map_err(driver_error)?;
    Ok(Json(colors))
}

/// A fresh pair from the generator. It also becomes the draft.
pub(crate) async fn random_colors(State(state): State<AppState>) -> ApiResult<ColorPair> {
    let colors = state.sync.randomize_colors().await.map_err(driver_error)?;
    Ok(Json(colors))
}

pub(crate) async fn submission(State(state): State<AppState>) -> Json<SubmissionState> {
    Json(state.sync.view().submission)
}

/// Starts a submission of the posted colours, or of the draft when the body
/// names none. Progress is read back from `GET /submission`.
pub(crate) async fn submit(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let request: SubmitRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SubmitRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| bad_request(&err.to_string()))?
    };

    let colors = match (request.color_a, request.color_b) {
        (Some(color_a), Some(color_b)) => Some(
            ColorPair::parse(&color_a, &color_b).map_err(|err| bad_request(&err.to_string()))?,
        ),
        (None, None) => None,
        _ => return Err(bad_request("color_a and color_b must be given together")),
    };

    state
        .sync
        .submit(colors.clone())
        .await
        .map_err(driver_error)?;
    info!("submission accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            accepted: true,
            colors,
        }),
    ))
}

pub(crate) async fn acknowledge(State(state): State<AppState>) -> ApiResult<AcknowledgeResponse> {
    let acknowledged = state.sync.acknowledge().await.map_err(driver_error)?;
    Ok(Json(AcknowledgeResponse { acknowledged }))
}

fn driver_error(err: DriverError) -> ApiError {
    match err {
        DriverError::Submit(SubmitError::Busy(_)) => conflict(&err.to_string()),
        DriverError::Stopped => unavailable(&err.to_string()),
    }
}
