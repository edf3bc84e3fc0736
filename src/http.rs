use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::facade::{
    self, Dehumidifier, Facade, MixedGroup, Notifications, OperationMode, OperationStatus,
    OutsideTemperature, Pump, Zone, ZoneUpdate,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Invalid(#[from] facade::Error),
    #[error("could not parse the request path")]
    Path(#[from] PathRejection),
    #[error("could not parse the request body")]
    Body(#[from] JsonRejection),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        debug!(message = "rejecting request", error = (&self as &dyn std::error::Error));
        (StatusCode::BAD_REQUEST, "bad request").into_response()
    }
}

type PathArgs<T> = Result<Path<T>, PathRejection>;
type JsonBody<T> = Result<Json<T>, JsonRejection>;

pub fn router(facade: Facade) -> Router {
    Router::new()
        .route("/zones/{base_id}/{zone_id}", get(get_zone).post(post_zone))
        .route("/mixedgroups/{id}", get(get_mixed_group))
        .route("/outsidetemperature", get(get_outside_temperature))
        .route("/notifications", get(get_notifications))
        .route("/mode", get(get_mode).post(post_mode))
        .route("/status", get(get_status).post(post_status))
        .route("/dehumidifier/{id}", get(get_dehumidifier))
        .route("/pumps/{id}", get(get_pump))
        .route("/health", get(health))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(facade)
}

async fn get_zone(
    State(facade): State<Facade>,
    path: PathArgs<(u16, u16)>,
) -> Result<Json<Zone>, Error> {
    let Path((base_id, zone_id)) = path?;
    Ok(Json(facade.zone(base_id, zone_id)?))
}

async fn post_zone(
    State(facade): State<Facade>,
    path: PathArgs<(u16, u16)>,
    body: JsonBody<ZoneUpdate>,
) -> Result<StatusCode, Error> {
    let Path((base_id, zone_id)) = path?;
    let Json(update) = body?;
    facade.update_zone(base_id, zone_id, &update)?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_mixed_group(
    State(facade): State<Facade>,
    path: PathArgs<u16>,
) -> Result<Json<MixedGroup>, Error> {
    let Path(id) = path?;
    Ok(Json(facade.mixed_group(id)?))
}

async fn get_outside_temperature(State(facade): State<Facade>) -> Json<OutsideTemperature> {
    Json(facade.outside_temperature())
}

async fn get_notifications(State(facade): State<Facade>) -> Json<Notifications> {
    Json(facade.notifications())
}

async fn get_mode(State(facade): State<Facade>) -> Json<OperationMode> {
    Json(facade.mode())
}

async fn post_mode(
    State(facade): State<Facade>,
    body: JsonBody<OperationMode>,
) -> Result<StatusCode, Error> {
    let Json(OperationMode { mode }) = body?;
    facade.set_mode(mode)?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_status(State(facade): State<Facade>) -> Json<OperationStatus> {
    Json(facade.status())
}

async fn post_status(
    State(facade): State<Facade>,
    body: JsonBody<OperationStatus>,
) -> Result<StatusCode, Error> {
    let Json(OperationStatus { status }) = body?;
    facade.set_status(status)?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_dehumidifier(
    State(facade): State<Facade>,
    path: PathArgs<u16>,
) -> Result<Json<Dehumidifier>, Error> {
    let Path(id) = path?;
    Ok(Json(facade.dehumidifier(id)?))
}

async fn get_pump(State(facade): State<Facade>, path: PathArgs<u16>) -> Result<Json<Pump>, Error> {
    let Path(id) = path?;
    Ok(Json(facade.pump(id)?))
}

async fn health() -> &'static str {
    "OK"
}
