use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde_json::{Map, Value};

use herald_types::api::{
    ApiResponse, GroupsResponse, HistoryResponse, QrResponse, SendMessageRequest,
    SendMessageResponse,
};
use herald_types::models::{ContactInfo, GroupDetail, StatusSnapshot};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn initialize(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatusSnapshot>>, ApiError> {
    let status = state
        .session
        .initialize()
        .await
        .map_err(ApiError::session("Failed to initialize WhatsApp client"))?;

    Ok(Json(ApiResponse::with_message(
        "WhatsApp client initialization started",
        status,
    )))
}

pub async fn send(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<SendMessageResponse>>, ApiError> {
    let Json(req) = payload?;

    let number = req.number.filter(|n| !n.trim().is_empty());
    let message = req.message.filter(|m| !m.is_empty());
    let (Some(number), Some(message)) = (number, message) else {
        return Err(ApiError::Validation(
            "Phone number and message are required".into(),
        ));
    };

    let sent = state
        .session
        .send_message(&number, &message, req.quoted_message_id.as_deref())
        .await
        .map_err(ApiError::session("Failed to send message"))?;

    Ok(Json(ApiResponse::with_message(
        "Message sent successfully",
        SendMessageResponse {
            to: sent.to,
            message_id: sent.id,
            timestamp: sent.timestamp,
        },
    )))
}

pub async fn status(State(state): State<AppState>) -> Json<ApiResponse<StatusSnapshot>> {
    Json(ApiResponse::data(state.session.status().await))
}

pub async fn qr(State(state): State<AppState>) -> Result<Json<ApiResponse<QrResponse>>, ApiError> {
    let qr_code = state.session.scannable_code().await.ok_or_else(|| {
        ApiError::NotFound(
            "QR code not available. Client might be already authenticated or not initialized."
                .into(),
        )
    })?;

    Ok(Json(ApiResponse::data(QrResponse { qr_code })))
}

pub async fn history(State(state): State<AppState>) -> Json<ApiResponse<HistoryResponse>> {
    Json(ApiResponse::data(HistoryResponse {
        messages: state.session.history().await,
    }))
}

pub async fn reset(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    state.session.reset().await;
    Json(ApiResponse::with_message(
        "WhatsApp client reset successfully",
        Value::Object(Map::new()),
    ))
}

pub async fn number_info(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<ApiResponse<ContactInfo>>, ApiError> {
    let contact = state
        .session
        .contact_info(&number)
        .await
        .map_err(ApiError::session("Failed to get number info"))?;

    Ok(Json(ApiResponse::data(contact)))
}

pub async fn groups(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<GroupsResponse>>, ApiError> {
    let groups = state
        .session
        .groups()
        .await
        .map_err(ApiError::session("Failed to get groups"))?;

    Ok(Json(ApiResponse::data(GroupsResponse { groups })))
}

pub async fn group_info(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<ApiResponse<GroupDetail>>, ApiError> {
    let group = state
        .session
        .group_info(&group_id)
        .await
        .map_err(ApiError::session("Failed to get group info"))?;

    Ok(Json(ApiResponse::data(group)))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<ApiResponse<Map<String, Value>>> {
    Json(ApiResponse::data(state.session.settings().await))
}

pub async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<ApiResponse<Map<String, Value>>>, ApiError> {
    let Json(partial) = payload?;
    let merged = state.session.update_settings(partial).await;
    Ok(Json(ApiResponse::with_message("Settings updated", merged)))
}
