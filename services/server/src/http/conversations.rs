// GET/PUT /api/v1/conversations (C7): a user's unread-state document.
//
// `total`/`to_read` in the stored `UserConversationState` lag the live
// conversation -- GET reconciles them against the conversation's actual
// message count for the response only, without writing the reconciliation
// back. PUT is the only thing that persists, and it always writes the whole
// document (never a per-key patch), matching `user_conversations::update`.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chat_protocol::{GetConversationsResponse, PutConversationsRequest, UserConversationState};
use chat_storage::{auth, conversation, user_conversations};

use crate::http::HttpError;
use crate::state::AppState;

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, HttpError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(auth::AuthError::MissingToken)?;
    let bearer = auth::extract_bearer(Some(token))?;
    let claims = auth::validate_token(&state.pool, bearer).await?;
    Ok(claims.user_id)
}

pub async fn get_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<GetConversationsResponse>, HttpError> {
    let user_id = authenticate(&state, &headers).await?;
    let mut list = user_conversations::find_by_user_id(&state.pool, &user_id).await?;

    let ids: Vec<String> = list.keys().cloned().collect();
    let live = conversation::list_by_ids(&state.pool, &ids).await?;
    let live_by_id: std::collections::HashMap<_, _> =
        live.into_iter().map(|c| (c.conversation_id.clone(), c)).collect();

    for (id, entry) in list.iter_mut() {
        if let Some(conv) = live_by_id.get(id) {
            if conv.total > entry.total {
                entry.to_read = conv.total - entry.total;
                entry.total = conv.total;
                entry.is_show = true;
            } else {
                entry.to_read = 0;
            }
        }
    }

    Ok(Json(GetConversationsResponse { conversations: list }))
}

pub async fn put_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PutConversationsRequest>,
) -> Result<(), HttpError> {
    let user_id = authenticate(&state, &headers).await?;
    let mut list = user_conversations::find_by_user_id(&state.pool, &user_id).await?;

    for (id, patch) in req.conversations {
        let entry = list.entry(id.clone()).or_insert_with(|| UserConversationState {
            conversation_id: id.clone(),
            chat_type: patch.chat_type,
            is_show: patch.is_show,
            total: 0,
            to_read: 0,
            seq: 0,
        });
        entry.conversation_id = id.clone();
        entry.chat_type = patch.chat_type;
        entry.is_show = patch.is_show;
        entry.total += patch.read;
        entry.seq = patch.seq;
    }

    user_conversations::update(&state.pool, &user_id, &list).await?;
    Ok(())
}
