use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use courier_shared::{Group, GroupId, Message, ServerEvent, User, UserId};
use courier_store::Database;

use crate::auth::{auth_middleware, AuthUser};
use crate::config::ServerConfig;
use crate::delivery::DeliveryRouter;
use crate::error::ApiError;
use crate::images::ImageStore;
use crate::presence::PresenceRegistry;
use crate::receipts::{ReceiptReconciler, SeenReceipt};
use crate::rooms::RoomMap;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub rooms: RoomMap,
    pub router: DeliveryRouter,
    pub reconciler: ReceiptReconciler,
    pub images: Arc<ImageStore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, images: ImageStore, config: ServerConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        let presence = PresenceRegistry::new();
        let rooms = RoomMap::new();
        let router = DeliveryRouter::new(presence.clone(), rooms.clone());
        let reconciler = ReceiptReconciler::new(db.clone(), router.clone());

        Self {
            db,
            presence,
            rooms,
            router,
            reconciler,
            images: Arc::new(images),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Without a configured origin the API is open to any origin, which is
    // only acceptable for local development.
    let allow_origin = state
        .config
        .client_origin
        .as_deref()
        .and_then(|o| o.parse::<axum::http::HeaderValue>().ok())
        .map_or_else(AllowOrigin::any, AllowOrigin::exact);
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    let protected = Router::new()
        .route("/messages/contacts", get(get_contacts))
        .route("/messages/chats", get(get_chat_partners))
        .route("/messages/{id}", get(get_direct_messages))
        .route("/messages/send/{id}", post(send_direct_message))
        .route("/messages/seen/{id}", put(mark_direct_seen))
        .route("/groups", post(create_group))
        .route("/groups/mine", get(get_my_groups))
        .route(
            "/groups/{group_id}/messages",
            get(get_group_messages).post(send_group_message),
        )
        .route("/groups/{group_id}/seen", put(mark_group_seen))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .nest_service(
            "/images",
            ServeDir::new(state.images.base_path().to_path_buf()),
        )
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
    online: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
        online: state.presence.connection_count().await,
    })
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    /// Base64 image payload, uploaded to the image store before persisting.
    pub image: Option<String>,
}

impl SendMessageRequest {
    fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
            && self.image.as_deref().map_or(true, str::is_empty)
    }
}

async fn get_contacts(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<Vec<User>>, ApiError> {
    let contacts = state.db.lock().await.list_contacts(me)?;
    Ok(Json(contacts))
}

async fn get_chat_partners(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<Vec<User>>, ApiError> {
    let partners = state.db.lock().await.chat_partners(me)?;
    Ok(Json(partners))
}

async fn get_direct_messages(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let other = UserId(id);
    let messages = state.db.lock().await.get_direct_conversation(me, other)?;
    Ok(Json(messages))
}

async fn send_direct_message(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let receiver = UserId(id);

    if req.is_empty() {
        return Err(ApiError::BadRequest("Text or image is required.".into()));
    }
    if me == receiver {
        return Err(ApiError::BadRequest(
            "Cannot send messages to yourself.".into(),
        ));
    }
    if !state.db.lock().await.user_exists(receiver)? {
        return Err(ApiError::NotFound("Receiver not found.".into()));
    }

    // Message image uploads are load-bearing: a failure here aborts the
    // send, unlike the avatar path.
    let image_url = match req.image.as_deref().filter(|i| !i.is_empty()) {
        Some(payload) => Some(state.images.store_image(payload).await?),
        None => None,
    };

    let message = Message::direct(me, receiver, req.text.filter(|t| !t.is_empty()), image_url);
    persist_or_discard_image(&state, &message).await?;

    state
        .router
        .push_direct(receiver, ServerEvent::NewMessage(message.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Persist a message, deleting its just-uploaded image if the insert
/// fails so no orphaned file lingers under the served directory.
async fn persist_or_discard_image(state: &AppState, message: &Message) -> Result<(), ApiError> {
    let result = state.db.lock().await.insert_message(message);
    if let Err(e) = result {
        if let Some(url) = &message.image_url {
            state.images.remove_image(url).await;
        }
        return Err(e.into());
    }
    Ok(())
}

async fn mark_direct_seen(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SeenReceipt>, ApiError> {
    let receipt = state.reconciler.reconcile_direct(me, UserId(id)).await?;
    Ok(Json(receipt))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserId>,
    pub avatar: Option<String>,
}

async fn create_group(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Group name is required.".into()));
    }

    let avatar = state
        .images
        .store_avatar_or_default(req.avatar.as_deref().filter(|a| !a.is_empty()))
        .await;

    let group = Group::new(req.name.trim().to_string(), me, req.members, avatar);
    state.db.lock().await.create_group(&group)?;

    info!(group = %group.id, creator = %me, members = group.members.len(), "Group created");

    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_my_groups(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let groups = state.db.lock().await.groups_for_user(me)?;
    Ok(Json(groups))
}

/// Membership gate shared by the group read/send paths.  Unknown groups
/// are distinct from groups the caller simply cannot access.
async fn require_membership(
    db: &Arc<Mutex<Database>>,
    group_id: GroupId,
    user: UserId,
) -> Result<(), ApiError> {
    let db = db.lock().await;
    if !db.group_exists(group_id)? {
        return Err(ApiError::NotFound("Group not found".into()));
    }
    if !db.is_group_member(group_id, user)? {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

async fn get_group_messages(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let group_id = GroupId(group_id);
    require_membership(&state.db, group_id, me).await?;

    let messages = state.db.lock().await.get_group_messages(group_id)?;
    Ok(Json(messages))
}

async fn send_group_message(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let group_id = GroupId(group_id);
    require_membership(&state.db, group_id, me).await?;

    if req.is_empty() {
        return Err(ApiError::BadRequest("Text or image is required.".into()));
    }

    let image_url = match req.image.as_deref().filter(|i| !i.is_empty()) {
        Some(payload) => Some(state.images.store_image(payload).await?),
        None => None,
    };

    let message = Message::group(me, group_id, req.text.filter(|t| !t.is_empty()), image_url);
    persist_or_discard_image(&state, &message).await?;

    state
        .router
        .push_group(group_id, ServerEvent::NewGroupMessage(message.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_group_seen(
    State(state): State<AppState>,
    Extension(AuthUser(me)): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<SeenReceipt>, ApiError> {
    let receipt = state
        .reconciler
        .reconcile_group(me, GroupId(group_id))
        .await?;
    Ok(Json(receipt))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let images = ImageStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        let state = AppState::new(
            Database::in_memory().unwrap(),
            images,
            ServerConfig::default(),
        );
        (state, dir)
    }

    async fn add_user(state: &AppState, name: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            full_name: name.into(),
            profile_pic: String::new(),
            created_at: Utc::now(),
        };
        state.db.lock().await.insert_user(&user).unwrap();
        user.id
    }

    fn authed(method: &str, uri: &str, user: UserId, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {user}"));

        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let resp = app
            .oneshot(
                Request::get("/messages/contacts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_without_token_is_unauthorized() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let resp = app
            .oneshot(
                Request::get("/ws")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn group_with_unknown_member_is_rejected_whole() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;

        let resp = build_router(state.clone())
            .oneshot(authed(
                "POST",
                "/groups",
                alice,
                Some(serde_json::json!({"name": "team", "members": [UserId::new()]})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // the failed creation left no group behind
        let resp = build_router(state)
            .oneshot(authed("GET", "/groups/mine", alice, None))
            .await
            .unwrap();
        assert!(json_body(resp).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_send_is_rejected_before_persistence() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let bob = add_user(&state, "Bob").await;
        let app = build_router(state.clone());

        let resp = app
            .oneshot(authed(
                "POST",
                &format!("/messages/send/{bob}"),
                alice,
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let stored = state
            .db
            .lock()
            .await
            .get_direct_conversation(alice, bob)
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn self_send_is_rejected() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let app = build_router(state);

        let resp = app
            .oneshot(authed(
                "POST",
                &format!("/messages/send/{alice}"),
                alice,
                Some(serde_json::json!({"text": "hi me"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_receiver_is_not_found() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let app = build_router(state);

        let resp = app
            .oneshot(authed(
                "POST",
                &format!("/messages/send/{}", UserId::new()),
                alice,
                Some(serde_json::json!({"text": "hello?"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_fetch_and_seen_flow() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let bob = add_user(&state, "Bob").await;

        let resp = build_router(state.clone())
            .oneshot(authed(
                "POST",
                &format!("/messages/send/{bob}"),
                alice,
                Some(serde_json::json!({"text": "hi"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let sent = json_body(resp).await;
        assert_eq!(sent["seen"], false);

        let resp = build_router(state.clone())
            .oneshot(authed("GET", &format!("/messages/{alice}"), bob, None))
            .await
            .unwrap();
        let fetched = json_body(resp).await;
        assert_eq!(fetched.as_array().unwrap().len(), 1);

        // Bob marks Alice's messages seen.
        let resp = build_router(state.clone())
            .oneshot(authed("PUT", &format!("/messages/seen/{alice}"), bob, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let receipt = json_body(resp).await;
        assert_eq!(receipt["updatedCount"], 1);
        assert_eq!(receipt["messageIds"][0], sent["id"]);

        // Refetch shows seen = true.
        let resp = build_router(state.clone())
            .oneshot(authed("GET", &format!("/messages/{bob}"), alice, None))
            .await
            .unwrap();
        let refetched = json_body(resp).await;
        assert_eq!(refetched[0]["seen"], true);

        // Idempotence through the REST surface.
        let resp = build_router(state)
            .oneshot(authed("PUT", &format!("/messages/seen/{alice}"), bob, None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["updatedCount"], 0);
    }

    #[tokio::test]
    async fn create_group_adds_creator_as_member_and_admin() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let bob = add_user(&state, "Bob").await;

        let resp = build_router(state.clone())
            .oneshot(authed(
                "POST",
                "/groups",
                alice,
                Some(serde_json::json!({"name": "team", "members": [bob]})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let group = json_body(resp).await;

        let members = group["members"].as_array().unwrap();
        assert!(members.iter().any(|m| m == &serde_json::json!(alice)));
        assert!(members.iter().any(|m| m == &serde_json::json!(bob)));
        assert_eq!(group["admins"][0], serde_json::json!(alice));
        assert_eq!(group["avatar"], "/group.png");
    }

    #[tokio::test]
    async fn non_member_group_access_is_forbidden() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let outsider = add_user(&state, "Mallory").await;

        let resp = build_router(state.clone())
            .oneshot(authed(
                "POST",
                "/groups",
                alice,
                Some(serde_json::json!({"name": "private"})),
            ))
            .await
            .unwrap();
        let group_id = json_body(resp).await["id"].as_str().unwrap().to_string();

        for req in [
            authed("GET", &format!("/groups/{group_id}/messages"), outsider, None),
            authed(
                "POST",
                &format!("/groups/{group_id}/messages"),
                outsider,
                Some(serde_json::json!({"text": "let me in"})),
            ),
            authed("PUT", &format!("/groups/{group_id}/seen"), outsider, None),
        ] {
            let resp = build_router(state.clone()).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn group_message_flow_with_seen_by() {
        let (state, _dir) = test_state().await;
        let alice = add_user(&state, "Alice").await;
        let bob = add_user(&state, "Bob").await;

        let resp = build_router(state.clone())
            .oneshot(authed(
                "POST",
                "/groups",
                alice,
                Some(serde_json::json!({"name": "team", "members": [bob]})),
            ))
            .await
            .unwrap();
        let group_id = json_body(resp).await["id"].as_str().unwrap().to_string();

        let resp = build_router(state.clone())
            .oneshot(authed(
                "POST",
                &format!("/groups/{group_id}/messages"),
                alice,
                Some(serde_json::json!({"text": "hello group"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let sent = json_body(resp).await;
        // sender auto-included at send time
        assert_eq!(sent["seenBy"], serde_json::json!([alice]));

        let resp = build_router(state.clone())
            .oneshot(authed("PUT", &format!("/groups/{group_id}/seen"), bob, None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["updatedCount"], 1);

        let resp = build_router(state)
            .oneshot(authed("GET", &format!("/groups/{group_id}/messages"), bob, None))
            .await
            .unwrap();
        let messages = json_body(resp).await;
        let seen_by = messages[0]["seenBy"].as_array().unwrap();
        assert_eq!(seen_by.len(), 2);
    }
}
