use std::sync::{Arc, LazyLock};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    channel::{BotRegistry, OutboundReply},
    config::{Config, StorageBackend},
    conversation,
    error::AppError,
    flow::{self, Trigger},
    normalizer,
    pagination::paginate,
    password::hash_password,
    store::{ConversationStore, MemoryStore, PgStore},
    telegram::TelegramBot,
    types::{
        AnswerMessageBody, AppState, ContactPatch, CreateContactBody, CreateMessageBody,
        CreateSupportAgentBody, NewContact, NewMessage, NewSupportAgent, PageQuery,
        PatchChatBody, PatchContactBody, PatchMessageBody, PatchSupportAgentBody, SenderType,
        SupportAgentPatch, SupportAgentProfile,
    },
    validator::{identify_provider, Provider},
};

const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";
static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

const CONTACT_NAME_MAX: usize = 255;
const CPF_MAX: usize = 11;
const TELEPHONE_MAX: usize = 15;
const AGENT_NAME_MAX: usize = 50;

type ApiResult = Result<axum::response::Response, AppError>;

fn is_valid_email(email: &str) -> Result<bool, AppError> {
    match EMAIL_RE.as_ref() {
        Ok(re) => Ok(re.is_match(email)),
        Err(err) => Err(AppError::Internal(format!("email pattern: {err}"))),
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_len(field: &str, value: Option<&str>, max: usize) -> Result<(), AppError> {
    match value {
        Some(v) if v.chars().count() > max => Err(AppError::Validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

fn validate_contact_fields(
    name: Option<&str>,
    email: Option<&str>,
    cpf: Option<&str>,
    telephone: Option<&str>,
) -> Result<(), AppError> {
    check_len("name", name, CONTACT_NAME_MAX)?;
    if let Some(email) = email {
        if !is_valid_email(email)? {
            return Err(AppError::Validation("Enter a valid email address.".to_string()));
        }
    }
    check_len("cpf", cpf, CPF_MAX)?;
    check_len("telephone", telephone, TELEPHONE_MAX)
}

fn page_of<T: serde::Serialize>(state: &AppState, items: Vec<T>, query: &PageQuery) -> ApiResult {
    let page_size = query.page_size.unwrap_or(state.page_size);
    let page = paginate(items, query.page.unwrap_or(1), page_size)?;
    Ok(Json(page).into_response())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

fn check_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

async fn receive_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    check_webhook_secret(&state, &headers)?;

    let provider = identify_provider(&body).ok_or(AppError::UnsupportedBot)?;
    let payload = serde_json::from_slice::<Value>(&body)
        .map_err(|err| AppError::Validation(err.to_string()))?;
    let inbound = match provider {
        Provider::Telegram => normalizer::normalize(&payload)?,
        Provider::Discord => return Err(AppError::UnsupportedBot),
    };
    let bot = state
        .bots
        .get(provider)
        .ok_or_else(|| AppError::UnknownBot(provider.name().to_string()))?;

    conversation::upsert(state.store.as_ref(), &inbound, provider.service()).await?;

    let trigger = match inbound.callback_token.as_deref() {
        Some(token) if inbound.is_callback => Trigger::Callback {
            token,
            message_id: inbound.message_native_id,
        },
        _ => Trigger::Text(&inbound.text),
    };
    let outcome = flow::dispatch(bot.as_ref(), inbound.chat_native_id, trigger).await?;

    let mut response = json!({ "message_received": true });
    if !outcome.is_handled() {
        response["handled"] = json!(false);
    }
    Ok(Json(response).into_response())
}

async fn answer_messages(
    Path(chat_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnswerMessageBody>,
) -> ApiResult {
    let bot = state
        .bots
        .by_name(&payload.bot_name)
        .ok_or_else(|| AppError::UnknownBot(payload.bot_name.clone()))?;
    let answer = payload.answer.trim();
    if answer.is_empty() {
        return Err(AppError::Validation("answer must not be empty".to_string()));
    }

    let chat = state
        .store
        .get_chat(chat_id)
        .await?
        .ok_or(AppError::NotFound("Chat"))?;
    let agent = state
        .store
        .get_support_agent(payload.support_agent)
        .await?
        .ok_or(AppError::NotFound("Support agent"))?;
    let native_chat_id = chat
        .chat_native_id
        .as_deref()
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or_else(|| AppError::Validation("Chat has no provider chat id".to_string()))?;

    // nothing is recorded for an answer the provider did not accept
    bot.send(native_chat_id, &OutboundReply::text(answer))
        .await?;

    if chat.support_agent_id.is_none() {
        state
            .store
            .assign_support_agent(chat.id, Some(agent.id))
            .await?;
    }
    state
        .store
        .create_message(NewMessage {
            chat_id: chat.id,
            sender_type: SenderType::SupportAgent,
            message_content: answer.to_string(),
        })
        .await?;

    info!(chat_id = chat.id, agent_id = agent.id, "agent answer sent");
    Ok(Json(json!({ "message_send": true })).into_response())
}

async fn create_contact(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateContactBody>,
) -> ApiResult {
    let name = clean(payload.name)
        .ok_or_else(|| AppError::Validation("name is required".to_string()))?;
    let email = clean(payload.email);
    let cpf = clean(payload.cpf);
    let telephone = clean(payload.telephone);
    validate_contact_fields(
        Some(name.as_str()),
        email.as_deref(),
        cpf.as_deref(),
        telephone.as_deref(),
    )?;

    let contact = state
        .store
        .create_contact(NewContact {
            name,
            email,
            cpf,
            telephone,
            external_id: None,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "contact_created": true, "contact": contact })),
    )
        .into_response())
}

async fn get_contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let contacts = state.store.list_contacts().await?;
    page_of(&state, contacts, &query)
}

async fn get_contact(Path(contact_id): Path<i64>, State(state): State<Arc<AppState>>) -> ApiResult {
    let contact = state
        .store
        .get_contact(contact_id)
        .await?
        .ok_or(AppError::NotFound("Contact"))?;
    Ok(Json(contact).into_response())
}

async fn get_contacts_by_name(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let contacts = state.store.contacts_by_name(&name).await?;
    page_of(&state, contacts, &query)
}

async fn update_contact(
    Path(contact_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PatchContactBody>,
) -> ApiResult {
    if payload.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }
    let patch = ContactPatch {
        name: clean(payload.name),
        email: clean(payload.email),
        cpf: clean(payload.cpf),
        telephone: clean(payload.telephone),
    };
    validate_contact_fields(
        patch.name.as_deref(),
        patch.email.as_deref(),
        patch.cpf.as_deref(),
        patch.telephone.as_deref(),
    )?;

    let contact = state
        .store
        .update_contact(contact_id, patch)
        .await?
        .ok_or(AppError::NotFound("Contact"))?;
    Ok(Json(json!({ "contact": contact })).into_response())
}

async fn delete_contact(
    Path(contact_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    if !state.store.delete_contact(contact_id).await? {
        return Err(AppError::NotFound("Contact"));
    }
    Ok(Json(json!({ "contact_deleted": true })).into_response())
}

async fn get_chats(State(state): State<Arc<AppState>>, Query(query): Query<PageQuery>) -> ApiResult {
    let chats = state.store.list_chats().await?;
    page_of(&state, chats, &query)
}

async fn get_chat(Path(chat_id): Path<i64>, State(state): State<Arc<AppState>>) -> ApiResult {
    let chat = state
        .store
        .get_chat(chat_id)
        .await?
        .ok_or(AppError::NotFound("Chat"))?;
    Ok(Json(chat).into_response())
}

async fn update_chat(
    Path(chat_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PatchChatBody>,
) -> ApiResult {
    let chat = match payload.support_agent_id {
        Some(agent_id) => state.store.assign_support_agent(chat_id, agent_id).await?,
        None => state.store.get_chat(chat_id).await?,
    }
    .ok_or(AppError::NotFound("Chat"))?;
    Ok(Json(json!({ "chat": chat })).into_response())
}

async fn close_chat(Path(chat_id): Path<i64>, State(state): State<Arc<AppState>>) -> ApiResult {
    let chat = state
        .store
        .close_chat(chat_id, Utc::now())
        .await?
        .ok_or(AppError::NotFound("Chat"))?;
    info!(chat_id, "chat closed");
    Ok(Json(json!({ "chat": chat })).into_response())
}

async fn delete_chat(Path(chat_id): Path<i64>, State(state): State<Arc<AppState>>) -> ApiResult {
    if !state.store.delete_chat(chat_id).await? {
        return Err(AppError::NotFound("Chat"));
    }
    Ok(Json(json!({ "chat_deleted": true })).into_response())
}

async fn get_chat_messages(
    Path(chat_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    if state.store.get_chat(chat_id).await?.is_none() {
        return Err(AppError::NotFound("Chat"));
    }
    let messages = state.store.messages_for_chat(chat_id).await?;
    page_of(&state, messages, &query)
}

async fn create_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateMessageBody>,
) -> ApiResult {
    let sender_type = match payload.sender_type {
        None => SenderType::User,
        Some(code) => SenderType::try_from(code).map_err(AppError::Validation)?,
    };
    let content = clean(payload.message_content)
        .ok_or_else(|| AppError::Validation("message_content is required".to_string()))?;

    let message = state
        .store
        .create_message(NewMessage {
            chat_id: payload.chat_id,
            sender_type,
            message_content: content,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message_received": true, "message": message })),
    )
        .into_response())
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let messages = state.store.list_messages().await?;
    page_of(&state, messages, &query)
}

async fn get_message(Path(message_id): Path<i64>, State(state): State<Arc<AppState>>) -> ApiResult {
    let message = state
        .store
        .get_message(message_id)
        .await?
        .ok_or(AppError::NotFound("Message"))?;
    Ok(Json(message).into_response())
}

async fn update_message(
    Path(message_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PatchMessageBody>,
) -> ApiResult {
    let content = clean(payload.message_content)
        .ok_or_else(|| AppError::Validation("message_content is required".to_string()))?;
    let message = state
        .store
        .update_message(message_id, content)
        .await?
        .ok_or(AppError::NotFound("Message"))?;
    Ok(Json(json!({ "message": message })).into_response())
}

async fn delete_message(
    Path(message_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    if !state.store.delete_message(message_id).await? {
        return Err(AppError::NotFound("Message"));
    }
    Ok(Json(json!({ "message_deleted": true })).into_response())
}

async fn get_messages_by_contact(
    Path(contact_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    if state.store.get_contact(contact_id).await?.is_none() {
        return Err(AppError::NotFound("Contact"));
    }
    let messages = state.store.messages_by_contact(contact_id).await?;
    page_of(&state, messages, &query)
}

async fn get_messages_by_support_agent(
    Path(agent_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    if state.store.get_support_agent(agent_id).await?.is_none() {
        return Err(AppError::NotFound("Support agent"));
    }
    let messages = state.store.messages_by_support_agent(agent_id).await?;
    page_of(&state, messages, &query)
}

fn validate_agent_names(first: Option<&str>, last: Option<&str>) -> Result<(), AppError> {
    check_len("first_name", first, AGENT_NAME_MAX)?;
    check_len("last_name", last, AGENT_NAME_MAX)
}

async fn create_support_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSupportAgentBody>,
) -> ApiResult {
    let first_name = clean(payload.first_name)
        .ok_or_else(|| AppError::Validation("first_name is required".to_string()))?;
    let last_name = clean(payload.last_name)
        .ok_or_else(|| AppError::Validation("last_name is required".to_string()))?;
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("password is required".to_string()))?;
    validate_agent_names(Some(first_name.as_str()), Some(last_name.as_str()))?;

    let agent = state
        .store
        .create_support_agent(NewSupportAgent {
            first_name,
            last_name,
            password_hash: hash_password(&password)?,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "support_agent_created": true, "support_agent": SupportAgentProfile::from(&agent) })),
    )
        .into_response())
}

async fn get_support_agents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let agents = state
        .store
        .list_support_agents()
        .await?
        .iter()
        .map(SupportAgentProfile::from)
        .collect::<Vec<_>>();
    page_of(&state, agents, &query)
}

async fn get_support_agent(
    Path(agent_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    let agent = state
        .store
        .get_support_agent(agent_id)
        .await?
        .ok_or(AppError::NotFound("Support agent"))?;
    Ok(Json(SupportAgentProfile::from(&agent)).into_response())
}

async fn update_support_agent(
    Path(agent_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PatchSupportAgentBody>,
) -> ApiResult {
    let first_name = clean(payload.first_name);
    let last_name = clean(payload.last_name);
    validate_agent_names(first_name.as_deref(), last_name.as_deref())?;
    let password_hash = match payload.password.filter(|p| !p.is_empty()) {
        Some(password) => Some(hash_password(&password)?),
        None => None,
    };

    let agent = state
        .store
        .update_support_agent(
            agent_id,
            SupportAgentPatch {
                first_name,
                last_name,
                password_hash,
            },
        )
        .await?
        .ok_or(AppError::NotFound("Support agent"))?;
    Ok(Json(json!({ "support_agent": SupportAgentProfile::from(&agent) })).into_response())
}

async fn delete_support_agent(
    Path(agent_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    if !state.store.delete_support_agent(agent_id).await? {
        return Err(AppError::NotFound("Support agent"));
    }
    Ok(Json(json!({ "support_agent_deleted": true })).into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/channel/receive-messages", post(receive_messages))
        .route(
            "/api/channel/answer-messages/{chat_id}",
            post(answer_messages),
        )
        .route("/api/contacts", get(get_contacts).post(create_contact))
        .route(
            "/api/contacts/{contact_id}",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
        .route("/api/contacts/by-name/{name}", get(get_contacts_by_name))
        .route("/api/chats", get(get_chats))
        .route(
            "/api/chats/{chat_id}",
            get(get_chat).patch(update_chat).delete(delete_chat),
        )
        .route("/api/chats/{chat_id}/close", post(close_chat))
        .route("/api/chats/{chat_id}/messages", get(get_chat_messages))
        .route("/api/messages", get(get_messages).post(create_message))
        .route(
            "/api/messages/{message_id}",
            get(get_message).patch(update_message).delete(delete_message),
        )
        .route(
            "/api/messages/by-contact/{contact_id}",
            get(get_messages_by_contact),
        )
        .route(
            "/api/messages/by-support-agent/{agent_id}",
            get(get_messages_by_support_agent),
        )
        .route(
            "/api/support-agents",
            get(get_support_agents).post(create_support_agent),
        )
        .route(
            "/api/support-agents/{agent_id}",
            get(get_support_agent)
                .patch(update_support_agent)
                .delete(delete_support_agent),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let store: Arc<dyn ConversationStore> = match config.storage {
        StorageBackend::Postgres => Arc::new(PgStore::connect(&config.database_url).await?),
        StorageBackend::Memory => {
            info!("using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let telegram = TelegramBot::new(
        config.telegram_api_url.as_str(),
        config.telegram_api_key.as_str(),
        config.outbound_timeout,
    )?;
    let bots = BotRegistry::new().with_bot(Provider::Telegram, Arc::new(telegram));
    if config.webhook_secret.is_none() {
        info!("TELEGRAM_WEBHOOK_SECRET not set; webhook requests are not authenticated");
    }

    let state = Arc::new(AppState {
        store,
        bots,
        page_size: config.page_size,
        webhook_secret: config.webhook_secret,
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(port = config.port, "support chat server listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "server runtime failure");
        return Err(err.into());
    }
    Ok(())
}
