use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::Plant;
use crate::session::{Session, UserProfile};

/// Errors crossing the HTTP boundary. Ambiguous name resolution is not
/// in here on purpose: it is a normal conversation branch, not a fault.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no se pudo conectar con el servidor: {0}")]
    Network(#[from] reqwest::Error),
    #[error("el servidor respondió {status}: {message}")]
    Status { status: u16, message: String },
    #[error("sesión no válida, inicia sesión de nuevo")]
    Auth,
    #[error("respuesta inesperada del servidor: {0}")]
    Malformed(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Closed set of chat reply shapes. Downstream code matches on this
/// instead of optional-chaining through a loose JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Backend answered with text.
    Answer(String),
    /// Backend reported success but sent no text; caller templates a
    /// status line instead.
    Empty,
    /// Backend reported a failure it could describe.
    Failure(String),
}

/// The backend keys the two turn kinds on different field names:
/// advice turns carry `response_type`, the automatic health check
/// carries `request_type`. Exactly one is set per request.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ChatContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_species: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_state: Option<String>,
    pub user_question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_id: Option<i64>,
    pub context: ChatContext,
}

#[derive(Deserialize, Debug, Default)]
struct ChatReplyData {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChatReplyRaw {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ChatReplyData>,
}

/// Missing fields degrade to absent/zero rather than failing the parse.
fn coerce_chat_reply(raw: ChatReplyRaw) -> ChatOutcome {
    if raw.status == "success" {
        match raw.data.and_then(|d| d.text).filter(|t| !t.is_empty()) {
            Some(text) => ChatOutcome::Answer(text),
            None => ChatOutcome::Empty,
        }
    } else {
        ChatOutcome::Failure(
            raw.message
                .unwrap_or_else(|| "Por favor, intenta nuevamente.".to_string()),
        )
    }
}

#[derive(Deserialize, Debug, Default)]
struct LoginRaw {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
}

/// The backend has answered with the token under three different keys
/// over time; accept all of them, oldest first.
fn extract_token(raw: &LoginRaw) -> Option<String> {
    raw.token
        .clone()
        .or_else(|| raw.key.clone())
        .or_else(|| raw.access.clone())
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct DashboardSummary {
    #[serde(default)]
    pub total_plantas: i64,
    #[serde(default)]
    pub total_sensores: i64,
    #[serde(default)]
    pub plantas_necesitan_agua: i64,
    #[serde(default)]
    pub plantas_criticas: i64,
    #[serde(default)]
    pub temperatura_promedio: Option<String>,
    #[serde(default)]
    pub humedad_promedio: Option<String>,
    #[serde(default)]
    pub ultima_actualizacion: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Notification {
    pub id: i64,
    #[serde(default)]
    pub mensaje: String,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub leida: bool,
    #[serde(default)]
    pub fecha: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn from_session(session: &Session) -> ApiResult<Self> {
        let mut api = Self::new(&session.base_url)?;
        api.token = Some(session.token.clone());
        Ok(api)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Token {}", t))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ApiResult<T> {
        let mut request = self.client.get(self.url(path));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        debug!(path, "GET");
        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(ApiError::Auth);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(path, status = status.as_u16(), "request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// `POST /auth/login/`. On success returns a ready-to-save session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> ApiResult<Session> {
        let body = serde_json::json!({ "email": email, "password": password });

        let response = self
            .client
            .post(self.url("auth/login/"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let raw: LoginRaw = response.json().await?;
        let token = extract_token(&raw)
            .ok_or_else(|| ApiError::Malformed("login reply carries no token".to_string()))?;

        let user = raw.user.unwrap_or_else(|| UserProfile {
            email: email.to_string(),
            ..Default::default()
        });

        debug!(email, "login ok");
        Ok(Session::new(token, user, self.base_url.clone()))
    }

    /// `GET /plantas/` — the registry load. Callers treat a failure as
    /// "no plants known", never as fatal.
    pub async fn list_plants(&self) -> ApiResult<Vec<Plant>> {
        let plants: Vec<Plant> = self.get_json("plantas/").await?;
        debug!(count = plants.len(), "plants loaded");
        Ok(plants)
    }

    pub async fn dashboard(&self) -> ApiResult<DashboardSummary> {
        self.get_json("dashboard/").await
    }

    pub async fn notifications(&self, unread_only: bool) -> ApiResult<Vec<Notification>> {
        let path = if unread_only {
            "notificaciones/?leida=false"
        } else {
            "notificaciones/"
        };
        self.get_json(path).await
    }

    pub async fn mark_notification_read(&self, id: i64) -> ApiResult<()> {
        let mut request = self
            .client
            .patch(self.url(&format!("notificaciones/{}/", id)))
            .json(&serde_json::json!({ "leida": true }));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(ApiError::Auth);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// `POST /ai/chat/`. HTTP-level failures with a body still come back
    /// as `ChatOutcome::Failure`; only transport problems are `Err`.
    pub async fn chat(&self, request: &ChatRequest) -> ApiResult<ChatOutcome> {
        let mut builder = self.client.post(self.url("ai/chat/")).json(request);
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }

        debug!(plant_id = ?request.plant_id, "chat turn");
        let response = builder.send().await?;
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(ApiError::Auth);
        }

        let raw: ChatReplyRaw = response.json().await.unwrap_or_default();
        if !status.is_success() && raw.status != "success" {
            return Ok(ChatOutcome::Failure(raw.message.unwrap_or_else(|| {
                format!("Error {} del servidor", status.as_u16())
            })));
        }

        Ok(coerce_chat_reply(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_success_with_text() {
        let raw: ChatReplyRaw = serde_json::from_str(
            r#"{"status":"success","data":{"text":"Tu lavanda está bien"}}"#,
        )
        .unwrap();
        assert_eq!(
            coerce_chat_reply(raw),
            ChatOutcome::Answer("Tu lavanda está bien".to_string())
        );
    }

    #[test]
    fn coerces_success_without_text() {
        let raw: ChatReplyRaw =
            serde_json::from_str(r#"{"status":"success","data":{}}"#).unwrap();
        assert_eq!(coerce_chat_reply(raw), ChatOutcome::Empty);

        let raw: ChatReplyRaw = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(coerce_chat_reply(raw), ChatOutcome::Empty);
    }

    #[test]
    fn coerces_failure_with_and_without_message() {
        let raw: ChatReplyRaw =
            serde_json::from_str(r#"{"status":"error","message":"sin modelo"}"#).unwrap();
        assert_eq!(
            coerce_chat_reply(raw),
            ChatOutcome::Failure("sin modelo".to_string())
        );

        let raw: ChatReplyRaw = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(coerce_chat_reply(raw), ChatOutcome::Failure(_)));
    }

    #[test]
    fn token_key_priority() {
        let raw: LoginRaw = serde_json::from_str(
            r#"{"token":"t1","key":"t2","access":"t3"}"#,
        )
        .unwrap();
        assert_eq!(extract_token(&raw).as_deref(), Some("t1"));

        let raw: LoginRaw = serde_json::from_str(r#"{"key":"t2"}"#).unwrap();
        assert_eq!(extract_token(&raw).as_deref(), Some("t2"));

        let raw: LoginRaw = serde_json::from_str(r#"{"access":"t3"}"#).unwrap();
        assert_eq!(extract_token(&raw).as_deref(), Some("t3"));

        let raw: LoginRaw = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(extract_token(&raw), None);
    }

    #[test]
    fn dashboard_defaults_missing_fields() {
        let summary: DashboardSummary = serde_json::from_str(r#"{"total_plantas":3}"#).unwrap();
        assert_eq!(summary.total_plantas, 3);
        assert_eq!(summary.plantas_criticas, 0);
        assert!(summary.humedad_promedio.is_none());
    }

    #[test]
    fn chat_request_omits_absent_plant() {
        let request = ChatRequest {
            message: "hola".to_string(),
            plant_id: None,
            context: ChatContext {
                user_question: "hola".to_string(),
                response_type: Some("detailed_plant_advice".to_string()),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("plant_id").is_none());
        assert!(json["context"].get("plant_name").is_none());
    }

    #[test]
    fn turn_kinds_serialize_under_their_own_field_names() {
        let advice = ChatContext {
            user_question: "¿riego?".to_string(),
            response_type: Some("detailed_plant_advice".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&advice).unwrap();
        assert_eq!(json["response_type"], "detailed_plant_advice");
        assert!(json.get("request_type").is_none());

        let health = ChatContext {
            user_question: "¿Cómo está mi planta?".to_string(),
            request_type: Some("plant_health_check".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["request_type"], "plant_health_check");
        assert!(json.get("response_type").is_none());
    }
}
