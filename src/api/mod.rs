use mongodb::bson::doc;
use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};

use crate::error::{Error, ErrorBody, GuardFailure, Result};
use crate::model::{
    common::code::{normalize_join_code, JOIN_CODE_LENGTH},
    db::Session,
    mongodb::Coll,
};

mod events;
mod round;
mod session;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(session::routes());
    routes.extend(round::routes());
    routes.extend(events::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Render every failure that never reached a handler in the same JSON shape
/// as handler errors.
#[catch(default)]
fn default_catcher(status: Status, req: &Request) -> (Status, Json<ErrorBody>) {
    if let GuardFailure(Some(body)) = req.local_cache(GuardFailure::default) {
        return (status, Json(body.clone()));
    }
    let error = match status.code {
        400 | 422 => "validation",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        code if code >= 500 => "internal",
        _ => "error",
    };
    let message = match status.code {
        400 | 422 => "Invalid input: malformed request body".to_string(),
        _ => status.reason().unwrap_or("Request failed").to_string(),
    };
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message,
        }),
    )
}

/// Find the live session with the given join code, however it was typed.
async fn session_by_code(code: &str, sessions: &Coll<Session>) -> Result<Session> {
    let typed = code.trim();
    if typed.chars().count() != JOIN_CODE_LENGTH {
        return Err(Error::Validation(format!(
            "Join code must be {JOIN_CODE_LENGTH} characters"
        )));
    }
    let not_found = || Error::not_found(format!("Session {}", typed.to_ascii_uppercase()));

    // Codes outside the alphabet were never issued.
    let code = normalize_join_code(typed).ok_or_else(not_found)?;
    sessions
        .find_one(doc! { "code": &code }, None)
        .await?
        .filter(|session| !session.is_expired())
        .ok_or_else(not_found)
}

/// Helpers shared by the HTTP tests.
#[cfg(test)]
pub(crate) mod testing {
    use rocket::{
        http::{ContentType, Header, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json::{self, json},
    };
    use serde::de::DeserializeOwned;

    use crate::error::ErrorBody;
    use crate::model::api::{
        round::RoundDescription,
        session::{Joined, SessionCreated, SessionSpec},
        state::SessionState,
    };

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {token}"))
    }

    pub async fn body<T: DeserializeOwned>(response: LocalResponse<'_>) -> T {
        let text = response.into_string().await.unwrap();
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("{e}: {text}"))
    }

    /// Assert the status and return the error body.
    pub async fn rejected(response: LocalResponse<'_>, status: Status) -> ErrorBody {
        assert_eq!(status, response.status());
        body(response).await
    }

    pub async fn create_session(client: &Client) -> SessionCreated {
        let response = client
            .post("/sessions")
            .header(ContentType::JSON)
            .body(json!(SessionSpec::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        body(response).await
    }

    pub async fn join(client: &Client, code: &str, name: &str) -> String {
        let response = client
            .post(format!("/sessions/{code}/join"))
            .header(ContentType::JSON)
            .body(json!({ "name": name }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        body::<Joined>(response).await.token
    }

    pub async fn state(client: &Client, code: &str, token: &str) -> SessionState {
        let response = client
            .get(format!("/sessions/{code}"))
            .header(bearer(token))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        body(response).await
    }

    pub async fn start_round(client: &Client, code: &str, token: &str, office: &str) -> RoundDescription {
        let response = client
            .post(format!("/sessions/{code}/rounds"))
            .header(ContentType::JSON)
            .header(bearer(token))
            .body(json!({ "office": office }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        body(response).await
    }

    pub async fn post_json<'a>(
        client: &'a Client,
        uri: String,
        token: &str,
        payload: serde_json::Value,
    ) -> LocalResponse<'a> {
        client
            .post(uri)
            .header(ContentType::JSON)
            .header(bearer(token))
            .body(payload.to_string())
            .dispatch()
            .await
    }
}
