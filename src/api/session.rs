use mongodb::{bson::doc, Client, Database};
use rocket::{serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AuthToken, Member, Teller},
        session::{
            BodySizeRequest, Joined, NameRequest, ParticipantDescription, ParticipantUpdate,
            PromoteRequest, SessionCreated, SessionSpec, SessionUpdate, Verified,
        },
        state::SessionState,
    },
    common::{code::generate_join_code, ParticipantRole},
    db::{Participant, Session},
    mongodb::{is_duplicate_key_error, retry_transient, Coll, Id},
};
use crate::notifier::{Notifier, SessionEvent};

use super::session_by_code;

/// Fresh join codes tried before giving up on creating a session.
const MAX_CODE_ATTEMPTS: usize = 10;

pub fn routes() -> Vec<Route> {
    routes![
        create_session,
        join_session,
        verify_token,
        session_state,
        rename,
        promote,
        step_down,
        set_body_size,
    ]
}

#[post("/sessions", data = "<spec>", format = "json")]
async fn create_session(
    spec: Json<SessionSpec>,
    db_client: &State<Client>,
    sessions: Coll<Session>,
    participants: Coll<Participant>,
    config: &State<Config>,
) -> Result<Json<SessionCreated>> {
    let spec = spec.into_inner().validated()?;

    for _ in 0..MAX_CODE_ATTEMPTS {
        let session = Session::new(
            generate_join_code(),
            spec.name.clone(),
            spec.body_size,
            config.session_ttl(),
        );
        let teller = Participant::new(session.id, spec.teller_name.clone(), ParticipantRole::Teller);

        match retry_transient(|| insert_session(db_client, &sessions, &participants, &session, &teller)).await {
            Ok(()) => {
                info!("Created session {} ({})", session.code, session.id);
                return Ok(Json(SessionCreated {
                    code: session.code,
                    token: teller.token,
                }));
            }
            Err(Error::Db(e)) if is_duplicate_key_error(&e) => {
                debug!("Join code {} already taken, drawing another", session.code);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Conflict(
        "Could not allocate a join code, try again".to_string(),
    ))
}

/// Insert a session together with its first teller.
async fn insert_session(
    db_client: &Client,
    sessions: &Coll<Session>,
    participants: &Coll<Participant>,
    session: &Session,
    teller: &Participant,
) -> Result<()> {
    let mut txn = db_client.start_session(None).await?;
    txn.start_transaction(None).await?;
    sessions.insert_one_with_session(session, None, &mut txn).await?;
    participants.insert_one_with_session(teller, None, &mut txn).await?;
    txn.commit_transaction().await?;
    Ok(())
}

#[post("/sessions/<code>/join", data = "<request>", format = "json")]
async fn join_session(
    code: &str,
    request: Json<NameRequest>,
    sessions: Coll<Session>,
    participants: Coll<Participant>,
    notifier: &State<Notifier>,
) -> Result<Json<Joined>> {
    let name = request.validated()?;
    let session = session_by_code(code, &sessions).await?;

    let turn = notifier.turn(session.id).await;
    let voter = Participant::new(session.id, name, ParticipantRole::Voter);
    participants.insert_one(&voter, None).await?;
    info!("Participant {} joined session {}", voter.id, session.code);

    turn.publish(SessionEvent::ParticipantJoined(ParticipantDescription::from(&voter)));
    Ok(Json(Joined { token: voter.token }))
}

#[get("/sessions/<code>/verify")]
fn verify_token(code: &str, token: AuthToken<Member>) -> Result<Json<Verified>> {
    token.authorize(code)?;
    Ok(Json(Verified { valid: true }))
}

#[get("/sessions/<code>")]
async fn session_state(
    code: &str,
    token: AuthToken<Member>,
    db: &State<Database>,
) -> Result<Json<SessionState>> {
    token.authorize(code)?;
    let state = SessionState::load(db, &token.session, &token.participant).await?;
    Ok(Json(state))
}

#[put("/sessions/<code>/me/name", data = "<request>", format = "json")]
async fn rename(
    code: &str,
    token: AuthToken<Member>,
    request: Json<NameRequest>,
    participants: Coll<Participant>,
    notifier: &State<Notifier>,
) -> Result<()> {
    token.authorize(code)?;
    let name = request.validated()?;

    let me = token.participant.id;
    let turn = notifier.turn(token.session.id).await;
    participants
        .update_one(me.as_doc(), doc! { "$set": { "name": &name } }, None)
        .await?;

    turn.publish(SessionEvent::ParticipantUpdated(ParticipantUpdate::renamed(me, name)));
    Ok(())
}

#[post("/sessions/<code>/tellers", data = "<request>", format = "json")]
async fn promote(
    code: &str,
    token: AuthToken<Teller>,
    request: Json<PromoteRequest>,
    db_client: &State<Client>,
    sessions: Coll<Session>,
    participants: Coll<Participant>,
    notifier: &State<Notifier>,
) -> Result<()> {
    token.authorize(code)?;
    let session_id = token.session.id;
    let target = request.participant_id;

    participants
        .find_one(doc! { "_id": target, "session_id": session_id }, None)
        .await?
        .ok_or_else(|| Error::not_found("Participant"))?;

    let turn = notifier.turn(session_id).await;
    let promoted = retry_transient(|| {
        promote_in_txn(db_client, &sessions, &participants, session_id, target)
    })
    .await?;

    if promoted {
        info!("Participant {target} promoted to teller in session {}", token.session.code);
        turn.publish(SessionEvent::ParticipantUpdated(
            ParticipantUpdate::role_changed(target, ParticipantRole::Teller),
        ));
    } else {
        debug!("Participant {target} is already a teller");
    }
    Ok(())
}

/// Make a voter a teller and count them. Returns false if they already were one.
async fn promote_in_txn(
    db_client: &Client,
    sessions: &Coll<Session>,
    participants: &Coll<Participant>,
    session_id: Id,
    target: Id,
) -> Result<bool> {
    let mut txn = db_client.start_session(None).await?;
    txn.start_transaction(None).await?;

    let result = participants
        .update_one_with_session(
            doc! { "_id": target, "session_id": session_id, "role": ParticipantRole::Voter },
            doc! { "$set": { "role": ParticipantRole::Teller } },
            None,
            &mut txn,
        )
        .await?;
    if result.modified_count == 0 {
        return Ok(false);
    }

    sessions
        .update_one_with_session(
            session_id.as_doc(),
            doc! { "$inc": { "teller_count": 1 } },
            None,
            &mut txn,
        )
        .await?;
    txn.commit_transaction().await?;
    Ok(true)
}

#[delete("/sessions/<code>/tellers/me")]
async fn step_down(
    code: &str,
    token: AuthToken<Teller>,
    db_client: &State<Client>,
    sessions: Coll<Session>,
    participants: Coll<Participant>,
    notifier: &State<Notifier>,
) -> Result<()> {
    token.authorize(code)?;
    let session_id = token.session.id;
    let me = token.participant.id;

    let turn = notifier.turn(session_id).await;
    retry_transient(|| step_down_in_txn(db_client, &sessions, &participants, session_id, me))
        .await?;

    info!("Participant {me} stepped down as teller in session {}", token.session.code);
    turn.publish(SessionEvent::ParticipantUpdated(
        ParticipantUpdate::role_changed(me, ParticipantRole::Voter),
    ));
    Ok(())
}

/// Give up the teller role, provided another teller remains.
async fn step_down_in_txn(
    db_client: &Client,
    sessions: &Coll<Session>,
    participants: &Coll<Participant>,
    session_id: Id,
    me: Id,
) -> Result<()> {
    let mut txn = db_client.start_session(None).await?;
    txn.start_transaction(None).await?;

    let result = sessions
        .update_one_with_session(
            doc! { "_id": session_id, "teller_count": { "$gt": 1 } },
            doc! { "$inc": { "teller_count": -1 } },
            None,
            &mut txn,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(Error::Conflict(
            "Cannot step down: you are the only teller".to_string(),
        ));
    }

    let result = participants
        .update_one_with_session(
            doc! { "_id": me, "role": ParticipantRole::Teller },
            doc! { "$set": { "role": ParticipantRole::Voter } },
            None,
            &mut txn,
        )
        .await?;
    if result.modified_count == 0 {
        // Stepped down concurrently; dropping the txn undoes the decrement.
        return Err(Error::Forbidden("Only tellers can do this".to_string()));
    }

    txn.commit_transaction().await?;
    Ok(())
}

#[put("/sessions/<code>/body_size", data = "<request>", format = "json")]
async fn set_body_size(
    code: &str,
    token: AuthToken<Teller>,
    request: Json<BodySizeRequest>,
    sessions: Coll<Session>,
    notifier: &State<Notifier>,
) -> Result<()> {
    token.authorize(code)?;
    let body_size = request.into_inner().validated()?;

    let session_id = token.session.id;
    let turn = notifier.turn(session_id).await;
    sessions
        .update_one(
            session_id.as_doc(),
            doc! { "$set": { "body_size": body_size } },
            None,
        )
        .await?;
    info!("Session {} body size set to {body_size:?}", token.session.code);

    turn.publish(SessionEvent::ElectionUpdated(SessionUpdate { body_size }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json::json,
    };

    use super::*;
    use crate::api::testing::{bearer, body, create_session, join, rejected, state};

    #[backend_test]
    async fn create_and_join(client: Client, sessions: Coll<Session>, participants: Coll<Participant>) {
        let created = create_session(&client).await;
        assert_eq!(created.code.len(), 6);

        let session = sessions
            .find_one(doc! { "code": &created.code }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.name, SessionSpec::example().name);
        assert_eq!(session.teller_count, 1);

        // Codes are matched case-insensitively.
        let token = join(&client, &created.code.to_lowercase(), "  Val  ").await;
        let voter = participants
            .find_one(doc! { "token": &token }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(voter.name, "Val");
        assert_eq!(voter.role, ParticipantRole::Voter);
        assert_eq!(voter.session_id, session.id);

        let view = state(&client, &created.code, &token).await;
        assert_eq!(view.participants.len(), 2);
        assert!(!view.is_teller);
        assert_eq!(Id::from(view.current_participant_id), voter.id);
    }

    #[backend_test]
    async fn create_rejects_bad_input(client: Client, sessions: Coll<Session>) {
        let response = client
            .post("/sessions")
            .header(ContentType::JSON)
            .body(json!({ "name": "   ", "teller_name": "Tess" }).to_string())
            .dispatch()
            .await;
        let err = rejected(response, Status::UnprocessableEntity).await;
        assert_eq!(err.error, "validation");

        let response = client
            .post("/sessions")
            .header(ContentType::JSON)
            .body(json!({ "name": "AGM", "teller_name": "Tess", "body_size": 0 }).to_string())
            .dispatch()
            .await;
        rejected(response, Status::UnprocessableEntity).await;

        assert_eq!(sessions.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn join_unknown_or_malformed_code(client: Client) {
        let response = client
            .post("/sessions/ZZZZZZ/join")
            .header(ContentType::JSON)
            .body(json!({ "name": "Val" }).to_string())
            .dispatch()
            .await;
        let err = rejected(response, Status::NotFound).await;
        assert_eq!(err.error, "not_found");

        let response = client
            .post("/sessions/ABC/join")
            .header(ContentType::JSON)
            .body(json!({ "name": "Val" }).to_string())
            .dispatch()
            .await;
        rejected(response, Status::UnprocessableEntity).await;
    }

    #[backend_test]
    async fn expired_session_is_not_found(client: Client, sessions: Coll<Session>) {
        let created = create_session(&client).await;
        sessions
            .update_one(
                doc! { "code": &created.code },
                doc! { "$set": { "expires_at": mongodb::bson::DateTime::from_chrono(chrono::Utc::now()) } },
                None,
            )
            .await
            .unwrap();

        let response = client
            .post(format!("/sessions/{}/join", created.code))
            .header(ContentType::JSON)
            .body(json!({ "name": "Val" }).to_string())
            .dispatch()
            .await;
        rejected(response, Status::NotFound).await;

        let response = client
            .get(format!("/sessions/{}/verify", created.code))
            .header(bearer(&created.token))
            .dispatch()
            .await;
        rejected(response, Status::NotFound).await;
    }

    #[backend_test]
    async fn verify_checks_token_and_code(client: Client) {
        let first = create_session(&client).await;
        let second = create_session(&client).await;

        let response = client
            .get(format!("/sessions/{}/verify", first.code))
            .header(bearer(&first.token))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(body::<Verified>(response).await.valid);

        // A valid token for another session.
        let response = client
            .get(format!("/sessions/{}/verify", second.code))
            .header(bearer(&first.token))
            .dispatch()
            .await;
        let err = rejected(response, Status::Unauthorized).await;
        assert_eq!(err.message, "Unauthorized: Token does not belong to this session");

        let response = client
            .get(format!("/sessions/{}/verify", first.code))
            .header(bearer("not-a-token"))
            .dispatch()
            .await;
        let err = rejected(response, Status::Unauthorized).await;
        assert_eq!(err.message, "Unauthorized: Invalid token");

        let response = client
            .get(format!("/sessions/{}/verify", first.code))
            .dispatch()
            .await;
        rejected(response, Status::Unauthorized).await;
    }

    #[backend_test]
    async fn rename_updates_roster(client: Client, participants: Coll<Participant>) {
        let created = create_session(&client).await;
        let token = join(&client, &created.code, "Val").await;

        let response = client
            .put(format!("/sessions/{}/me/name", created.code))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "name": "Valerie" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let voter = participants
            .find_one(doc! { "token": &token }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(voter.name, "Valerie");

        let response = client
            .put(format!("/sessions/{}/me/name", created.code))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "name": "x".repeat(101) }).to_string())
            .dispatch()
            .await;
        rejected(response, Status::UnprocessableEntity).await;
    }

    #[backend_test]
    async fn promote_then_step_down(client: Client, sessions: Coll<Session>, participants: Coll<Participant>) {
        let created = create_session(&client).await;
        let token = join(&client, &created.code, "Val").await;
        let voter = participants
            .find_one(doc! { "token": &token }, None)
            .await
            .unwrap()
            .unwrap();

        // The sole teller cannot step down.
        let response = client
            .delete(format!("/sessions/{}/tellers/me", created.code))
            .header(bearer(&created.token))
            .dispatch()
            .await;
        let err = rejected(response, Status::Conflict).await;
        assert_eq!(err.message, "Conflict: Cannot step down: you are the only teller");

        // Voters cannot promote.
        let promote_val = json!({ "participant_id": voter.id.to_string() }).to_string();
        let response = client
            .post(format!("/sessions/{}/tellers", created.code))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(promote_val.clone())
            .dispatch()
            .await;
        let err = rejected(response, Status::Forbidden).await;
        assert_eq!(err.error, "forbidden");

        // Promoting twice counts once.
        for _ in 0..2 {
            let response = client
                .post(format!("/sessions/{}/tellers", created.code))
                .header(ContentType::JSON)
                .header(bearer(&created.token))
                .body(promote_val.clone())
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
        }
        let session = sessions
            .find_one(doc! { "code": &created.code }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.teller_count, 2);
        assert!(state(&client, &created.code, &token).await.is_teller);

        // Now the creator can step down, and the new teller cannot.
        let response = client
            .delete(format!("/sessions/{}/tellers/me", created.code))
            .header(bearer(&created.token))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(!state(&client, &created.code, &created.token).await.is_teller);

        let response = client
            .delete(format!("/sessions/{}/tellers/me", created.code))
            .header(bearer(&token))
            .dispatch()
            .await;
        rejected(response, Status::Conflict).await;

        let session = sessions.find_one(session.id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(session.teller_count, 1);
    }

    #[backend_test]
    async fn promote_outsider_is_not_found(client: Client) {
        let created = create_session(&client).await;
        let response = client
            .post(format!("/sessions/{}/tellers", created.code))
            .header(ContentType::JSON)
            .header(bearer(&created.token))
            .body(json!({ "participant_id": Id::new().to_string() }).to_string())
            .dispatch()
            .await;
        rejected(response, Status::NotFound).await;
    }

    #[backend_test]
    async fn body_size_can_be_set_and_cleared(client: Client, sessions: Coll<Session>) {
        let created = create_session(&client).await;
        let uri = format!("/sessions/{}/body_size", created.code);

        for (payload, expected) in [(json!({ "body_size": 9 }), Some(9)), (json!({ "body_size": null }), None)] {
            let response = client
                .put(uri.clone())
                .header(ContentType::JSON)
                .header(bearer(&created.token))
                .body(payload.to_string())
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
            let session = sessions
                .find_one(doc! { "code": &created.code }, None)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(session.body_size, expected);
        }

        let response = client
            .put(uri)
            .header(ContentType::JSON)
            .header(bearer(&created.token))
            .body(json!({ "body_size": 0 }).to_string())
            .dispatch()
            .await;
        rejected(response, Status::UnprocessableEntity).await;
    }
}
