use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
    Client,
};
use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AuthToken, Member, Teller},
        round::{
            ClosedSummary, EndRequest, RoundDescription, RoundEnded, RoundResult, RoundSpec,
            Turnout, VoteRequest,
        },
    },
    common::RoundAction,
    db::{Ballot, Participant, Round, VoteReceipt},
    mongodb::{is_duplicate_key_error, retry_transient, Coll, Id},
};
use crate::notifier::{Notifier, SessionEvent};
use crate::tally::Verdict;

pub fn routes() -> Vec<Route> {
    routes![start_round, cast_vote, close_voting, end_round, cancel_round]
}

#[post("/sessions/<code>/rounds", data = "<spec>", format = "json")]
async fn start_round(
    code: &str,
    token: AuthToken<Teller>,
    spec: Json<RoundSpec>,
    rounds: Coll<Round>,
    notifier: &State<Notifier>,
) -> Result<Json<RoundDescription>> {
    token.authorize(code)?;
    let spec = spec.into_inner().validated()?;

    let turn = notifier.turn(token.session.id).await;
    let round = Round::start(token.session.id, spec.office, spec.description);
    match rounds.insert_one(&round, None).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key_error(&e) => {
            return Err(Error::Conflict("A round is already in progress".to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    info!("Round {} ({}) started in session {}", round.id, round.office, token.session.code);

    let description = RoundDescription::from(&round);
    turn.publish(SessionEvent::RoundStarted(description.clone()));
    Ok(Json(description))
}

#[post("/sessions/<code>/rounds/<round_id>/votes", data = "<vote>", format = "json")]
#[allow(clippy::too_many_arguments)]
async fn cast_vote(
    code: &str,
    round_id: Id,
    token: AuthToken<Member>,
    vote: Json<VoteRequest>,
    db_client: &State<Client>,
    rounds: Coll<Round>,
    participants: Coll<Participant>,
    ballots: Coll<Ballot>,
    receipts: Coll<VoteReceipt>,
    notifier: &State<Notifier>,
) -> Result<Json<Turnout>> {
    token.authorize(code)?;
    let session_id = token.session.id;
    let voter_id = token.participant.id;
    let candidate = vote.candidate_id;

    if let Some(candidate) = candidate {
        let eligible = participants
            .count_documents(doc! { "_id": candidate, "session_id": session_id }, None)
            .await?;
        if eligible == 0 {
            return Err(Error::Validation("Invalid candidate".to_string()));
        }
    }

    let turn = notifier.turn(session_id).await;
    let turnout = retry_transient(|| {
        record_vote(
            db_client,
            &rounds,
            &participants,
            &receipts,
            &ballots,
            session_id,
            round_id,
            voter_id,
            candidate,
        )
    })
    .await?;
    debug!("Vote recorded in round {round_id}");

    turn.publish(SessionEvent::VoteStatus(turnout));
    if turnout.voted_count >= turnout.total_participants {
        info!("Everyone has voted in round {round_id}");
        turn.publish(SessionEvent::AllVoted(round_id.into()));
    }
    Ok(Json(turnout))
}

/// Check the round is open, then write the receipt and the anonymous ballot,
/// all or nothing. Returns the turnout as of this vote.
#[allow(clippy::too_many_arguments)]
async fn record_vote(
    db_client: &Client,
    rounds: &Coll<Round>,
    participants: &Coll<Participant>,
    receipts: &Coll<VoteReceipt>,
    ballots: &Coll<Ballot>,
    session_id: Id,
    round_id: Id,
    voter_id: Id,
    candidate: Option<Id>,
) -> Result<Turnout> {
    let mut txn = db_client.start_session(None).await?;
    txn.start_transaction(None).await?;

    // Writing to the round makes a concurrent close or cancel conflict with us.
    let action = RoundAction::Vote;
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let round = rounds
        .find_one_and_update_with_session(
            action.guard(round_id, session_id),
            action.update(),
            options,
            &mut txn,
        )
        .await?
        .ok_or_else(|| Error::NotFound(action.rejection().to_string()))?;

    let receipt = VoteReceipt::new(round_id, voter_id);
    match receipts.insert_one_with_session(&receipt, None, &mut txn).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key_error(&e) => {
            return Err(Error::Conflict(
                "You have already voted in this round".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    ballots
        .insert_one_with_session(Ballot::new(round_id, candidate), None, &mut txn)
        .await?;
    let total_participants = participants
        .count_documents_with_session(doc! { "session_id": session_id }, None, &mut txn)
        .await?;
    txn.commit_transaction().await?;

    Ok(Turnout {
        round_id: round_id.into(),
        voted_count: round.votes_cast.into(),
        total_participants,
    })
}

#[post("/sessions/<code>/rounds/<round_id>/close")]
async fn close_voting(
    code: &str,
    round_id: Id,
    token: AuthToken<Teller>,
    rounds: Coll<Round>,
    participants: Coll<Participant>,
    ballots: Coll<Ballot>,
    notifier: &State<Notifier>,
) -> Result<Json<ClosedSummary>> {
    token.authorize(code)?;
    let session_id = token.session.id;

    let turn = notifier.turn(session_id).await;
    let action = RoundAction::Close;
    let result = rounds
        .update_one(action.guard(round_id, session_id), action.update(), None)
        .await?;
    if result.matched_count == 0 {
        return Err(Error::NotFound(action.rejection().to_string()));
    }

    let verdict = verdict(&participants, &ballots, session_id, round_id, token.session.body_size).await?;
    info!(
        "Voting closed in round {round_id} with {} vote(s)",
        verdict.total_votes
    );

    turn.publish(SessionEvent::VotingClosed(round_id.into()));
    Ok(Json(ClosedSummary::from(&verdict)))
}

#[post("/sessions/<code>/rounds/<round_id>/end", data = "<request>", format = "json")]
async fn end_round(
    code: &str,
    round_id: Id,
    token: AuthToken<Teller>,
    request: Json<EndRequest>,
    rounds: Coll<Round>,
    participants: Coll<Participant>,
    ballots: Coll<Ballot>,
    notifier: &State<Notifier>,
) -> Result<Json<RoundResult>> {
    token.authorize(code)?;
    let session_id = token.session.id;
    let level = request.disclosure_level;
    let action = RoundAction::Reveal(level);

    let turn = notifier.turn(session_id).await;
    let mut round = rounds
        .find_one(doc! { "_id": round_id, "session_id": session_id }, None)
        .await?
        .ok_or_else(|| Error::NotFound(action.rejection().to_string()))?;
    action.apply(round.status)?;

    // Ballots are frozen once closed and we hold the session's turn, so the
    // verdict cannot change under us.
    let verdict = verdict(&participants, &ballots, session_id, round_id, token.session.body_size).await?;
    level.check(&verdict)?;

    let result = rounds
        .update_one(action.guard(round_id, session_id), action.update(), None)
        .await?;
    if result.matched_count == 0 {
        return Err(Error::NotFound(action.rejection().to_string()));
    }
    round.status = action.target();
    round.disclosure_level = Some(level);
    round.active = false;
    info!("Round {round_id} revealed with disclosure {level:?}");

    let result = RoundResult::disclosed(&round, level, &verdict);
    turn.publish(SessionEvent::RoundEnded(Box::new(RoundEnded {
        round: RoundDescription::from(&round),
        result: result.clone(),
    })));
    Ok(Json(result))
}

#[post("/sessions/<code>/rounds/<round_id>/cancel")]
async fn cancel_round(
    code: &str,
    round_id: Id,
    token: AuthToken<Teller>,
    db_client: &State<Client>,
    rounds: Coll<Round>,
    ballots: Coll<Ballot>,
    receipts: Coll<VoteReceipt>,
    notifier: &State<Notifier>,
) -> Result<()> {
    token.authorize(code)?;
    let session_id = token.session.id;

    let turn = notifier.turn(session_id).await;
    retry_transient(|| {
        cancel_in_txn(db_client, &rounds, &ballots, &receipts, session_id, round_id)
    })
    .await?;
    info!("Round {round_id} cancelled, its votes discarded");

    turn.publish(SessionEvent::RoundCancelled(round_id.into()));
    Ok(())
}

/// Mark the round cancelled and discard every ballot and receipt cast in it.
async fn cancel_in_txn(
    db_client: &Client,
    rounds: &Coll<Round>,
    ballots: &Coll<Ballot>,
    receipts: &Coll<VoteReceipt>,
    session_id: Id,
    round_id: Id,
) -> Result<()> {
    let mut txn = db_client.start_session(None).await?;
    txn.start_transaction(None).await?;

    let action = RoundAction::Cancel;
    let result = rounds
        .update_one_with_session(
            action.guard(round_id, session_id),
            action.update(),
            None,
            &mut txn,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(Error::NotFound(action.rejection().to_string()));
    }

    let by_round = doc! { "round_id": round_id };
    ballots
        .delete_many_with_session(by_round.clone(), None, &mut txn)
        .await?;
    receipts
        .delete_many_with_session(by_round, None, &mut txn)
        .await?;
    txn.commit_transaction().await?;
    Ok(())
}

/// Count a round's ballots against the session's current roster.
async fn verdict(
    participants: &Coll<Participant>,
    ballots: &Coll<Ballot>,
    session_id: Id,
    round_id: Id,
    body_size: Option<u32>,
) -> Result<Verdict> {
    let roster = Participant::roster(participants, session_id).await?;
    let choices = Ballot::choices(ballots, round_id).await?;
    Ok(Verdict::from_ballots(choices, &roster, body_size))
}
