use rocket::{
    response::stream::{Event, EventStream},
    tokio::select,
    Route, Shutdown, State,
};

use crate::config::Config;
use crate::error::Result;
use crate::model::api::auth::{AuthToken, Member};
use crate::notifier::Notifier;

pub fn routes() -> Vec<Route> {
    routes![events]
}

/// The session's events as Server-Sent Events, until the client goes away or
/// the server shuts down.
#[get("/sessions/<code>/events")]
fn events(
    code: &str,
    token: AuthToken<Member>,
    notifier: &State<Notifier>,
    config: &State<Config>,
    mut shutdown: Shutdown,
) -> Result<EventStream![]> {
    token.authorize(code)?;

    let participant_id = token.participant.id;
    let mut subscription = notifier.subscribe(token.session.id);
    debug!("Participant {participant_id} listening to session {}", token.session.code);

    let stream = EventStream! {
        loop {
            let event = select! {
                biased;
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield Event::from(event);
        }
        debug!("Event stream for participant {participant_id} ended");
    };
    Ok(stream.heartbeat(config.heartbeat_interval()))
}
