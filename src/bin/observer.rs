//! Table observer - joins a room and logs every projection update
//!
//! Configuration comes from `BLACKJACK_*` environment variables; `--endpoint`
//! overrides the coordinator address. Ctrl-C leaves the room and disconnects.

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blackjack_sync::{ClientConfig, ConnectionState, GameClient, ParticipantId, Projection, RoomId};

#[derive(Parser, Debug)]
#[command(author, version, about = "Join a blackjack room and follow its state")]
struct Args {
    /// Display name to join with
    #[arg(short, long, default_value = "observer")]
    name: String,

    /// Room to join
    #[arg(short, long, default_value = "table-1")]
    room: String,

    /// Coordinator address (ws, wss, http or https)
    #[arg(short, long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,blackjack_sync=debug")),
        )
        .init();

    let mut config = ClientConfig::from_env()?;
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = blackjack_sync::config::websocket_url(endpoint)?;
    }
    info!(endpoint = %config.endpoint, room = %args.room, "starting observer");

    let client = GameClient::with_websocket(&config);
    client.connect()?;

    let room = RoomId::new(args.room.clone());
    let mut updates = client.subscribe();
    // Connection id we last joined under; a new id means a fresh seat is needed
    let mut joined_as: Option<ParticipantId> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving");
                if let Err(err) = client.actions().leave() {
                    warn!("leave not sent: {err}");
                }
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let projection = updates.borrow_and_update().clone();
                log_projection(&projection);

                if let ConnectionState::GaveUp { attempts } = projection.connection() {
                    warn!(attempts, "coordinator unreachable, exiting");
                    break;
                }

                let local_id = projection.local_id().cloned();
                if local_id.is_some() && local_id != joined_as {
                    match client.actions().join(&args.name, room.clone()) {
                        Ok(()) => joined_as = local_id,
                        Err(err) => warn!("join not sent: {err}"),
                    }
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn log_projection(projection: &Projection) {
    let Some(session) = projection.session() else {
        info!(
            revision = projection.revision(),
            connection = %projection.connection(),
            membership = %projection.membership(),
            error = ?projection.last_error().map(|r| r.fault.to_string()),
            "no session"
        );
        return;
    };

    info!(
        revision = projection.revision(),
        room = %session.session_id,
        phase = %session.phase,
        pot = session.pot_total,
        players = session.participants.len(),
        dealer = session.dealer.hand.score(),
        message = %session.status_message,
        "session"
    );

    if let Some(local) = projection.local() {
        info!(
            chips = local.chips,
            bet = local.bet,
            score = local.hand.score(),
            status = %local.status,
            my_turn = local.is_current_turn,
            "local"
        );
    }
}
