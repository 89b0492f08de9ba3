use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use peercall::testing::{FakeMediaDevices, FakeTransportFactory};
use peercall::types::{CallId, IceCandidate, Role};
use peercall::{CallConfig, CallSessionController, NegotiationState};
use std::sync::Arc;
use std::time::Duration;

// Loopback demo: an initiator and a responder negotiate a call over one
// in-memory store, using scripted transports in place of a real peer connection.
//
// Usage:
//   cargo run --features testing                  # generated call id
//   cargo run --features testing -- --call-id 1234
//   RUST_LOG=debug cargo run --features testing -- --timeout-secs 5

#[derive(Parser, Debug)]
#[command(about = "Negotiate a loopback call between two in-process peers")]
struct Args {
    /// Call id to use instead of a generated one
    #[arg(short, long)]
    call_id: Option<String>,

    /// Negotiation timeout in seconds, 0 to wait forever
    #[arg(short, long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    if let Err(e) = rt.block_on(run(args)) {
        error!("demo failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = CallConfig::default();
    config.engine.negotiation_timeout =
        (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs));

    let store = Arc::new(peercall::store::InMemoryDocumentStore::new());
    let initiator = CallSessionController::new(
        Arc::new(FakeMediaDevices::new()),
        store.clone(),
        Arc::new(
            FakeTransportFactory::new("offer-sdp")
                .with_candidates(vec![
                    IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.1 50000 typ host")
                        .with_sdp_mid("0")
                        .with_sdp_m_line_index(0),
                ])
                .with_auto_connect(),
        ),
        config.clone(),
    )
    .await
    .context("initiator setup")?;
    let responder = CallSessionController::new(
        Arc::new(FakeMediaDevices::new()),
        store.clone(),
        Arc::new(
            FakeTransportFactory::new("answer-sdp")
                .with_candidates(vec![
                    IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.2 50001 typ host")
                        .with_sdp_mid("0")
                        .with_sdp_m_line_index(0),
                ])
                .with_auto_connect(),
        ),
        config,
    )
    .await
    .context("responder setup")?;

    let mut errors = initiator.events().error.subscribe();
    tokio::spawn(async move {
        while let Ok(err) = errors.recv().await {
            warn!("initiator reported: {err}");
        }
    });

    let call_id = initiator
        .start_call(Role::Initiator, args.call_id.map(CallId::new))
        .await
        .context("starting initiator")?;
    info!("share call id {call_id} with the other participant");
    responder
        .start_call(Role::Responder, Some(call_id.clone()))
        .await
        .context("starting responder")?;

    for (name, controller) in [("initiator", &initiator), ("responder", &responder)] {
        tokio::time::timeout(
            Duration::from_secs(5),
            controller.engine().wait_for_state(NegotiationState::Connected),
        )
        .await
        .with_context(|| format!("{name} did not connect"))??;
        let view = serde_json::to_string(&controller.view().await)?;
        info!("{name}: {view}");
    }

    let muted = initiator.toggle_mute();
    info!("initiator muted: {muted}");

    initiator.hangup().await?;
    responder.hangup().await?;
    info!(
        "hung up; initiator is {:?}, responder is {:?}",
        initiator.state(),
        responder.state()
    );
    Ok(())
}
