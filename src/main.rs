use anyhow::Result;
use crossbeam_channel::bounded;
use prattle::relay::{health, Transport};
use prattle::session::{SessionConfig, SessionController, SessionEvent};
use prattle::speech::{create_stt, create_tts};
use prattle::{ChannelConfig, NotificationChannel, RelayConfig, RelayRunner, Settings};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prattle=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Prattle voice chat client");

    let settings_path = Settings::default_path()?;
    let settings = Settings::load(&settings_path);
    info!("Gateway: {}", settings.gateway_url);

    // Quick connectivity probe before wiring the session
    let transport = Transport::new(
        &settings.gateway_url,
        settings.token(),
        Duration::from_secs(5),
    )?;
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(health::check(&transport));
    match report.error {
        None => info!("Gateway healthy ({} ms)", report.latency.as_millis()),
        Some(error) => info!("Gateway unreachable ({}), continuing anyway", error),
    }

    // Relay worker
    let relay = RelayRunner::new(RelayConfig::from_settings(&settings)).start_worker()?;

    // Notification channel, keyed by the selected instance
    let notify = settings.instance().map(|instance_id| {
        NotificationChannel::start(ChannelConfig::new(settings.ws_endpoint(), instance_id))
    });

    // Speech engines
    let (stt_tx, stt_rx) = bounded(100);
    let (tts_tx, tts_rx) = bounded(100);
    let stt = create_stt(settings.stt_engine, stt_tx)?;
    let tts = create_tts(settings.tts_engine, tts_tx)?;

    let config = SessionConfig::new().with_language(settings.language.clone());
    let (controller, handle) =
        SessionController::new(config, stt, stt_rx, tts, tts_rx, relay, notify);
    let _controller_thread = controller.start();

    handle.enable_mic()?;
    println!("Listening. Type an utterance and press enter (Ctrl-C to quit).");

    let mut settings = settings;
    loop {
        match handle.recv_event() {
            Ok(SessionEvent::StateChanged) => {
                println!("[state] {}", handle.state().conversation_state());
            }
            Ok(SessionEvent::Transcript(text)) => {
                println!("[you] {}", text);
            }
            Ok(SessionEvent::TurnComplete { response, .. }) => {
                println!("[assistant] {}", response);
            }
            Ok(SessionEvent::Notification(notification)) => {
                println!("[notify] {}: {}", notification.title, notification.body);
            }
            Ok(SessionEvent::InstanceChanged(id)) => {
                // Persist the recovered route for the next start
                settings.instance_id = id;
                let _ = settings.save(&settings_path);
            }
            Ok(SessionEvent::Error(error)) => {
                eprintln!("[error] {}", error);
            }
            Ok(SessionEvent::Shutdown) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    Ok(())
}
