use anyhow::Context;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;
use vescread::{event_queue, BleTransport, LinkConfig, LinkStatus, Session};

const USAGE: &str = "usage: vescread <device-name> [config.toml]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vescread=info")))
        .init();

    let mut args = std::env::args().skip(1);
    let device_name = args.next().context(USAGE)?;
    let config = match args.next() {
        Some(path) => LinkConfig::from_toml_file(&path).with_context(|| format!("Loading {path}"))?,
        None => LinkConfig::default(),
    };

    let (events_tx, events_rx) = event_queue(config.event_queue_len);
    let (session, handle) = Session::new(BleTransport::new(events_tx), events_rx, &config)?;
    let session = tokio::spawn(session.run());

    handle.connect(device_name.as_str()).await?;

    let mut telemetry = handle.subscribe_telemetry();
    let mut link = handle.subscribe_link();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = telemetry.changed() => {
                if changed.is_err() {
                    break;
                }
                let t = *telemetry.borrow_and_update();
                println!(
                    "{:5.1} V  FET {:5.1} °C  motor {:5.1} °C",
                    t.voltage, t.fet_temperature_c, t.motor_temperature_c
                );
            }
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = link.borrow_and_update().clone();
                match snapshot.status {
                    LinkStatus::Reconnecting => {
                        let wait = snapshot.next_reconnect_in(Instant::now()).unwrap_or_default();
                        println!("Link lost, retrying in {:.0}s", wait.as_secs_f32());
                    }
                    status => println!("Link {status:?}"),
                }
            }
        }
    }

    handle.shutdown().await.ok();
    session.await??;
    Ok(())
}
