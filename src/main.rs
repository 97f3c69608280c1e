//! Access point session runner.
//!
//! Joins the device's access point, has it survey nearby networks, reads its
//! station status, then leaves the access point again:
//!
//! 1. associate with `WIFI_SSID` / `WIFI_PASSWORD`
//! 2. polling session: `wifi_scan=1`, then `wifi_scan` until the list is complete
//! 3. single command: `wifi_st_sta`
//! 4. disconnect (or forget the profile when `AP_SESSION_FORGET=1`)
//!
//! Responses are printed to stdout, logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! WIFI_SSID=Device-AP WIFI_PASSWORD=secret123 cargo run
//! ```
//!
//! Optional: `WIFI_IFACE` (NetworkManager device, default: first wifi device),
//! `AP_SESSION_CONFIG` (JSON settings file).

use ap_session::config::Settings;
use ap_session::runtime::EventLoop;
use ap_session::session::{
    completion_count, PollingSession, SessionOutcome, SingleCommand, WsConnector,
};
use ap_session::wifi::{AssociationController, AssociationEvent, NmcliRadio};
use log::{error, info, warn};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Associating,
    ScanList,
    Status,
    Done,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (ssid, password) = match (std::env::var("WIFI_SSID"), std::env::var("WIFI_PASSWORD")) {
        (Ok(ssid), Ok(password)) => (ssid, zeroize::Zeroizing::new(password)),
        _ => {
            error!("WIFI_SSID and WIFI_PASSWORD must be set");
            std::process::exit(2);
        }
    };

    let settings = match std::env::var("AP_SESSION_CONFIG") {
        Ok(path) => match Settings::load(Path::new(&path)) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{}", e);
                std::process::exit(2);
            }
        },
        Err(_) => Settings::default(),
    };
    let iface = std::env::var("WIFI_IFACE").ok();
    let forget = std::env::var("AP_SESSION_FORGET").is_ok_and(|v| v == "1");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(&ssid, &password, iface.as_deref(), &settings, forget));
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    ssid: &str,
    password: &str,
    iface: Option<&str>,
    settings: &Settings,
    forget: bool,
) -> Result<(), BoxError> {
    let (radio, radio_events) = NmcliRadio::start(iface).await?;
    info!("Using wifi device {}", radio.iface());
    let controller = AssociationController::new(radio, settings.association.clone());
    let (connector, socket_events) = WsConnector::new();
    let mut event_loop = EventLoop::new(
        controller,
        radio_events,
        connector,
        socket_events,
        settings.session.clone(),
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let (association_tx, mut association_rx) = mpsc::unbounded_channel::<AssociationEvent>();
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<SessionOutcome>();
    event_loop.connect(ssid, password, association_tx)?;

    let mut stage = Stage::Associating;
    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Err("interrupted".into()),
            _ = event_loop.step() => {}
        }

        let mut failure: Option<BoxError> = None;
        while let Ok(event) = association_rx.try_recv() {
            match event {
                AssociationEvent::SsidFound(entry) => {
                    info!("Found {} ({}, signal {})", entry.ssid, entry.bssid, entry.signal)
                }
                AssociationEvent::Connected(connection) => {
                    info!("Connected: {}", connection);
                    let session = PollingSession::new(
                        settings.endpoint.clone(),
                        settings.poll.clone(),
                        outcome_tx.clone(),
                    );
                    event_loop.start_session(session)?;
                    stage = Stage::ScanList;
                }
                other => {
                    failure = other.as_error().map(BoxError::from);
                }
            }
        }

        while let Ok(outcome) = outcome_rx.try_recv() {
            match (stage, outcome) {
                (Stage::ScanList, SessionOutcome::Result(xml)) => {
                    let count = completion_count(&xml).ok().flatten().unwrap_or(0);
                    info!("Device reported {} networks", count);
                    println!("{}", xml);
                    event_loop.start_session(SingleCommand::new(
                        settings.endpoint.clone(),
                        settings.status_command.clone(),
                        outcome_tx.clone(),
                    ))?;
                    stage = Stage::Status;
                }
                (Stage::Status, SessionOutcome::Result(xml)) => {
                    println!("{}", xml);
                    stage = Stage::Done;
                }
                (_, SessionOutcome::Error(e)) => failure = Some(e.into()),
                (stage, SessionOutcome::Result(_)) => warn!("Unexpected result in {:?}", stage),
            }
        }

        if let Some(e) = failure {
            break Err(e);
        }
        if stage == Stage::Done {
            break Ok(());
        }
    };

    event_loop.cancel_association();
    let controller = event_loop.controller_mut();
    if forget {
        if !controller.forget() {
            warn!("Failed to forget the access point profile");
        }
    } else if !controller.disconnect() {
        warn!("Failed to disconnect from the access point");
    }
    result
}
