use crate::config::Config;
use crate::device::favorite_codes;
use crate::model::{ConnectionState, SessionEvent};
use crate::power::PowerProber;
use crate::protocol::{lookup_button, ButtonCode};
use crate::registry::DeviceRegistry;
use crate::session::{Session, SessionSettings, TcpConnector};
use rand::{distributions::Alphanumeric, Rng};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("config-init") {
        return handle_config_init();
    }

    let config = Config::load()?;

    if let Some(command) = args.first() {
        if command == "probe" {
            return handle_probe(&config, &args[1..]).await;
        }
        if command == "send" {
            return handle_send(&config, &args[1..]).await;
        }
        return Err(format!("unknown command {command}; expected config-init, probe or send").into());
    }

    let registry = Arc::new(DeviceRegistry::from_config(&config));
    if registry.is_empty() {
        tracing::warn!(
            path = %Config::default_path().display(),
            "no boxes configured; add [[boxes]] entries to the config file"
        );
    } else {
        tracing::info!(boxes = registry.len(), "boxes registered");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if config.server.enabled {
        let addr: SocketAddr = format!("127.0.0.1:{}", config.server.port).parse()?;
        let token = match config.server.token.clone() {
            Some(token) if !token.trim().is_empty() => token,
            _ => {
                let token = generate_token(32);
                tracing::info!("no server token configured; generated one for this run");
                token
            }
        };
        println!("Control API: http://{}/devices?token={}", addr, token);

        let mut server_task = tokio::spawn(crate::server::start(
            addr,
            token,
            registry.clone(),
            shutdown_rx,
        ));

        tokio::select! {
            res = &mut server_task => {
                registry.shutdown_all();
                res??;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("shutdown: ctrl-c");
                let _ = shutdown_tx.send(true);
            }
        }
        if let Ok(Err(err)) = server_task.await {
            tracing::warn!(error = %err, "control server stopped with error");
        }
    } else {
        tokio::signal::ctrl_c().await?;
        eprintln!("shutdown: ctrl-c");
    }

    registry.shutdown_all();
    Ok(())
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn handle_probe(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let ip: IpAddr = args
        .first()
        .ok_or("usage: probe <ip>")?
        .trim()
        .parse()?;
    let prober = PowerProber::new(
        ip,
        config.power.probe_port,
        &config.power.probe_path,
        Duration::from_millis(config.power.probe_timeout_ms),
    )?;
    let powered = prober.probe_power_state().await;
    println!("{} is {}", ip, if powered { "on" } else { "in standby" });
    Ok(())
}

async fn handle_send(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (ip, buttons) = args
        .split_first()
        .ok_or("usage: send <ip> <button|channel>...")?;
    let ip: IpAddr = ip.trim().parse()?;
    let codes = parse_send_args(buttons)?;
    if codes.is_empty() {
        return Err("usage: send <ip> <button|channel>...".into());
    }

    let settings = SessionSettings {
        startup_delay: Duration::ZERO,
        ..SessionSettings::from_config(config)
    };
    let connect_timeout = settings.connect_timeout;
    let key_delay = settings.key_delay;
    let connector = TcpConnector::new(ip, settings.port, settings.keepalive);
    let (session, task) = Session::spawn(ip.to_string(), connector, settings);
    let mut events = session.subscribe();

    let result = send_when_ready(&session, &mut events, codes, connect_timeout, key_delay).await;
    session.shutdown();
    let _ = task.await;
    result
}

async fn send_when_ready(
    session: &Session,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    codes: Vec<ButtonCode>,
    connect_timeout: Duration,
    key_delay: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = session.watch_state();
    tokio::time::timeout(
        connect_timeout + Duration::from_secs(1),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .map_err(|_| "box did not complete the handshake in time")??;

    let total = codes.len();
    session.enqueue(codes);

    let budget = key_delay * 2 * (total as u32 + 1) + Duration::from_secs(2);
    let deadline = tokio::time::Instant::now() + budget;
    let mut sent = 0;
    while sent < total {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .map_err(|_| format!("only {sent} of {total} keys were sent"))?;
        match event {
            Ok(SessionEvent::CommandSent { code }) => {
                sent += 1;
                println!("sent {code}");
            }
            Ok(SessionEvent::Disconnected { reason, .. }) => {
                return Err(format!("box disconnected after {sent} of {total} keys: {reason}").into());
            }
            Ok(SessionEvent::StateChanged { from, to }) => {
                tracing::debug!(from = %from, to = %to, "state changed");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn parse_send_args(args: &[String]) -> Result<Vec<ButtonCode>, String> {
    let mut codes = Vec::new();
    for arg in args {
        if let Some(code) = lookup_button(arg) {
            codes.push(code);
        } else if let Some(channel) = favorite_codes(arg) {
            codes.extend(channel);
        } else if let Some(code) = ButtonCode::from_hex(arg) {
            codes.push(code);
        } else {
            return Err(format!("unknown button {arg}"));
        }
    }
    Ok(codes)
}

fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
