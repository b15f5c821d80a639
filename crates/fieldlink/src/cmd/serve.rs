use std::fs;

use fieldlink_engine::dtu::{HsRegistration, LineRegistration, Registration};
use fieldlink_engine::{DtuConfig, DtuServer};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cmd::{parse_duration, RegistrationKind, ServeArgs};
use crate::exit::{dtu_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_event, print_sessions, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = load_config(&args)?;
    if config.trust_list.is_empty() {
        warn!("trust list is empty; every registration will be rejected");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;

    runtime.block_on(async move {
        match args.registration {
            RegistrationKind::Hs => serve(config, HsRegistration::new(), args.count, format).await,
            RegistrationKind::Line => {
                serve(config, LineRegistration::new(), args.count, format).await
            }
        }
    })
}

fn load_config(args: &ServeArgs) -> CliResult<DtuConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            serde_json::from_str(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid config {}: {err}", path.display()),
                )
            })?
        }
        None => DtuConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(trust) = &args.trust {
        config.trust_list = trust
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
    }
    if let Some(window) = &args.registration_timeout {
        config.registration_timeout = parse_duration(window, false)?;
    }
    Ok(config)
}

async fn serve(
    config: DtuConfig,
    registration: impl Registration,
    count: Option<usize>,
    format: OutputFormat,
) -> CliResult<i32> {
    let server = DtuServer::bind(config, registration)
        .await
        .map_err(|err| dtu_error("failed to start DTU server", err))?;
    let mut events = server.subscribe();
    info!(addr = %server.local_addr(), "serving; press Ctrl-C to stop");

    let mut printed = 0usize;
    loop {
        if count.is_some_and(|limit| printed >= limit) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    print_event(&event, format);
                    printed += 1;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let sessions = server.list_sessions();
    server.shutdown().await;
    if matches!(format, OutputFormat::Table | OutputFormat::Pretty) && !sessions.is_empty() {
        print_sessions(&sessions, format);
    }
    Ok(SUCCESS)
}
