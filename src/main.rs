use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use clap::{arg, ArgMatches, Command};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blackbox_report::api::{router, AppState, RangeParams};
use blackbox_report::domain::resolve_groups;
use blackbox_report::metrics::init_metrics;
use blackbox_report::report::{FetchOptions, ReportService};
use blackbox_report::settings::Settings;
use blackbox_report::status;
use blackbox_report::time_range::TimeRange;

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

fn setup_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

fn metrics_app(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}

async fn start_metrics_server(address: String, handle: PrometheusHandle) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::debug!("metrics listening on {}", listener.local_addr()?);
    axum::serve(listener, metrics_app(handle)).await?;
    Ok(())
}

async fn start_main_server(address: String, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::debug!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn range_args(command: Command) -> Command {
    command
        .arg(arg!(--start <TIME> "Range start (RFC 3339)"))
        .arg(arg!(--end <TIME> "Range end (RFC 3339), defaults to now"))
        .arg(arg!(--range <PRESET> "Range preset: 1h, 6h, 12h, 2d, 7d, 4w, 3m"))
}

fn cli() -> clap::Command {
    Command::new(APP_NAME)
        .version(APP_VERSION)
        .author("Greg Hewett <glh@strand3.com>")
        .about("Uptime and downtime reports for blackbox probe targets")
        .arg(arg!(--settings <PATH> "Path to the settings file").default_value("./settings.toml"))
        .subcommand(Command::new("serve").about("Serve the dashboard API (default)"))
        .subcommand(Command::new("targets").about("List probe targets"))
        .subcommand(range_args(
            Command::new("downtime")
                .about("Downtime periods of one target")
                .arg(arg!(<TARGET> "Target instance label")),
        ))
        .subcommand(range_args(
            Command::new("group")
                .about("Downtime periods of a group")
                .arg(arg!(<NAME> "Configured group or root domain")),
        ))
        .subcommand(range_args(
            Command::new("uptime")
                .about("Uptime percentage of one target")
                .arg(arg!(<TARGET> "Target instance label")),
        ))
}

fn parse_time(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    match matches.get_one::<String>(name) {
        Some(value) => Ok(Some(
            DateTime::parse_from_rfc3339(value)
                .map_err(|e| anyhow::anyhow!("invalid --{name} {value:?}: {e}"))?
                .with_timezone(&Utc),
        )),
        None => Ok(None),
    }
}

fn range_from(matches: &ArgMatches) -> anyhow::Result<TimeRange> {
    let params = RangeParams {
        start: parse_time(matches, "start")?,
        end: parse_time(matches, "end")?,
        range: matches.get_one::<String>("range").cloned(),
        ..Default::default()
    };
    Ok(params.resolve(Utc::now())?)
}

fn log_progress(completed: usize, total: usize, message: &str) {
    tracing::info!("[{completed}/{total}] {message}");
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(settings: Settings, service: ReportService) -> anyhow::Result<()> {
    let handle = setup_metrics_recorder()?;
    let state = AppState::new(service, settings.groups.clone());

    tokio::try_join!(
        start_main_server(settings.listen_address.clone(), state),
        start_metrics_server(settings.metrics_address.clone(), handle),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings_path = matches
        .get_one::<String>("settings")
        .map(String::as_str)
        .unwrap_or("./settings.toml");
    let settings = Settings::load(&PathBuf::from(settings_path))?.with_env_overrides();
    let service = ReportService::from_settings(&settings)?;
    tracing::info!("using Prometheus at {}", settings.prometheus_url);

    match matches.subcommand() {
        None | Some(("serve", _)) => serve(settings, service).await?,
        Some(("targets", _)) => {
            let targets = status::discover_targets(service.client(), service.names()).await?;
            print_json(&targets)?;
        }
        Some(("downtime", sub)) => {
            let target = sub.get_one::<String>("TARGET").map(String::as_str).unwrap_or_default();
            let range = range_from(sub)?;
            let options = FetchOptions::default().with_progress(&log_progress);
            let intervals = service
                .downtime_periods(target, range.start, range.end, options)
                .await?;
            print_json(&intervals)?;
        }
        Some(("group", sub)) => {
            let name = sub.get_one::<String>("NAME").map(String::as_str).unwrap_or_default();
            let range = range_from(sub)?;
            let members = match settings.groups.iter().find(|g| g.name == name) {
                Some(group) => group.targets.clone(),
                None => {
                    let targets = status::discover_targets(service.client(), service.names()).await?;
                    resolve_groups(&targets, &settings.groups)
                        .remove(name)
                        .ok_or_else(|| anyhow::anyhow!("unknown group {name:?}"))?
                }
            };
            let options = FetchOptions::default().with_progress(&log_progress);
            let report = service
                .group_downtime_periods(&members, range.start, range.end, options)
                .await?;
            for failed in &report.failed_chunks {
                tracing::warn!("incomplete data for {} in {}: {}", failed.target, failed.chunk, failed.cause);
            }
            print_json(&report)?;
        }
        Some(("uptime", sub)) => {
            let target = sub.get_one::<String>("TARGET").map(String::as_str).unwrap_or_default();
            let range = range_from(sub)?;
            let uptime = service.uptime_percentage(target, range.start, range.end).await?;
            print_json(&serde_json::json!({
                "target": target,
                "start": range.start,
                "end": range.end,
                "uptime_percent": uptime,
            }))?;
        }
        Some((other, _)) => anyhow::bail!("unknown command {other}"),
    }

    Ok(())
}
