//! Core application runner (business logic) for `beacon-campaign-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::campaign::{
    Campaign, CampaignFileError, CampaignResolver, StaticResolver, load_campaigns,
};
use crate::decoder::FrameDecoder;
use crate::dedup::DedupWindow;
use crate::engine::MatchEngine;
use crate::event::MatchEvent;
use crate::output::EventFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::scanner::{Backend, FrameResult, ScanError};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Campaign bound to a beacon UUID.
    /// Format: --campaign E2C56DB5-DFFB-48D2-B060-D0F5A71096E0=Summer Sale
    #[arg(long = "campaign", value_parser = crate::campaign::parse_campaign, value_name = "CAMPAIGN")]
    pub campaigns: Vec<Campaign>,

    /// JSON file with an array of campaigns
    /// (fields: id, name, description, website, uuid, isActive).
    #[arg(long = "campaigns", value_name = "FILE")]
    pub campaigns_file: Option<PathBuf>,

    /// Report each beacon at most once per interval.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "5m", value_parser = crate::dedup::parse_duration)]
    pub cooldown: Duration,

    /// Wait this long before restarting the scan when the Bluetooth frame source stops.
    /// Accepts the same durations as --cooldown.
    #[arg(long, default_value = "5s", value_parser = crate::dedup::parse_duration)]
    pub restart_delay: Duration,

    /// Only decode manufacturer data from this company (e.g. 0x004C for Apple iBeacons).
    #[arg(long, value_parser = parse_company_code, value_name = "CODE")]
    pub company_code: Option<u16>,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "beacon_match")]
    pub influxdb_measurement: String,

    /// Verbose output, print errors for unreadable advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

/// Parse a Bluetooth SIG company identifier, hex with `0x` prefix or decimal.
pub fn parse_company_code(src: &str) -> Result<u16, String> {
    let src = src.trim();
    let parsed = match src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => src.parse(),
    };
    parsed.map_err(|_| format!("invalid company code: {}", src))
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Campaigns(#[from] CampaignFileError),
}

/// Future returned by [`Scanner::start_scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<FrameResult>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, backend: Backend, verbose: bool) -> ScanFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, backend: Backend, verbose: bool) -> ScanFuture<'_> {
        Box::pin(async move { crate::scanner::start_scan(backend, verbose).await })
    }
}

/// Build the campaign catalogue from the campaign file (if any) and `--campaign` flags.
pub fn build_resolver(options: &Options) -> Result<StaticResolver, RunError> {
    let mut resolver = match &options.campaigns_file {
        Some(path) => StaticResolver::new(load_campaigns(path)?),
        None => StaticResolver::default(),
    };
    for campaign in &options.campaigns {
        resolver.insert(campaign.clone());
    }
    info!(campaigns = resolver.len(), "campaign catalogue loaded");
    Ok(resolver)
}

fn write_event(
    formatter: &dyn EventFormatter,
    event: &MatchEvent,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(event);
    writeln!(out, "{line}")
}

fn write_finished(
    formatter: &dyn EventFormatter,
    joined: Result<Option<MatchEvent>, JoinError>,
    out: &mut dyn Write,
) -> io::Result<()> {
    match joined {
        Ok(Some(event)) => write_event(formatter, &event, out),
        Ok(None) => Ok(()),
        Err(error) => {
            warn!(%error, "frame task failed");
            Ok(())
        }
    }
}

/// Run the core processing loop, writing formatted events to `out` and verbose errors to `err`.
///
/// - Every frame is matched in its own task, so a slow campaign lookup does not
///   hold up frames of other beacons.
/// - Report errors are written to `err` only when `options.verbose` is true.
/// - When the frame stream ends, scanning is restarted after
///   `options.restart_delay`. The cooldown window carries over. If the restart
///   fails, lookups still in flight are awaited and the error is returned.
/// - When `shutdown` resolves, lookups still in flight are aborted without
///   starting a cooldown, and `Ok(())` is returned.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    resolver: Arc<dyn CampaignResolver>,
    out: &mut dyn Write,
    err: &mut dyn Write,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement);
    let engine = Arc::new(MatchEngine::new(
        FrameDecoder::new(options.company_code),
        DedupWindow::new(options.cooldown),
        resolver,
    ));

    let mut frames = scanner.start_scan(options.backend, options.verbose).await?;
    let mut lookups = JoinSet::new();
    let mut scanning = true;
    let restart = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(shutdown, restart);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!(in_flight = lookups.len(), "shutting down");
                lookups.abort_all();
                return Ok(());
            }
            Some(joined) = lookups.join_next() => write_finished(&formatter, joined, out)?,
            () = &mut restart, if !scanning => {
                match scanner.start_scan(options.backend, options.verbose).await {
                    Ok(receiver) => {
                        info!("scan restarted");
                        frames = receiver;
                        scanning = true;
                    }
                    Err(error) => {
                        warn!(%error, in_flight = lookups.len(), "scan restart failed");
                        loop {
                            tokio::select! {
                                biased;

                                () = &mut shutdown => {
                                    lookups.abort_all();
                                    break;
                                }
                                joined = lookups.join_next() => match joined {
                                    Some(joined) => write_finished(&formatter, joined, out)?,
                                    None => break,
                                },
                            }
                        }
                        return Err(error.into());
                    }
                }
            }
            received = frames.recv(), if scanning => match received {
                Some(Ok(frame)) => {
                    let now = Instant::now();
                    let engine = Arc::clone(&engine);
                    lookups.spawn(async move { engine.process(&frame, now).await });
                }
                Some(Err(report_err)) => {
                    if options.verbose {
                        writeln!(err, "{report_err}")?;
                    }
                }
                None => {
                    warn!(delay = ?options.restart_delay, "frame stream ended, restarting scan");
                    scanning = false;
                    restart.set(tokio::time::sleep(options.restart_delay));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{ResolveError, ResolveFuture};
    use crate::frame::AdvertisementFrame;
    use crate::identifier::CanonicalIdentifier;
    use crate::scanner::ReportError;
    use crate::test_utils::{DEMO_UUID, demo_campaign, ibeacon_frame};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Scanner that serves one batch of frames per scan session, then fails to start.
    #[derive(Debug)]
    struct FakeScanner {
        batches: Mutex<VecDeque<Vec<FrameResult>>>,
    }

    impl FakeScanner {
        fn new(results: Vec<FrameResult>) -> Self {
            Self::with_batches(vec![results])
        }

        fn with_batches(batches: Vec<Vec<FrameResult>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
            }
        }

        fn sessions_left(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(&self, _backend: Backend, _verbose: bool) -> ScanFuture<'_> {
            let batch = self.batches.lock().unwrap().pop_front();
            Box::pin(async move {
                let results =
                    batch.ok_or_else(|| ScanError::Bluetooth("adapter removed".to_string()))?;
                let (tx, rx) = mpsc::channel::<FrameResult>(results.len().max(1));
                tokio::spawn(async move {
                    for r in results {
                        let _ = tx.send(r).await;
                    }
                    // drop tx to close channel
                });
                Ok(rx)
            })
        }
    }

    /// Resolver whose lookups never complete.
    struct StalledResolver;

    impl CampaignResolver for StalledResolver {
        fn find_active<'a>(&'a self, _id: &'a CanonicalIdentifier) -> ResolveFuture<'a> {
            Box::pin(std::future::pending::<Result<Option<Campaign>, ResolveError>>())
        }
    }

    fn default_options() -> Options {
        Options::try_parse_from(["beacon-campaign-listener"]).unwrap()
    }

    fn options() -> Options {
        let mut options = default_options();
        options.restart_delay = Duration::ZERO;
        options
    }

    fn demo_resolver() -> Arc<dyn CampaignResolver> {
        Arc::new(StaticResolver::new([demo_campaign()]))
    }

    async fn run(
        options: Options,
        scanner: &FakeScanner,
        resolver: Arc<dyn CampaignResolver>,
    ) -> (String, String) {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let result = run_with_io(
            options,
            scanner,
            resolver,
            &mut out,
            &mut err,
            std::future::pending(),
        )
        .await;
        // every session is consumed, so the final restart fails
        assert!(matches!(result, Err(RunError::Scan(_))), "{result:?}");
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn test_default_options() {
        let options = default_options();
        assert!(options.campaigns.is_empty());
        assert_eq!(options.campaigns_file, None);
        assert_eq!(options.cooldown, Duration::from_secs(300));
        assert_eq!(options.restart_delay, Duration::from_secs(5));
        assert_eq!(options.company_code, None);
        assert_eq!(options.influxdb_measurement, "beacon_match");
        assert!(!options.verbose);
    }

    #[test]
    fn test_options_parse_campaigns_and_company_code() {
        let demo = format!("{DEMO_UUID}=Demo");
        let options = Options::try_parse_from([
            "beacon-campaign-listener",
            "--campaign",
            demo.as_str(),
            "--campaign",
            "FDA50693-A4E2-4FB1-AFCF-C6EB07647825=Coffee Corner",
            "--company-code",
            "0x004C",
            "--cooldown",
            "30s",
            "--restart-delay",
            "500ms",
        ])
        .unwrap();

        assert_eq!(options.campaigns.len(), 2);
        assert_eq!(options.campaigns[1].name, "Coffee Corner");
        assert_eq!(options.company_code, Some(0x004C));
        assert_eq!(options.cooldown, Duration::from_secs(30));
        assert_eq!(options.restart_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_options_reject_malformed_campaign() {
        let result =
            Options::try_parse_from(["beacon-campaign-listener", "--campaign", "no-separator"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_company_code() {
        assert_eq!(parse_company_code("0x004C").unwrap(), 0x004C);
        assert_eq!(parse_company_code("0X004c").unwrap(), 0x004C);
        assert_eq!(parse_company_code("76").unwrap(), 0x004C);
        assert!(parse_company_code("0x10000").is_err());
        assert!(parse_company_code("apple").is_err());
    }

    #[test]
    fn test_build_resolver_merges_file_and_flags() {
        let path = std::env::temp_dir().join(format!(
            "beacon-campaign-listener-app-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"[{"id": "c1", "name": "Coffee Corner", "uuid": "FDA50693-A4E2-4FB1-AFCF-C6EB07647825", "isActive": true}]"#,
        )
        .unwrap();

        let mut options = options();
        options.campaigns_file = Some(path.clone());
        options.campaigns = vec![demo_campaign()];
        let resolver = build_resolver(&options);
        std::fs::remove_file(&path).unwrap();

        let resolver = resolver.unwrap();
        assert_eq!(resolver.len(), 2);
        let coffee = CanonicalIdentifier::new("fda50693-a4e2-4fb1-afcf-c6eb07647825").unwrap();
        assert_eq!(resolver.lookup(&coffee).unwrap().id, "c1");
    }

    #[test]
    fn test_build_resolver_missing_file() {
        let mut options = options();
        options.campaigns_file = Some(PathBuf::from("/nonexistent/campaigns.json"));
        assert!(matches!(
            build_resolver(&options),
            Err(RunError::Campaigns(CampaignFileError::Io { .. }))
        ));
    }

    #[tokio::test]
    async fn run_writes_matches_to_out() {
        let scanner = FakeScanner::new(vec![Ok(ibeacon_frame())]);
        let (out, err) = run(options(), &scanner, demo_resolver()).await;

        assert!(err.is_empty());
        assert!(out.starts_with("beacon_match,"));
        assert!(out.contains("address=AA:BB:CC:DD:EE:FF"));
        assert!(out.contains("campaign=Demo"));
        assert!(out.contains(&format!("uuid={DEMO_UUID}")));
        assert!(out.contains("rssi=-70i"));
        assert!(out.ends_with('\n'));
    }

    #[tokio::test]
    async fn run_reports_each_beacon_once_per_cooldown() {
        let scanner = FakeScanner::new(vec![
            Ok(ibeacon_frame()),
            Ok(ibeacon_frame()),
            Ok(ibeacon_frame()),
        ]);
        let (out, _) = run(options(), &scanner, demo_resolver()).await;

        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn run_ignores_unknown_beacons() {
        let unknown = AdvertisementFrame::new("11:22:33:44:55:66", -60)
            .with_service_uuid("fda50693-a4e2-4fb1-afcf-c6eb07647825".parse().unwrap());
        let scanner = FakeScanner::new(vec![Ok(unknown)]);
        let (out, err) = run(options(), &scanner, demo_resolver()).await;

        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn run_applies_company_code_filter() {
        let mut options = options();
        options.company_code = Some(0x0059);
        let scanner = FakeScanner::new(vec![Ok(ibeacon_frame())]);
        let (out, _) = run(options, &scanner, demo_resolver()).await;

        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn run_prints_report_errors_only_when_verbose() {
        let scanner = || {
            FakeScanner::new(vec![Err(ReportError::Truncated(
                "advertising report too short".to_string(),
            ))])
        };

        // non-verbose: nothing written
        let (out, err) = run(options(), &scanner(), demo_resolver()).await;
        assert!(out.is_empty());
        assert!(err.is_empty());

        // verbose: error is written to err
        let mut verbose = options();
        verbose.verbose = true;
        let (out, err) = run(verbose, &scanner(), demo_resolver()).await;
        assert!(out.is_empty());
        assert!(err.contains("Truncated report: advertising report too short"));
    }

    #[tokio::test]
    async fn run_aborts_pending_lookups_on_shutdown() {
        let scanner = FakeScanner::new(vec![Ok(ibeacon_frame())]);
        let mut options = options();
        options.restart_delay = Duration::from_secs(3600);
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();

        run_with_io(
            options,
            &scanner,
            Arc::new(StalledResolver),
            &mut out,
            &mut err,
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn run_restarts_scan_when_stream_ends() {
        let coffee = Uuid::from_bytes([0x42; 16]);
        let mut coffee_campaign = demo_campaign();
        coffee_campaign.id = "coffee".to_string();
        coffee_campaign.name = "Coffee".to_string();
        coffee_campaign.identifier = coffee.to_string();
        let resolver = Arc::new(StaticResolver::new([demo_campaign(), coffee_campaign]));

        let scanner = FakeScanner::with_batches(vec![
            vec![Ok(ibeacon_frame())],
            vec![Ok(AdvertisementFrame::new("11:22:33:44:55:66", -60).with_service_uuid(coffee))],
        ]);
        let (out, _) = run(options(), &scanner, resolver).await;

        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("campaign=Demo"));
        assert!(out.contains("campaign=Coffee"));
        assert_eq!(scanner.sessions_left(), 0);
    }

    #[tokio::test]
    async fn run_keeps_cooldown_across_restarts() {
        let scanner = FakeScanner::with_batches(vec![
            vec![Ok(ibeacon_frame())],
            vec![Ok(ibeacon_frame())],
        ]);
        let (out, _) = run(options(), &scanner, demo_resolver()).await;

        assert_eq!(out.lines().count(), 1);
        assert_eq!(scanner.sessions_left(), 0);
    }

    #[tokio::test]
    async fn run_returns_initial_scan_error() {
        let scanner = FakeScanner::with_batches(vec![]);
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();

        let result = run_with_io(
            options(),
            &scanner,
            demo_resolver(),
            &mut out,
            &mut err,
            std::future::pending(),
        )
        .await;

        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn run_waits_restart_delay_and_stops_on_shutdown() {
        let scanner = FakeScanner::with_batches(vec![vec![Ok(ibeacon_frame())], vec![]]);
        let mut options = options();
        options.restart_delay = Duration::from_secs(3600);
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();

        run_with_io(
            options,
            &scanner,
            demo_resolver(),
            &mut out,
            &mut err,
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        // first session's match is written, the second session is never started
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
        assert_eq!(scanner.sessions_left(), 1);
    }
}
