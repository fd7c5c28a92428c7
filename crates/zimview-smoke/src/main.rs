//! ZimView Smoke Harness
//!
//! Runs the controller and the interceptor host in one process against a
//! small in-memory archive and checks the delivery paths end to end:
//! redirects, the persistent tier, image placeholders, recovery after
//! eviction and direct rendering. Prints a JSON result line.

use anyhow::{bail, ensure, Context};
use bytes::Bytes;
use http::header::LOCATION;
use http::StatusCode;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use url::Url;
use zimview_common::{init_logging, LogConfig, LogFormat};
use zimview_controller::Controller;
use zimview_core::{ImageDisplay, InjectionMode, MemoryArchive, ViewerConfig};
use zimview_sw::{FetchDisposition, FetchEvent, InterceptorHost, OfflineFetcher};

/// Performance timing collector for tracking scenario durations.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Duration>,
}

impl PerfTiming {
    fn record(&mut self, scenario: &'static str, duration: Duration) {
        self.timings.insert(scenario, duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (scenario, duration) in &self.timings {
            let ms = duration.as_secs_f64() * 1000.0;
            summary.insert(scenario.to_string(), json!((ms * 100.0).round() / 100.0));
        }
        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    config: Option<String>,
    perf_output: Option<String>,
    json_logs: bool,
    keep_alive_ms: u64,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut perf_output = None;
        let mut json_logs = false;
        let mut keep_alive_ms = 200u64;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next();
                }
                "--perf-output" => {
                    perf_output = args.next();
                }
                "--json-logs" => {
                    json_logs = true;
                }
                "--keep-alive-ms" => {
                    if let Some(val) = args.next() {
                        keep_alive_ms = val.parse().unwrap_or(200);
                    }
                }
                _ => {}
            }
        }

        Self {
            config,
            perf_output,
            json_logs,
            keep_alive_ms,
        }
    }

    async fn load_config(&self) -> anyhow::Result<ViewerConfig> {
        let mut config = match &self.config {
            Some(path) => ViewerConfig::load(path)
                .await
                .with_context(|| format!("loading config from {path}"))?,
            None => ViewerConfig::default(),
        };
        config.keep_alive_interval_ms = self.keep_alive_ms;
        config.validate()?;
        Ok(config)
    }
}

fn sample_archive() -> Arc<MemoryArchive> {
    Arc::new(
        MemoryArchive::new("smoke.zim")
            .with_content(
                "A/Python",
                "text/html",
                concat!(
                    "<html><head><title>Python</title>",
                    r#"<link rel="stylesheet" href="../-/s/style.css">"#,
                    r#"<link rel="stylesheet" href="../-/s/style-mobile.css">"#,
                    "</head><body><img src=\"../I/logo.png\"></body></html>"
                ),
            )
            .with_redirect("A/Python_(programming_language)", "A/Python")
            .with_content("-/s/style.css", "text/css", "body{margin:0}")
            .with_content("-/s/style-mobile.css", "text/css", "body{font-size:14px}")
            .with_content("I/logo.png", "image/png", vec![0x89, b'P', b'N', b'G']),
    )
}

struct Harness {
    base: Url,
    controller: Controller,
    host: Arc<InterceptorHost>,
}

impl Harness {
    async fn start(config: ViewerConfig) -> anyhow::Result<Self> {
        let base = Url::parse("https://viewer.local/www/")?;
        let host = Arc::new(InterceptorHost::from_config(
            &config,
            &base,
            Arc::new(OfflineFetcher),
        )?);
        host.activate().await?;

        let controller = Controller::new(config, host.clone());
        controller.load_archive(sample_archive()).await?;
        controller
            .set_injection_mode(InjectionMode::Interceptor)
            .await?;
        Ok(Self {
            base: base.join("smoke.zim/")?,
            controller,
            host,
        })
    }

    async fn get(&self, path: &str) -> anyhow::Result<http::Response<Bytes>> {
        let url = self.base.join(path)?;
        match self.host.fetch(FetchEvent::get(url.clone())).await {
            FetchDisposition::Respond(response) => Ok(response),
            FetchDisposition::Passthrough => bail!("{url} was not captured"),
        }
    }
}

async fn redirect_scenario(harness: &Harness) -> anyhow::Result<()> {
    let redirect = harness.get("A/Python_(programming_language)").await?;
    ensure!(redirect.status() == StatusCode::FOUND, "expected 302, got {}", redirect.status());
    let location = redirect
        .headers()
        .get(LOCATION)
        .context("redirect without location")?
        .to_str()?;
    ensure!(location.ends_with("/smoke.zim/A/Python"), "unexpected location {location}");

    let page = harness.get("A/Python").await?;
    ensure!(page.status() == StatusCode::OK, "page returned {}", page.status());
    Ok(())
}

async fn cache_scenario(harness: &Harness) -> anyhow::Result<()> {
    harness.get("-/s/style.css").await?;
    harness.host.flush().await;
    let served = harness.controller.served();

    let cached = harness.get("-/s/style.css?v=2").await?;
    ensure!(cached.body().as_ref() == b"body{margin:0}", "stale stylesheet body");
    ensure!(
        harness.controller.served() == served,
        "cached stylesheet went to the controller"
    );
    Ok(())
}

async fn placeholder_scenario(harness: &Harness) -> anyhow::Result<()> {
    harness.controller.set_image_display(ImageDisplay::None).await?;
    let served = harness.controller.served();

    let image = harness.get("I/logo.png").await?;
    ensure!(image.body().starts_with(b"<svg"), "image was not replaced");
    ensure!(harness.controller.served() == served, "image reached the controller");

    harness.controller.set_image_display(ImageDisplay::All).await?;
    Ok(())
}

async fn eviction_scenario(harness: &Harness) -> anyhow::Result<()> {
    harness.host.evict().await;
    let css = harness.get("-/s/style.css").await?;
    ensure!(css.status() == StatusCode::OK, "cached stylesheet lost on eviction");

    let interval = harness.controller.config().keep_alive_interval();
    tokio::time::sleep(interval + interval / 2).await;

    let page = harness.get("A/Python").await?;
    ensure!(page.status() == StatusCode::OK, "no recovery after eviction");
    Ok(())
}

async fn direct_scenario(harness: &Harness) -> anyhow::Result<()> {
    harness
        .controller
        .set_injection_mode(InjectionMode::Direct)
        .await?;
    let page = harness.controller.render_page("A/Python").await?;
    let first = page.html.find("blob:zimview/").context("stylesheets not resolved")?;
    let last = page.html.rfind("blob:zimview/").unwrap_or(first);
    ensure!(first < last, "expected two resolved stylesheets");
    Ok(())
}

async fn run(args: &Args, perf: &mut PerfTiming) -> anyhow::Result<()> {
    let config = args.load_config().await?;
    let harness = Harness::start(config).await?;

    let start = Instant::now();
    redirect_scenario(&harness).await.context("redirect")?;
    perf.record("redirect", start.elapsed());

    let start = Instant::now();
    cache_scenario(&harness).await.context("cache")?;
    perf.record("cache", start.elapsed());

    let start = Instant::now();
    placeholder_scenario(&harness).await.context("placeholder")?;
    perf.record("placeholder", start.elapsed());

    let start = Instant::now();
    eviction_scenario(&harness).await.context("eviction")?;
    perf.record("eviction", start.elapsed());

    let start = Instant::now();
    direct_scenario(&harness).await.context("direct")?;
    perf.record("direct", start.elapsed());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_config = if args.json_logs {
        LogConfig::production()
    } else {
        LogConfig::default().with_format(LogFormat::Compact)
    };
    init_logging(log_config);
    info!(config = ?args.config, keep_alive_ms = args.keep_alive_ms, "Starting ZimView smoke harness");

    let start = Instant::now();
    let mut perf = PerfTiming::default();
    let outcome = run(&args, &mut perf).await;

    if let Some(ref perf_path) = args.perf_output {
        let perf_json = json!({
            "timings": perf.summary(),
            "total_elapsed_ms": start.elapsed().as_millis()
        });
        if let Err(e) = std::fs::write(perf_path, perf_json.to_string()) {
            error!(?e, "Failed to write perf output");
        } else {
            info!(?perf_path, "Perf summary written");
        }
    }

    let result = json!({
        "status": if outcome.is_ok() { "pass" } else { "fail" },
        "elapsed_ms": start.elapsed().as_millis(),
        "error": outcome.as_ref().err().map(|e| format!("{e:#}")),
        "perf": perf.summary()
    });
    println!("{}", result);
    outcome
}
