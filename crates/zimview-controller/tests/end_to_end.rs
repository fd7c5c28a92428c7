//! Controller and interceptor wired together through the interceptor host.

use http::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use zimview_cache::PersistentCache;
use zimview_controller::Controller;
use zimview_core::{ImageDisplay, InjectionMode, MemoryArchive, ViewerConfig};
use zimview_sw::{FetchDisposition, FetchEvent, InterceptorHost, OfflineFetcher};

const BASE: &str = "https://viewer.local/www/wiki.zim/";

fn url(path: &str) -> Url {
    Url::parse(BASE).unwrap().join(path).unwrap()
}

fn archive(name: &str) -> Arc<MemoryArchive> {
    Arc::new(
        MemoryArchive::new(name)
            .with_content(
                "A/Python",
                "text/html",
                r#"<html><head><link rel="stylesheet" href="../-/s/style.css"></head><body>py</body></html>"#,
            )
            .with_redirect("A/Python_(programming_language)", "A/Python")
            .with_content("-/s/style.css", "text/css", "body{}")
            .with_content("I/logo.png", "image/png", vec![0x89, b'P', b'N', b'G'])
            .with_content("I/clip.webm", "video/webm", vec![0u8; 100])
            .with_content("A/Slow", "text/html", "slow")
            .with_delay("A/Slow", Duration::from_secs(5)),
    )
}

fn config() -> ViewerConfig {
    ViewerConfig {
        keep_alive_interval_ms: 1_000,
        reply_timeout_ms: 2_000,
        ..Default::default()
    }
}

async fn setup(config: ViewerConfig) -> (Controller, Arc<InterceptorHost>) {
    let host = Arc::new(InterceptorHost::new(
        PersistentCache::in_memory(&config.cache_prefix, &config.app_version),
        Arc::new(OfflineFetcher),
        config.reply_timeout(),
    ));
    let controller = Controller::new(config, host.clone());
    controller.load_archive(archive("wiki.zim")).await.unwrap();
    controller
        .set_injection_mode(InjectionMode::Interceptor)
        .await
        .unwrap();
    (controller, host)
}

async fn get(host: &InterceptorHost, path: &str) -> http::Response<bytes::Bytes> {
    host.fetch(FetchEvent::get(url(path)))
        .await
        .into_response()
        .expect("request captured")
}

#[tokio::test]
async fn test_redirect_then_content() {
    let (_controller, host) = setup(config()).await;

    let redirect = get(&host, "A/Python_(programming_language)").await;
    assert_eq!(redirect.status(), StatusCode::FOUND);
    let location = redirect.headers()[LOCATION].to_str().unwrap().to_string();
    assert_eq!(location, "https://viewer.local/www/wiki.zim/A/Python");

    let page = host
        .fetch(FetchEvent::get(Url::parse(&location).unwrap()))
        .await
        .into_response()
        .unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(page.headers()[CONTENT_TYPE], "text/html");
}

#[tokio::test]
async fn test_stylesheet_served_from_cache() {
    let (controller, host) = setup(config()).await;

    assert_eq!(get(&host, "-/s/style.css").await.status(), StatusCode::OK);
    host.flush().await;
    let served = controller.served();

    let again = get(&host, "-/s/style.css?cachebust=2").await;
    assert_eq!(again.body().as_ref(), b"body{}");
    assert_eq!(controller.served(), served);
}

#[tokio::test]
async fn test_cached_stylesheet_survives_eviction() {
    let (controller, host) = setup(config()).await;
    get(&host, "-/s/style.css").await;
    host.flush().await;
    let served = controller.served();

    host.evict().await;
    let restarted = get(&host, "-/s/style.css").await;
    assert_eq!(restarted.status(), StatusCode::OK);
    assert_eq!(restarted.body().as_ref(), b"body{}");
    assert!(host.interceptor().await.session().await.is_none());
    assert_eq!(controller.served(), served);
}

#[tokio::test]
async fn test_suppressed_images_never_reach_controller() {
    let (controller, host) = setup(config()).await;
    controller
        .set_image_display(ImageDisplay::None)
        .await
        .unwrap();
    let served = controller.served();

    let image = get(&host, "I/logo.png").await;
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.headers()[CONTENT_TYPE], "image/svg+xml");
    assert!(std::str::from_utf8(image.body()).unwrap().starts_with("<svg"));
    assert_eq!(controller.served(), served);
}

#[tokio::test]
async fn test_images_shown_by_default() {
    let (_controller, host) = setup(config()).await;
    let image = get(&host, "I/logo.png").await;
    assert_eq!(image.headers()[CONTENT_TYPE], "image/png");
    assert_eq!(image.body().len(), 4);
}

#[tokio::test]
async fn test_video_carries_range_headers() {
    let (_controller, host) = setup(config()).await;
    let video = get(&host, "I/clip.webm").await;
    assert_eq!(video.headers()[CONTENT_RANGE], "bytes 0-99/100");
}

#[tokio::test]
async fn test_missing_entry_is_404() {
    let (_controller, host) = setup(config()).await;
    let missing = get(&host, "A/Nowhere").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(missing.body().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_entry_times_out() {
    let (_controller, host) = setup(config()).await;
    let slow = get(&host, "A/Slow").await;
    assert_eq!(slow.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_recovers_after_eviction() {
    let (controller, host) = setup(config()).await;
    assert_eq!(get(&host, "A/Python").await.status(), StatusCode::OK);

    host.evict().await;
    assert!(matches!(
        host.fetch(FetchEvent::get(url("A/Python"))).await,
        FetchDisposition::Passthrough
    ));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(controller.handshakes() >= 2);
    assert_eq!(get(&host, "A/Python").await.status(), StatusCode::OK);
    assert_eq!(host.starts(), 2);
}

#[tokio::test]
async fn test_direct_mode_passes_through() {
    let (controller, host) = setup(config()).await;
    controller
        .set_injection_mode(InjectionMode::Direct)
        .await
        .unwrap();

    assert!(matches!(
        host.fetch(FetchEvent::get(url("A/Python"))).await,
        FetchDisposition::Passthrough
    ));

    let page = controller.render_page("A/Python").await.unwrap();
    assert!(page.html.contains("blob:zimview/"));
}

#[tokio::test]
async fn test_archive_switch_resets_blob_tier() {
    let (controller, _host) = setup(config()).await;
    controller.render_page("A/Python").await.unwrap();
    assert_eq!(controller.blob_stats().count, 1);

    controller.load_archive(archive("other.zim")).await.unwrap();
    assert_eq!(controller.blob_stats().count, 0);

    controller.render_page("A/Python").await.unwrap();
    assert_eq!(controller.blob_stats().count, 1);
}
