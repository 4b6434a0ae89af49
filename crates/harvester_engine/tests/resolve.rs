use std::sync::Arc;
use std::time::Duration;

use harvester_core::DomainPolicy;
use harvester_engine::{FailureKind, ReqwestResolver, ResolveSettings, Resolver};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver() -> ReqwestResolver {
    harvest_logging::initialize_for_tests();
    ReqwestResolver::new(ResolveSettings::default(), Arc::new(DomainPolicy::builtin()))
        .expect("resolver builds")
}

async fn redirect(server: &MockServer, from: &str, to: &str) {
    Mock::given(method("GET"))
        .and(path(from))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", to))
        .mount(server)
        .await;
}

async fn page(server: &MockServer, at: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn follows_a_to_b_to_c() {
    let server = MockServer::start().await;
    redirect(&server, "/a", "/b").await;
    redirect(&server, "/b", "/c").await;
    page(&server, "/c", "<html><body>article</body></html>").await;

    let start = format!("{}/a", server.uri());
    let chain = resolver().resolve(&start).await.expect("resolves");

    assert_eq!(
        chain.hops(),
        &[
            start.clone(),
            format!("{}/b", server.uri()),
            format!("{}/c", server.uri()),
        ]
    );
    assert_eq!(chain.terminal(), format!("{}/c", server.uri()));
}

#[tokio::test]
async fn walks_back_from_bot_protection_hop() {
    let server = MockServer::start().await;
    redirect(&server, "/a", "/b").await;
    redirect(
        &server,
        "/b",
        "https://validate.perfdrive.com/captcha?ssa=1",
    )
    .await;

    let start = format!("{}/a", server.uri());
    let chain = resolver().resolve(&start).await.expect("resolves");

    assert_eq!(chain.hops(), &[start, format!("{}/b", server.uri())]);
    assert_eq!(chain.terminal(), format!("{}/b", server.uri()));
}

#[tokio::test]
async fn meta_refresh_counts_as_a_hop() {
    let server = MockServer::start().await;
    page(
        &server,
        "/landing",
        r#"<html><head><meta http-equiv="refresh" content="0;url=/article"></head></html>"#,
    )
    .await;
    page(&server, "/article", "<html><body>full text</body></html>").await;

    let start = format!("{}/landing", server.uri());
    let chain = resolver().resolve(&start).await.expect("resolves");

    assert_eq!(chain.len(), 2);
    assert_eq!(chain.terminal(), format!("{}/article", server.uri()));
}

#[tokio::test]
async fn error_status_on_a_hop_ends_the_chain_without_failing() {
    let server = MockServer::start().await;
    redirect(&server, "/a", "/forbidden").await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let start = format!("{}/a", server.uri());
    let chain = resolver().resolve(&start).await.expect("resolves");

    assert_eq!(chain.terminal(), format!("{}/forbidden", server.uri()));
}

#[tokio::test]
async fn redirect_loop_stops_at_the_repeat() {
    let server = MockServer::start().await;
    redirect(&server, "/a", "/b").await;
    redirect(&server, "/b", "/a").await;

    let start = format!("{}/a", server.uri());
    let chain = resolver().resolve(&start).await.expect("resolves");

    assert_eq!(chain.hops(), &[start, format!("{}/b", server.uri())]);
}

#[tokio::test]
async fn http_redirect_limit_treats_last_hop_as_terminal() {
    let server = MockServer::start().await;
    for step in 0..5 {
        redirect(&server, &format!("/r{step}"), &format!("/r{}", step + 1)).await;
    }
    let settings = ResolveSettings {
        max_http_redirects: 2,
        ..ResolveSettings::default()
    };
    let resolver = ReqwestResolver::new(settings, Arc::new(DomainPolicy::builtin())).unwrap();

    let chain = resolver
        .resolve(&format!("{}/r0", server.uri()))
        .await
        .expect("resolves");

    assert_eq!(chain.len(), 3);
    assert_eq!(chain.terminal(), format!("{}/r2", server.uri()));
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    let server = MockServer::builder().start().await;
    let uri = server.uri();
    drop(server);

    let settings = ResolveSettings {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        ..ResolveSettings::default()
    };
    let resolver = ReqwestResolver::new(settings, Arc::new(DomainPolicy::builtin())).unwrap();
    let err = resolver
        .resolve(&format!("{uri}/gone"))
        .await
        .expect_err("host is down");

    assert!(matches!(
        err.kind,
        FailureKind::Network | FailureKind::Timeout
    ));
}

#[tokio::test]
async fn rejects_unparseable_start_url() {
    let err = resolver().resolve("not a url").await.unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}
