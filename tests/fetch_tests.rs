mod common;

use homepage_scan_rs::fetch::{FetchOutcome, PageMeta, RejectReason};

#[tokio::test]
async fn html_page_is_accepted_with_title_and_icon() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let fetcher = common::fetcher(&icons);

    let outcome = fetcher.fetch(&format!("http://{addr}/")).await;
    let FetchOutcome::Accepted(meta) = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert_eq!(meta.title.as_deref(), Some("Router"));

    let name = format!("127.0.0.1_{}_fav.png", addr.port());
    assert_eq!(meta.icon_path, Some(format!("/static/icons/{name}")));
    let saved = std::fs::read(icons.path().join(&name)).unwrap();
    assert_eq!(saved, common::FAVICON);
}

#[tokio::test]
async fn json_is_rejected() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/api"))
        .await;
    assert_eq!(
        outcome,
        FetchOutcome::Rejected(RejectReason::NotHtml("application/json".into()))
    );
}

#[tokio::test]
async fn server_errors_are_rejected() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/boom"))
        .await;
    assert_eq!(outcome, FetchOutcome::Rejected(RejectReason::ServerError(502)));
}

#[tokio::test]
async fn missing_favicon_still_accepts_page() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/bare"))
        .await;
    assert_eq!(
        outcome,
        FetchOutcome::Accepted(PageMeta {
            title: Some("Bare".into()),
            icon_path: None,
        })
    );
}

#[tokio::test]
async fn closed_port_is_a_request_rejection() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://127.0.0.1:{port}/"))
        .await;
    assert!(
        matches!(outcome, FetchOutcome::Rejected(RejectReason::Request(_))),
        "unexpected {outcome:?}"
    );
}

#[tokio::test]
async fn statuses_above_599_are_server_errors() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/odd"))
        .await;
    assert_eq!(outcome, FetchOutcome::Rejected(RejectReason::ServerError(600)));
}

#[tokio::test]
async fn endless_body_is_cut_off_before_timeout() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/endless"))
        .await;
    let FetchOutcome::Accepted(meta) = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert_eq!(meta.title.as_deref(), Some("Endless"));
}

#[tokio::test]
async fn oversized_favicon_is_not_saved() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/big"))
        .await;
    assert_eq!(
        outcome,
        FetchOutcome::Accepted(PageMeta {
            title: Some("Big".into()),
            icon_path: None,
        })
    );
    assert_eq!(std::fs::read_dir(icons.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn relative_icon_href_resolves_against_page_url() {
    let addr = common::spawn_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/app/"))
        .await;

    let name = format!("127.0.0.1_{}_x.png", addr.port());
    assert_eq!(
        outcome,
        FetchOutcome::Accepted(PageMeta {
            title: Some("App".into()),
            icon_path: Some(format!("/static/icons/{name}")),
        })
    );
    assert_eq!(std::fs::read(icons.path().join(&name)).unwrap(), common::FAVICON);
}

#[tokio::test]
async fn root_favicon_is_used_without_icon_link() {
    let addr = common::spawn_favicon_only_device().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("http://{addr}/"))
        .await;

    let name = format!("127.0.0.1_{}_favicon.ico", addr.port());
    assert_eq!(
        outcome,
        FetchOutcome::Accepted(PageMeta {
            title: Some("Printer".into()),
            icon_path: Some(format!("/static/icons/{name}")),
        })
    );
    assert_eq!(std::fs::read(icons.path().join(&name)).unwrap(), common::FAVICON);
}

#[tokio::test]
async fn self_signed_https_is_accepted() {
    let addr = common::spawn_tls_fixture().await;
    let icons = tempfile::tempdir().unwrap();
    let outcome = common::fetcher(&icons)
        .fetch(&format!("https://127.0.0.1:{}/", addr.port()))
        .await;

    let name = format!("127.0.0.1_{}_fav.png", addr.port());
    assert_eq!(
        outcome,
        FetchOutcome::Accepted(PageMeta {
            title: Some("Router".into()),
            icon_path: Some(format!("/static/icons/{name}")),
        })
    );
}
