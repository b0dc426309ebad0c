//! HttpProber against in-process fake devices.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use minerscan::model::Device;
use minerscan::probe::{Credentials, DeviceProber, HttpProber, ProbeError};

const STATS: &str = r#"{"INFO":{"type":"Antminer S19 XP+ Hyd."},"STATS":[{"rate_avg":306230.0,"rate_unit":"GH/s"}]}"#;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn prober(addr: SocketAddr, paths: &[&str], timeout: Duration) -> HttpProber {
    let endpoints = paths
        .iter()
        .map(|path| format!("http://{{ip}}:{}{}", addr.port(), path))
        .collect();
    HttpProber::new(endpoints, Credentials::new("root", "root"), timeout).unwrap()
}

fn local_device() -> Device {
    Device::new("1x1", "127.0.0.1")
}

fn counted(hits: &Arc<AtomicUsize>, status: StatusCode, body: &'static str) -> axum::routing::MethodRouter {
    let hits = hits.clone();
    get(move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            (status, body)
        }
    })
}

#[tokio::test]
async fn falls_back_to_next_endpoint_and_stops_at_first_success() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route("/first", counted(&first, StatusCode::NOT_FOUND, "nope"))
        .route("/second", counted(&second, StatusCode::OK, STATS))
        .route("/third", counted(&third, StatusCode::OK, "{}"));
    let addr = serve(app).await;

    let prober = prober(addr, &["/first", "/second", "/third"], Duration::from_secs(2));
    let body = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(body.as_ref(), STATS.as_bytes());
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(third.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_endpoints_report_the_last_cause() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/a", counted(&hits, StatusCode::NOT_FOUND, ""))
        .route("/b", counted(&hits, StatusCode::INTERNAL_SERVER_ERROR, ""));
    let addr = serve(app).await;

    let prober = prober(addr, &["/a", "/b"], Duration::from_secs(2));
    let err = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProbeError::AllEndpointsFailed { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, ProbeError::Status(500)), "last was {last:?}");
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn answers_digest_challenge() {
    let app = Router::new().route(
        "/cgi-bin/stats.cgi",
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();

            let valid = auth.starts_with("Digest ")
                && auth.contains(r#"username="root""#)
                && auth.contains(r#"realm="antMiner Configuration""#)
                && auth.contains(r#"nonce="5f1d3c""#)
                && auth.contains(r#"uri="/cgi-bin/stats.cgi""#)
                && auth.contains("response=");

            if valid {
                (StatusCode::OK, STATS).into_response()
            } else {
                challenge(r#"Digest realm="antMiner Configuration", nonce="5f1d3c", qop="auth""#)
            }
        }),
    );
    let addr = serve(app).await;

    let prober = prober(addr, &["/cgi-bin/stats.cgi"], Duration::from_secs(2));
    let body = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(body.as_ref(), STATS.as_bytes());
}

#[tokio::test]
async fn answers_basic_challenge() {
    let app = Router::new().route(
        "/stats",
        get(|headers: HeaderMap| async move {
            // base64("root:root")
            if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Basic cm9vdDpyb290") {
                (StatusCode::OK, STATS).into_response()
            } else {
                challenge(r#"Basic realm="miner""#)
            }
        }),
    );
    let addr = serve(app).await;

    let prober = prober(addr, &["/stats"], Duration::from_secs(2));
    let body = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(body.as_ref(), STATS.as_bytes());
}

#[tokio::test]
async fn rejected_credentials_are_an_auth_failure() {
    let app = Router::new().route(
        "/stats",
        get(|| async { challenge(r#"Digest realm="miner", nonce="n", qop="auth""#) }),
    );
    let addr = serve(app).await;

    let prober = prober(addr, &["/stats"], Duration::from_secs(2));
    let err = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProbeError::AllEndpointsFailed { last, .. } => {
            assert!(matches!(*last, ProbeError::Auth(_)), "last was {last:?}");
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_device_times_out() {
    let app = Router::new().route(
        "/stats",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            STATS
        }),
    );
    let addr = serve(app).await;

    let prober = prober(addr, &["/stats"], Duration::from_millis(200));
    let started = Instant::now();
    let err = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    match err {
        ProbeError::AllEndpointsFailed { last, .. } => {
            assert!(matches!(*last, ProbeError::Timeout), "last was {last:?}");
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn challenge_and_retry_share_one_timeout() {
    // Each request alone fits in the timeout; the two together do not.
    let app = Router::new().route(
        "/stats",
        get(|headers: HeaderMap| async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            if headers.contains_key(AUTHORIZATION) {
                (StatusCode::OK, STATS).into_response()
            } else {
                challenge(r#"Digest realm="miner", nonce="n", qop="auth""#)
            }
        }),
    );
    let addr = serve(app).await;

    let prober = prober(addr, &["/stats"], Duration::from_secs(1));
    let started = Instant::now();
    let err = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(1300), "took {:?}", started.elapsed());
    match err {
        ProbeError::AllEndpointsFailed { last, .. } => {
            assert!(matches!(*last, ProbeError::Timeout), "last was {last:?}");
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_is_a_connection_failure() {
    // Grab a free port, then close it.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let prober = prober(addr, &["/stats"], Duration::from_secs(2));
    let err = prober
        .probe(&local_device(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProbeError::AllEndpointsFailed { last, .. } => {
            assert!(matches!(*last, ProbeError::Connection(_)), "last was {last:?}");
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_aborts_in_flight_request() {
    let later = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                STATS
            }),
        )
        .route("/later", counted(&later, StatusCode::OK, STATS));
    let addr = serve(app).await;

    let prober = prober(addr, &["/slow", "/later"], Duration::from_secs(20));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = prober.probe(&local_device(), &cancel).await.unwrap_err();

    assert!(matches!(err, ProbeError::Cancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

fn challenge(value: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, value)], "").into_response()
}
