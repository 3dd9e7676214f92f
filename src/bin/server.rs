//! SiGa middleware front-end server.
//!
//! A lightweight HTTPS server that mediates browser signing requests to
//! the SiGa signature gateway via a REST API: `/p1` and `/p2` drive the
//! ID-card (remote signing) flow, `/mid` runs a full Mobile-ID ceremony,
//! and `/` serves the browser-side assets.

#![allow(clippy::missing_errors_doc)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use serde::{Deserialize, Serialize};
use siga_bridge::{Client, Conf, DataFile, SigaError, SigaResult};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

/// Session key of the ID-card signing flow.
///
/// The front-end serves a single interactive user, so each flow runs under
/// one fixed session; the orchestrator itself is session-parameterized.
const IDCARD_SESSION: &str = "idcard";
/// Session key of the Mobile-ID signing flow.
const MOBILE_ID_SESSION: &str = "mobile-id";

#[derive(Parser)]
#[command(name = "siga-bridge")]
#[command(about = "Middleware server bridging browser signing requests to SiGa")]
#[command(version)]
struct Cli {
    /// Address to bind to (e.g., "0.0.0.0:8443")
    #[arg(short, long, default_value = "127.0.0.1:8443")]
    bind: String,

    /// Path to the SiGa client configuration JSON
    #[arg(short, long, env = "SIGA_CONF", default_value = "conf/siga.json")]
    conf: String,

    /// TLS certificate file (PEM format)
    #[arg(long)]
    tls_cert: Option<String>,

    /// TLS private key file (PEM format)
    #[arg(long)]
    tls_key: Option<String>,

    /// Directory of browser-side assets served under /
    #[arg(long, default_value = "static")]
    static_dir: String,

    /// Directory signed containers are written to
    #[arg(long, default_value = "signed")]
    signed_dir: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Shared server state.
struct AppState {
    client: Client,
    signed_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let conf = match Conf::read(&cli.conf) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("❌ Failed to read configuration {}: {e}", cli.conf);
            std::process::exit(1);
        }
    };
    log::debug!(
        "configuration loaded from {} (service {}, SiGa at {})",
        cli.conf,
        conf.service_identifier,
        conf.url
    );

    let client = match Client::new(&conf) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("❌ Failed to create SiGa client: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cli.signed_dir) {
        eprintln!("❌ Failed to create {}: {e}", cli.signed_dir);
        std::process::exit(1);
    }

    let addr: SocketAddr = match cli.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("❌ Invalid bind address: {e}");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        client,
        signed_dir: PathBuf::from(&cli.signed_dir),
    });
    let routes = build_routes(state, &cli.static_dir);

    println!("🚀 SiGa middleware listening on {addr}");
    println!("   Endpoints:");
    println!("     POST /p1  - create container, start ID-card signing");
    println!("     POST /p2  - finalize ID-card signing, store container");
    println!("     POST /mid - full Mobile-ID signing ceremony");
    println!("     GET  /    - browser assets");

    if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        warp::serve(routes).tls().cert_path(cert).key_path(key).run(addr).await;
    } else {
        println!("⚠️  Running without TLS - use only behind a TLS-terminating proxy!");
        warp::serve(routes).run(addr).await;
    }
}

/// Build all routes.
fn build_routes(
    state: Arc<AppState>,
    static_dir: &str,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let p1 = warp::path!("p1")
        .and(warp::post())
        .and(warp::body::json::<P1Request>())
        .and(with_state(state.clone()))
        .and_then(handle_p1);
    let p2 = warp::path!("p2")
        .and(warp::post())
        .and(warp::body::json::<P2Request>())
        .and(with_state(state.clone()))
        .and_then(handle_p2);
    let mid = warp::path!("mid")
        .and(warp::post())
        .and(warp::body::json::<MidRequest>())
        .and(with_state(state))
        .and_then(handle_mid);
    let assets = warp::get().and(warp::fs::dir(static_dir.to_string()));

    p1.or(p2).or(mid).or(assets)
}

/// Inject state into handlers.
fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Text and signing certificate sent by the browser to start the ID-card
/// flow. `Sert` carries the DER certificate bytes.
#[derive(Debug, Deserialize)]
struct P1Request {
    #[serde(rename = "Tekst")]
    tekst: String,
    #[serde(rename = "Sert")]
    sert: String,
}

/// Hash and digest algorithm for the browser-side signing module.
#[derive(Debug, Serialize)]
struct P1Response {
    /// Base64 of the hash to sign.
    hash: String,
    algo: String,
}

/// Base64 signature value produced by the browser-side signing module.
#[derive(Debug, Deserialize)]
struct P2Request {
    #[serde(rename = "Allkiri")]
    allkiri: String,
}

/// Person code, phone number, and text for the Mobile-ID flow.
#[derive(Debug, Deserialize)]
struct MidRequest {
    isikukood: String,
    nr: String,
    tekst: String,
}

/// Outcome of a flow that produces a signed container.
#[derive(Debug, Default, Serialize)]
struct SignedResponse {
    error: String,
    signedfile: String,
}

impl SignedResponse {
    fn error(e: &SigaError) -> Self {
        Self {
            error: e.to_string(),
            signedfile: String::new(),
        }
    }

    fn file(path: &std::path::Path) -> Self {
        Self {
            error: String::new(),
            signedfile: path.display().to_string(),
        }
    }
}

/// Handle `/p1`: create a container for the text and start remote signing
/// with the provided certificate.
async fn handle_p1(
    request: P1Request,
    state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    log::info!("p1: starting ID-card signing");
    match p1_flow(&state, &request).await {
        Ok((hash, algo)) => {
            log::info!("p1: signing started, algorithm {algo}");
            Ok(warp::reply::json(&P1Response {
                hash: BASE64.encode(hash),
                algo: algo.to_string(),
            }))
        }
        Err(e) => {
            log::warn!("p1: {e}");
            Ok(warp::reply::json(&SignedResponse::error(&e)))
        }
    }
}

async fn p1_flow(state: &AppState, request: &P1Request) -> SigaResult<(Vec<u8>, &'static str)> {
    if request.tekst.is_empty() {
        return Err(SigaError::Validation("empty text cannot be signed".into()));
    }
    let datafile = DataFile::new("fail.txt", request.tekst.as_bytes())?;
    state
        .client
        .create_container(IDCARD_SESSION, vec![datafile])
        .await?;
    state
        .client
        .start_remote_signing(IDCARD_SESSION, request.sert.as_bytes())
        .await
}

/// Handle `/p2`: finalize remote signing with the signature value and
/// write the completed container.
async fn handle_p2(
    request: P2Request,
    state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    log::info!("p2: finalizing ID-card signing");
    match p2_flow(&state, &request).await {
        Ok(path) => {
            log::info!("p2: container written to {}", path.display());
            Ok(warp::reply::json(&SignedResponse::file(&path)))
        }
        Err(e) => {
            log::warn!("p2: {e}");
            Ok(warp::reply::json(&SignedResponse::error(&e)))
        }
    }
}

async fn p2_flow(state: &AppState, request: &P2Request) -> SigaResult<PathBuf> {
    let signature = BASE64
        .decode(&request.allkiri)
        .map_err(|e| SigaError::Validation(format!("decode signature: {e}")))?;
    state
        .client
        .finalize_remote_signing(IDCARD_SESSION, &signature)
        .await?;
    write_signed(state, IDCARD_SESSION).await
}

/// Handle `/mid`: run the whole Mobile-ID ceremony, polling until the
/// operator reports completion, then write the completed container.
async fn handle_mid(
    request: MidRequest,
    state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    log::info!("mid: starting Mobile-ID signing for {}", request.nr);
    let result = mid_flow(&state, &request).await;

    // Attempt to clean up the SiGa side regardless of the outcome.
    if let Err(e) = state.client.close_container(MOBILE_ID_SESSION).await {
        log::debug!("mid: close container: {e}");
    }

    match result {
        Ok(path) => {
            log::info!("mid: container written to {}", path.display());
            Ok(warp::reply::json(&SignedResponse::file(&path)))
        }
        Err(e) => {
            log::warn!("mid: {e}");
            Ok(warp::reply::json(&SignedResponse::error(&e)))
        }
    }
}

async fn mid_flow(state: &AppState, request: &MidRequest) -> SigaResult<PathBuf> {
    if request.tekst.is_empty() {
        return Err(SigaError::Validation("empty text cannot be signed".into()));
    }
    let datafile = DataFile::new("fail.txt", request.tekst.as_bytes())?;
    state
        .client
        .create_container(MOBILE_ID_SESSION, vec![datafile])
        .await?;

    let challenge = state
        .client
        .start_mobile_id_signing(MOBILE_ID_SESSION, &request.isikukood, &request.nr, "")
        .await?;
    log::info!("mid: ceremony started, challenge {challenge}");

    // Poll the ceremony status every five seconds. The loop ends when SiGa
    // reports completion or failure, or when the request is cancelled.
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if state
            .client
            .request_mobile_id_signing_status(MOBILE_ID_SESSION)
            .await?
        {
            break;
        }
    }

    write_signed(state, MOBILE_ID_SESSION).await
}

/// Retrieve the session's container in complete form and write it under
/// the signed-output directory.
async fn write_signed(state: &AppState, session: &str) -> SigaResult<PathBuf> {
    let path = state.signed_dir.join(format!("{session}.asice"));
    let mut file = std::fs::File::create(&path)
        .map_err(|e| SigaError::Internal(format!("create {}: {e}", path.display())))?;
    state.client.write_container(session, &mut file).await?;
    Ok(path)
}
