use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use anyhow::{Context, Result};
use bytes::Bytes;
use review_harvest::{
    config::HarvestConfig,
    extract::HtmlReviewExtractor,
    logging,
    progress::{ChannelProgress, LogProgress, ProgressSink},
    run::{Harvest, HarvestReport},
    sink::JsonFileSink,
    webdriver::WebDriverSession,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tracing::{info, warn};

// -------------------------
// Request / State Types
// -------------------------

#[derive(Deserialize)]
struct HarvestReq {
    /// Id substituted into the configured page URL template.
    target_id: String,
    target_count: Option<usize>,
    poll_timeout_secs: Option<u64>,
}

struct AppState {
    config: HarvestConfig,
    extractor: HtmlReviewExtractor,
    sink: JsonFileSink,
    /// One browser, one harvest at a time.
    busy: Arc<Mutex<()>>,
}

impl AppState {
    fn run_config(&self, req: &HarvestReq) -> HarvestConfig {
        let mut cfg = self.config.clone();
        if let Some(n) = req.target_count {
            cfg.run.target_count = n;
        }
        if let Some(s) = req.poll_timeout_secs {
            cfg.run.poll_timeout_secs = s;
        }
        cfg
    }
}

fn busy_json() -> serde_json::Value {
    serde_json::json!({ "error": "a harvest is already running" })
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(
        "review_harvest online.\n\
         JSON:\n  POST /harvest {\"target_id\":\"1124715036\",\"target_count\":200}\n  GET  /harvest?target_id=...&target_count=200\n\
         Stream:\n  GET  /harvest/stream?target_id=... (SSE)",
    )
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[post("/harvest")]
async fn harvest_endpoint(state: web::Data<AppState>, body: web::Json<HarvestReq>) -> impl Responder {
    respond(state, body.into_inner()).await
}

#[get("/harvest")]
async fn harvest_get(state: web::Data<AppState>, q: web::Query<HarvestReq>) -> impl Responder {
    respond(state, q.into_inner()).await
}

async fn respond(state: web::Data<AppState>, req: HarvestReq) -> HttpResponse {
    let Ok(guard) = state.busy.clone().try_lock_owned() else {
        return HttpResponse::Conflict().json(busy_json());
    };
    let done = detach(guard, async move { run_harvest(&state, &req, &LogProgress).await });
    match done.await {
        Ok(Ok(report)) => HttpResponse::Ok().json(report),
        Ok(Err(e)) => {
            let err = serde_json::json!({ "error": format!("{e:#}") });
            HttpResponse::BadRequest().json(err)
        }
        Err(_) => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": "harvest task ended without a result" })),
    }
}

/// Runs `fut` on its own task and holds `guard` until it finishes. Dropping
/// the receiver (a client hanging up) leaves the run and its browser alone.
fn detach<T, F>(guard: OwnedMutexGuard<()>, fut: F) -> oneshot::Receiver<T>
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    let (tx, rx) = oneshot::channel();
    actix_web::rt::spawn(async move {
        let _guard = guard;
        let _ = tx.send(fut.await);
    });
    rx
}

// --------------
// SSE streaming
// --------------

fn sse_event(event: &str, data_json: &str) -> Bytes {
    let payload = format!("event: {}\ndata: {}\n\n", event, data_json);
    Bytes::from(payload)
}

#[get("/harvest/stream")]
async fn harvest_stream(state: web::Data<AppState>, q: web::Query<HarvestReq>) -> impl Responder {
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let req = q.into_inner();

    let done_rx = match state.busy.clone().try_lock_owned() {
        Ok(guard) => {
            let state = state.clone();
            detach(guard, async move {
                let progress = ChannelProgress::new(ev_tx);
                let result = run_harvest(&state, &req, &progress).await;
                drop(progress);
                match result {
                    Ok(report) => sse_event(
                        "done",
                        &serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string()),
                    ),
                    Err(e) => sse_event(
                        "error",
                        &serde_json::json!({ "error": format!("{e:#}") }).to_string(),
                    ),
                }
            })
        }
        Err(_) => {
            drop(ev_tx);
            let (done_tx, done_rx) = oneshot::channel();
            let _ = done_tx.send(sse_event("error", &busy_json().to_string()));
            done_rx
        }
    };

    let stream = async_stream::stream! {
        while let Some(ev) = ev_rx.recv().await {
            let data = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
            yield Ok::<Bytes, actix_web::Error>(sse_event(ev.name(), &data));
        }
        if let Ok(last) = done_rx.await {
            yield Ok::<Bytes, actix_web::Error>(last);
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

// -------------------------
// Harvest runner (one webdriver session per run)
// -------------------------

async fn run_harvest(
    state: &AppState,
    req: &HarvestReq,
    progress: &dyn ProgressSink,
) -> Result<HarvestReport> {
    let cfg = state.run_config(req);
    // fail fast on a bad id before starting a browser
    cfg.target.page_url(&req.target_id)?;

    let session = WebDriverSession::connect(&cfg.browser).await?;
    let result = Harvest {
        session: &session,
        extractor: &state.extractor,
        sink: &state.sink,
        progress,
        config: &cfg,
    }
    .run(&req.target_id)
    .await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "webdriver session did not close cleanly");
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let config = HarvestConfig::load().context("loading configuration")?;
    let extractor = HtmlReviewExtractor::new(&config.fields)?;
    let bind = (config.server.host.clone(), config.server.port);

    let state = web::Data::new(AppState {
        sink: JsonFileSink::new(config.output.dir.clone()),
        extractor,
        config,
        busy: Arc::new(Mutex::new(())),
    });

    info!(host = %bind.0, port = bind.1, "starting review_harvest");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(index)
            .service(healthz)
            .service(harvest_endpoint)
            .service(harvest_get) // GET JSON
            .service(harvest_stream) // SSE stream
    })
    .bind(bind)?
    .run()
    .await?;
    Ok(())
}
