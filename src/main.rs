use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use std::sync::Arc;

use rust_license_checker::app_state::AppState;
use rust_license_checker::config::Config;
use rust_license_checker::http_client::HttpClient;
use rust_license_checker::metrics::MetricsTracker;
use rust_license_checker::models::{
    CreateTaskRequest, CreateTaskResponse, TaskResultRequest, TaskResultResponse,
};
use rust_license_checker::solver::build_solver;
use rust_license_checker::store::{SqliteStore, TaskStore};
use rust_license_checker::worker::LicenseWorker;

#[post("/v1/license/tasks")]
async fn create_task(
    data: web::Data<AppState>,
    body: web::Json<CreateTaskRequest>,
) -> impl Responder {
    let task_id = match data.store.create_task().await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to create task: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    // Fire-and-forget: the task record is already persisted as pending,
    // the caller polls for the result
    let credentials = body.into_inner();
    let worker = data.worker.clone();
    let spawned_task_id = task_id.clone();
    let user = credentials.username.clone();
    let script = credentials.script_name.clone();
    actix_web::rt::spawn(async move {
        worker.run(&spawned_task_id, &user, &script).await;
    });

    info!("Created license task {}", task_id);
    HttpResponse::Ok().json(CreateTaskResponse {
        task_id,
        credentials,
    })
}

#[post("/v1/license/tasks/result")]
async fn task_result(
    data: web::Data<AppState>,
    body: web::Json<TaskResultRequest>,
) -> impl Responder {
    match data.store.read_license_result(&body.task_id).await {
        Ok(Some(outcome)) => HttpResponse::Ok().json(TaskResultResponse::from(outcome)),
        Ok(None) => HttpResponse::NotFound().finish(),
        Err(e) => {
            error!("Failed to read task {}: {}", body.task_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/metrics")]
async fn metrics(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.metrics.export_json())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::load();
    let metrics_tracker = MetricsTracker::new();
    let http = Arc::new(
        HttpClient::with_config(config.http.client_config(), metrics_tracker.clone())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
    );
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteStore::open(&config.server.database_path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
    );
    let solver = build_solver(&config.captcha, http.clone());
    let worker = Arc::new(LicenseWorker::new(
        &config,
        http,
        solver,
        store.clone(),
        metrics_tracker.clone(),
    ));

    let bind = config.server.bind.clone();
    let state = web::Data::new(AppState {
        worker,
        store,
        metrics: metrics_tracker,
        config,
    });

    info!("Listening on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(create_task)
            .service(task_result)
            .service(metrics)
    })
    .bind(&bind)?
    .run()
    .await
}
