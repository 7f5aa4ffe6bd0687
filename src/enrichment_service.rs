use std::sync::Arc;

use actix_web::{
    error::{ErrorBadGateway, ErrorBadRequest, ErrorInternalServerError},
    http::header,
    middleware::Logger,
    web, App, HttpResponse, HttpServer,
};
use anyhow::Result;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cnpj_finder::CnpjLookup;
use crate::pipeline::Pipeline;
use crate::spreadsheet::{read_seller_ids_from_bytes, to_csv_bytes, InputFormat};

pub const OUTPUT_FILENAME: &str = "resultados_enriquecidos.csv";

/// One batch at a time: the token is threaded through rows and must not be
/// refreshed by two batches concurrently.
pub struct AppState<L> {
    pipeline: Arc<Mutex<Pipeline<L>>>,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<L> AppState<L> {
    pub fn new(pipeline: Pipeline<L>) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn enrich_handler<L: CnpjLookup + 'static>(
    state: web::Data<AppState<L>>,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, actix_web::Error> {
    let format = InputFormat::from_name(query.format.as_deref().unwrap_or("csv"))
        .map_err(ErrorBadRequest)?;

    let seller_ids = read_seller_ids_from_bytes(&body, format).map_err(|e| {
        warn!("Rejected upload: {}", e);
        ErrorBadRequest(format!("Erro ao ler o arquivo: {}", e))
    })?;

    info!("Upload accepted with {} seller ids", seller_ids.len());

    let pipeline = state.pipeline.lock().await;
    let records = pipeline
        .run(&seller_ids)
        .await
        .map_err(ErrorBadGateway)?;
    drop(pipeline);

    let csv = to_csv_bytes(&records).map_err(ErrorInternalServerError)?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", OUTPUT_FILENAME),
        ))
        .body(csv))
}

pub fn configure<L: CnpjLookup + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/enrich", web::post().to(enrich_handler::<L>));
}

pub async fn run_enrichment_server<L: CnpjLookup + 'static>(
    addr: &str,
    pipeline: Pipeline<L>,
) -> Result<()> {
    let state = AppState::new(pipeline);

    info!("Starting enrichment service on {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(32 * 1024 * 1024))
            .wrap(Logger::default())
            .configure(configure::<L>)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
