use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use meli_enricher::auth::TokenManager;
use meli_enricher::cnpj_finder::{build_search_client, ChromeRenderer, CnpjResolver};
use meli_enricher::config::Settings;
use meli_enricher::enrichment_service::run_enrichment_server;
use meli_enricher::pipeline::Pipeline;
use meli_enricher::report::BatchReport;
use meli_enricher::seller::SellerClient;
use meli_enricher::spreadsheet::{export_to_csv, generate_output_filename, read_seller_ids};

const CREDENTIALS_TEMPLATE: &str = "client_name,app_id,client_secret,refresh_token\n\
                                    NOME_DA_APP,123...,SEU_SECRET,SEU_REFRESH_TOKEN";

#[derive(Parser)]
#[command(name = "meli-enricher")]
#[command(about = "Enriches Mercado Livre seller spreadsheets with profile data and CNPJs", long_about = None)]
struct Cli {
    /// chromedriver endpoint used by the browser fallback
    #[arg(long, global = true)]
    webdriver_url: Option<String>,

    #[arg(long, global = true)]
    client_file: Option<PathBuf>,

    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a .csv or .xlsx file whose first column holds seller ids
    Enrich {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check (and refresh if needed) the marketplace access token
    Token,

    /// Search the CNPJ of a single seller
    Lookup {
        #[arg(long)]
        nickname: String,

        #[arg(long)]
        city: String,
    },

    /// Serve the upload endpoint (POST /enrich)
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = Settings::from_env();
        if let Some(url) = &self.webdriver_url {
            settings.webdriver_url = url.clone();
        }
        if let Some(path) = &self.client_file {
            settings.client_file = path.clone();
        }
        if let Some(path) = &self.token_file {
            settings.token_file = path.clone();
        }
        settings
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .cookie_store(true)
        .build()
        .context("Unable to construct reqwest client")
}

fn ensure_credentials_file(settings: &Settings) -> Result<()> {
    if !settings.client_file.exists() {
        bail!(
            "Credentials file {:?} not found. Create it with the following structure:\n{}",
            settings.client_file,
            CREDENTIALS_TEMPLATE
        );
    }
    info!("✅ Credentials file {:?} found", settings.client_file);
    Ok(())
}

fn build_resolver(settings: &Settings) -> Result<CnpjResolver<ChromeRenderer>> {
    let search = build_search_client().context("Unable to construct search client")?;
    Ok(CnpjResolver::new(
        search,
        &settings.search_url,
        ChromeRenderer::new(&settings.webdriver_url),
    ))
}

fn build_pipeline(
    http: &reqwest::Client,
    settings: &Settings,
) -> Result<Pipeline<CnpjResolver<ChromeRenderer>>> {
    let tokens = Arc::new(TokenManager::new(http.clone(), settings));
    let sellers = SellerClient::new(http.clone(), &settings.api_base_url, tokens);
    Ok(Pipeline::new(sellers, build_resolver(settings)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let settings = cli.settings();
    let http = build_http_client()?;

    match cli.command {
        Commands::Enrich { input, output } => {
            ensure_credentials_file(&settings)?;
            let start_time = Instant::now();

            let seller_ids = read_seller_ids(&input)
                .with_context(|| format!("Failed to read input file {:?}", input))?;

            let pipeline = build_pipeline(&http, &settings)?;
            let records = pipeline.run(&seller_ids).await?;

            let output = output.unwrap_or_else(|| PathBuf::from(generate_output_filename()));
            export_to_csv(&records, &output)
                .with_context(|| format!("Failed to write {:?}", output))?;

            info!("========== Processing Complete ==========");
            BatchReport::new(&records, start_time.elapsed().as_secs_f64()).display();
            println!("Results saved to {}", output.display());
        }

        Commands::Token => {
            ensure_credentials_file(&settings)?;
            let tokens = TokenManager::new(http, &settings);
            match tokens.get_valid_token().await {
                Some(_) => println!("✅ Access token available (cached in {:?})", settings.token_file),
                None => bail!("Authentication failed. Check {:?} and the connection.", settings.client_file),
            }
        }

        Commands::Lookup { nickname, city } => {
            let resolver = build_resolver(&settings)?;
            let outcome = resolver.resolve(&nickname, &city).await;
            println!("{}", outcome);
        }

        Commands::Serve { addr } => {
            ensure_credentials_file(&settings)?;
            let pipeline = build_pipeline(&http, &settings)?;
            run_enrichment_server(&addr, pipeline).await?;
        }
    }

    Ok(())
}
