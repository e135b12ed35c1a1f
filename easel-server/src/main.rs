use anyhow::Result;
use clap::Parser;
use easel_core::{download_model, load_model, DeviceMap, Inference, LoadOptions};
use tokio::{self, net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;

use api::AppState;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Easel img2img inference server")]
struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Hub id of the Stable Diffusion checkpoint
    #[arg(long, default_value = easel_core::DEFAULT_MODEL_ID)]
    model: String,

    /// Hub revision (branch, tag or commit) of the checkpoint
    #[arg(long)]
    revision: Option<String>,

    /// Hub id of the repository holding the CLIP tokenizer
    #[arg(long, default_value = easel_core::DEFAULT_TOKENIZER_ID)]
    tokenizer: String,

    /// Load the fp32 weights instead of the fp16 ones
    #[arg(long)]
    full_precision: bool,

    /// Attention slice size, trades speed for memory
    #[arg(long)]
    sliced_attention_size: Option<usize>,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Fetch the weights into the local cache and exit
    #[arg(long)]
    download_only: bool,
}

impl Args {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            model_id: self.model.clone(),
            revision: self.revision.clone(),
            tokenizer_id: self.tokenizer.clone(),
            device_map: DeviceMap::from_cpu_flag(self.cpu),
            use_f16: !self.full_precision,
            sliced_attention_size: self.sliced_attention_size,
            progress: true,
            ..LoadOptions::from_env()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        return;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_server=info,easel_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let options = args.load_options();
    info!(?options, "starting");

    if args.download_only {
        download_model(options).await?;
        info!("weights cached");
        return Ok(());
    }

    // --- Load the model once at startup; a failure here is fatal ---
    let handle = match load_model(options).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("model initialization failed: {e:#}");
            return Err(e);
        }
    };
    let app = api::router(AppState(Inference::new(handle)));

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
