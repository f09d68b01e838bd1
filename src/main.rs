//! html2pdf-render CLI and HTTP service

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use html2pdf_render::cdp::ChromeLauncher;
use html2pdf_render::server::{self, Service};
use html2pdf_render::storage::Storage;
use html2pdf_render::{
    BoundaryDetector, CancelToken, ConversionRequest, Converter, ExecutionMode, PageFormat,
    ServiceConfig,
};

#[derive(Parser)]
#[command(name = "html2pdf-render")]
#[command(version)]
#[command(about = "Render HTML through headless Chrome into PDF", long_about = None)]
struct Cli {
    /// Engine binary to force (otherwise probed or discovered)
    #[arg(long, global = true, env = "CHROME_PATH", value_name = "PATH")]
    chrome_path: Option<PathBuf>,

    /// Probe system install paths for the engine binary
    #[arg(long, global = true)]
    production: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to listen on
        #[arg(long, env = "BIND_ADDR", value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Convert one HTML file
    Convert {
        /// Input HTML file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output PDF file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Page layout
        #[arg(long, value_enum, default_value_t = PageFormat::Paged)]
        format: PageFormat,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ServiceConfig::from_env();
    if cli.production {
        config.render.mode = ExecutionMode::Production;
    }
    if cli.chrome_path.is_some() {
        config.render.chrome_path = cli.chrome_path;
    }
    info!("Environment: {}", config.render.mode);

    let detector = BoundaryDetector::new(config.boundary);
    let converter = Converter::with_detector(ChromeLauncher, config.render.clone(), detector);

    match cli.command {
        Commands::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let service = Service::new(converter, Storage::from_config(&config.storage));
            server::serve(Arc::new(service), &addr)?;
        }
        Commands::Convert { input, output, format } => {
            let html = fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let request = ConversionRequest::new(html, format);
            let pdf = converter.convert(&request, &CancelToken::new())?;
            fs::write(&output, &pdf.bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(
                "Wrote {} ({} bytes, {} page(s))",
                output.display(),
                pdf.len(),
                pdf.page_count
            );
        }
    }
    Ok(())
}
