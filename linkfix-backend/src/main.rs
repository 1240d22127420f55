use clap::Parser;
use linkfix_backend::{BackendState, serve};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "linkfix-backend")]
struct BackendArgs {
    #[arg(long, default_value = "127.0.0.1:7878")]
    bind_address: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = BackendArgs::parse();
    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!("backend starting on {}", args.bind_address);
    if let Err(err) = serve(listener, BackendState::with_defaults()).await {
        warn!("backend server exited: {}", err);
    }
}
