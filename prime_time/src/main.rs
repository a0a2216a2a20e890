use clap::Parser;
use prime_time::server;
use prime_time::session::Session;
use tokio::select;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    #[arg(long, default_value_t = 1337)]
    port: u16,

    /// Longest accepted request line in bytes; unlimited when unset.
    #[arg(long)]
    max_line_length: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let addr = format!("{}:{}", args.address, args.port);
    let max_line_length = args.max_line_length;
    select! {
        result = server::listen_and_serve(&addr, move |socket, _| {
            Session::new(socket).with_max_line_length(max_line_length).start()
        }) => result?,
        _ = signal::ctrl_c() => info!("Shutting down..."),
    }
    Ok(())
}
