use anyhow::{Result, bail};
use clap::Parser;
use prime_time::types::{METHOD, Request, Response};
use serde_json::Number;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, stdin};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::select;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "localhost:1337")]
    address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut reader = BufReader::new(stdin());

    let (read_half, mut write_half) = TcpStream::connect(&args.address).await?.into_split();
    let mut responses = BufReader::new(read_half);
    info!("Connected to {}", args.address);

    let exit = loop {
        let mut line = String::new();
        select! {
            _  = signal::ctrl_c() => break 1,
            res  = reader.read_line(&mut line) => {
                match res {
                    Ok(amnt) => {
                        if amnt == 0 {
                            break 0;
                        }
                        if let Err(err) = process_request(line.trim(), &mut write_half, &mut responses).await {
                            error!("{err}");
                            break 1;
                        }
                    }
                    Err(err) => {
                        error!("Error reading std: {err}");
                        break 1;
                    }
                }
            }
        }
    };

    std::process::exit(exit);
}

async fn process_request(
    line: &str,
    socket: &mut OwnedWriteHalf,
    responses: &mut BufReader<OwnedReadHalf>,
) -> Result<()> {
    let number: Number = match serde_json::from_str(line) {
        Ok(number) => number,
        Err(_) => {
            error!("Couldn't parse number");
            return Ok(());
        }
    };
    let request = Request::new(number.clone());
    debug!("Sending {:?}", request);
    let mut bytes = serde_json::to_vec(&request)?;
    bytes.push(b'\n');
    socket.write_all(&bytes).await?;
    debug!("Wrote request to socket");

    let mut response_line = String::new();
    let got = responses.read_line(&mut response_line).await?;
    debug!("Read {got} bytes from socket: {}", response_line.trim_end());
    if got == 0 {
        bail!("Server closed the connection");
    }
    let response: Response = match serde_json::from_str(&response_line) {
        Ok(response) => response,
        Err(_) => bail!("Server rejected the request: {}", response_line.trim_end()),
    };
    if response.method != METHOD {
        error!("Invalid response method! ({})", response.method);
    } else if response.prime {
        println!("{number} is prime");
    } else {
        println!("{number} is not prime");
    }
    Ok(())
}
