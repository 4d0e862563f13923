use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = proxyhost::cli::Cli::parse();
    if let Err(e) = proxyhost::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
