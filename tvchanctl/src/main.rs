use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = tvchanctl::Cli::parse();
    if let Err(err) = tvchanctl::run(cli).await {
        eprintln!("error [{}]: {err}", err.kind());
        std::process::exit(1);
    }
}
