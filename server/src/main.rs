use clap::Parser;
use server::game::GameConfig;
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;

/// Parses command-line arguments, builds the server and runs it until
/// Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "12345")]
        port: u16,
        /// Path to the word list (one "word,difficulty" entry per line)
        #[clap(short, long, default_value = "words.txt")]
        words: PathBuf,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = Arc::new(Server::new(&address, GameConfig::default(), &args.words).await?);

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
