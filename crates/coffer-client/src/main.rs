//! # coffer-client
//!
//! Interactive CLI for the coffer encrypted-file-sharing network. All
//! cryptography happens here: the server only ever receives ciphertext,
//! signatures and wrapped keys.

mod cache;
mod session;

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use coffer_net::{ApiClient, HttpNaming, MemoryNaming, Naming};
use coffer_shared::constants::PRIMARY_NODE;

use crate::cache::FileCache;
use crate::session::Session;

#[derive(Parser)]
#[command(name = "coffer", about = "Encrypted collaborative file storage client")]
struct Args {
    /// Base URL of the naming registry used to discover the primary server.
    #[arg(long, conflicts_with = "server")]
    naming_url: Option<String>,

    /// Connect directly to one server, bypassing naming discovery.
    #[arg(long)]
    server: Option<String>,

    /// Directory holding the RSA private key and certificate.
    #[arg(long, default_value = "keys")]
    keys_dir: PathBuf,

    /// Directory for local encrypted copies.
    #[arg(long, default_value = "files")]
    files_dir: PathBuf,

    /// Path of the local file cache.
    #[arg(long, default_value = "file_cache.json")]
    cache_path: PathBuf,
}

const HELP: &str = "\
Commands:
  keygen                      generate your RSA keypair and certificate
  register <username>         register your certificate under a username
  login <username>            log in via challenge-response
  upload <file>               encrypt, sign and upload a file (locks it locally)
  download <file>             fetch, verify and decrypt a file
  unlock <file>               decrypt the local copy without the server
  invite <username> <file>    share a file's key with another user
  accept <file>               accept a pending invite
  remove <username> <file>    revoke a collaborator and rotate the key
  help                        show this help
  exit                        flush state and quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let naming = match (&args.server, &args.naming_url) {
        (Some(uri), _) => {
            let naming = Naming::Memory(MemoryNaming::new());
            naming.rebind(PRIMARY_NODE, uri).await.ok();
            naming
        }
        (None, Some(url)) => Naming::Http(HttpNaming::new(url.clone())),
        (None, None) => {
            let naming = Naming::Memory(MemoryNaming::new());
            naming
                .rebind(PRIMARY_NODE, "http://127.0.0.1:8080")
                .await
                .ok();
            naming
        }
    };

    let api = ApiClient::new(naming);
    let file_cache = FileCache::load(&args.cache_path)?;
    let mut session = Session::new(api, file_cache, args.keys_dir, args.files_dir);

    println!("coffer v{}", env!("CARGO_PKG_VERSION"));
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();

        let result = match parts.as_slice() {
            [] => Ok(()),
            ["keygen"] => session.keygen().await,
            ["register", username] => session.register(username).await,
            ["login", username] => session.login(username).await,
            ["upload", file] => session.upload(file).await,
            ["download", file] => session.download(file).await,
            ["unlock", file] => session.unlock(file).await,
            ["invite", username, file] => session.invite(username, file).await,
            ["accept", file] => session.accept(file).await,
            ["remove", username, file] => session.remove(username, file).await,
            ["help"] => {
                println!("{HELP}");
                Ok(())
            }
            ["exit"] | ["quit"] => break,
            [command, ..] => {
                println!("Unknown command '{command}' — type `help`");
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("Unable to {}: {e:#}", parts.first().unwrap_or(&"run"));
        }
    }

    session.close()?;
    println!("bye!");
    Ok(())
}

fn print_prompt() {
    use std::io::Write;
    print!("> ");
    let _ = std::io::stdout().flush();
}
