//! # Hprose CLI
//!
//! Command-line client for hprose services over any supported endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Call a method (outputs raw JSON)
//! hprose call http://127.0.0.1:8080/ sum -a '[1, 2, 3]'
//!
//! # Idempotent call with failover to a second server
//! hprose call tcp://10.0.0.1:4321 get_user -a '[42]' --idempotent --failswitch -u tcp://10.0.0.2:4321
//!
//! # List the functions a server publishes
//! hprose functions ws://127.0.0.1:8080/
//!
//! # Print every message published on a topic
//! hprose subscribe tcp://127.0.0.1:4321 news --id reader-1
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use argh::FromArgs;
use hprose_client::{Client, InvokeSettings, TopicCallback};
use hprose_common::{from_json, to_json, List, Value};

#[derive(FromArgs)]
/// Hprose RPC client
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Call(CallArgs),
    Functions(FunctionsArgs),
    Subscribe(SubscribeArgs),
}

/// Arguments for making a single call.
///
/// The result is printed to stdout as one line of JSON, so the output can be
/// piped into tools like `jq`. Errors go to stderr with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a remote method
struct CallArgs {
    /// endpoint uri (http://, ws://, tcp://, tcp4:// or tcp6://)
    #[argh(positional)]
    uri: String,

    /// name of the remote method
    #[argh(positional)]
    method: String,

    /// arguments as a JSON array
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// call timeout in milliseconds
    #[argh(option, long = "timeout")]
    timeout_ms: Option<u64>,

    /// retries allowed for an idempotent call
    #[argh(option, long = "retry")]
    retry: Option<u32>,

    /// the call may be safely repeated
    #[argh(switch, long = "idempotent")]
    idempotent: bool,

    /// move to the next endpoint when a call fails
    #[argh(switch, long = "failswitch")]
    failswitch: bool,

    /// additional equivalent endpoint, used for failover
    #[argh(option, short = 'u', long = "uri")]
    extra_uris: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "functions")]
/// list the functions a server publishes
struct FunctionsArgs {
    /// endpoint uri
    #[argh(positional)]
    uri: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "subscribe")]
/// print messages published on a topic until interrupted
struct SubscribeArgs {
    /// endpoint uri
    #[argh(positional)]
    uri: String,

    /// topic name
    #[argh(positional)]
    topic: String,

    /// subscriber id; the server-assigned client id when omitted
    #[argh(option, long = "id")]
    id: Option<String>,

    /// poll timeout in milliseconds
    #[argh(option, long = "timeout")]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Call(args) => run_call(args).await,
        Commands::Functions(args) => run_functions(args).await,
        Commands::Subscribe(args) => run_subscribe(args).await,
    }
}

/// Parses the `--args` JSON into an argument list. Only arrays are accepted.
fn parse_args(json: &str) -> Result<List> {
    let json: serde_json::Value =
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;
    match from_json(&json) {
        Value::List(list) => Ok(list),
        _ => bail!("args must be a JSON array"),
    }
}

fn settings_for(args: &CallArgs) -> InvokeSettings {
    let mut settings = InvokeSettings::new()
        .idempotent(args.idempotent)
        .failswitch(args.failswitch);
    if let Some(ms) = args.timeout_ms {
        settings = settings.timeout(Duration::from_millis(ms));
    }
    if let Some(retry) = args.retry {
        settings = settings.retry(retry);
    }
    settings
}

fn print_json(value: &Value) -> Result<()> {
    let json = to_json(value)?;
    println!("{}", serde_json::to_string(&json)?);
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let call_args = parse_args(&args.args)?;
    let settings = settings_for(&args);

    let mut uris = vec![args.uri.clone()];
    uris.extend(args.extra_uris.iter().cloned());
    let client = Client::new(uris)?;

    let result = client
        .invoke(&args.method, call_args, settings)
        .await
        .with_context(|| format!("call to {} failed", args.method))?;
    print_json(&result)?;
    client.close().await;
    Ok(())
}

async fn run_functions(args: FunctionsArgs) -> Result<()> {
    let client = Client::new([args.uri])?;
    for name in client.functions().await? {
        println!("{}", name);
    }
    client.close().await;
    Ok(())
}

async fn run_subscribe(args: SubscribeArgs) -> Result<()> {
    let client = Client::new([args.uri])?;
    let callback: TopicCallback = Arc::new(|message: &Value| -> hprose_common::Result<()> {
        let json = to_json(message)?;
        println!("{}", json);
        Ok(())
    });
    let timeout = args.timeout_ms.map(Duration::from_millis);
    let id = client
        .subscribe(&args.topic, args.id, callback, timeout)
        .await?;
    tracing::info!(topic = %args.topic, id = %id, "Subscribed");

    tokio::signal::ctrl_c().await?;
    client.close().await;
    Ok(())
}
