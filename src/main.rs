use clap::{Parser, Subcommand};

use pbmock::cli::call::CallArgs;
use pbmock::config::types::EXPOSED_HOST;
use pbmock::config::{MockConfig, MockSettings};
use pbmock::PbmockError;

#[derive(Parser)]
#[command(
    name = "pbmock",
    version,
    about = "Mock server and REST client for RPC services with HTTP bindings"
)]
struct Cli {
    /// Config file (overrides PBMOCK_CONFIG and default locations)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mock server, reloading when mock definitions change
    Mock {
        /// Directory watched for mock definition files
        #[arg(long)]
        dir: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Path prefix of every route
        #[arg(long)]
        prefix: Option<String>,

        /// Expose the server on 0.0.0.0
        #[arg(long)]
        host: bool,

        /// Definition file suffix, 'mock' matches 'greeter.mock.json'
        #[arg(long)]
        file_suffix: Option<String>,

        /// Log every request
        #[arg(long, alias = "express-log")]
        request_log: bool,

        /// Service schema file (repeatable)
        #[arg(long = "schema")]
        schemas: Vec<String>,

        /// Quiet period before reloading after a change
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// How often the directory is rescanned
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },

    /// Call a unary method over its HTTP binding
    Call {
        /// Method reference in package.Service.Method format
        method_ref: String,

        /// Request fields as key:value or key=value
        args: Vec<String>,

        /// Request message as JSON, merged under the key:value fields
        #[arg(long)]
        data: Option<String>,

        /// Service schema file (repeatable)
        #[arg(long = "schema")]
        schemas: Vec<String>,

        /// Server base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Request metadata as K=V (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request timeout in milliseconds
        #[arg(long, env = "PBMOCK_CALL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PBMOCK_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), PbmockError> {
    match cli.command {
        Commands::Mock {
            dir,
            port,
            prefix,
            host,
            file_suffix,
            request_log,
            schemas,
            debounce_ms,
            poll_interval_ms,
        } => {
            let config = pbmock::load_config(cli.config.as_deref())?;
            let mut mock = MockConfig {
                dir,
                host: host.then(|| EXPOSED_HOST.to_string()),
                port,
                prefix,
                file_suffix,
                request_log: request_log.then_some(true),
                debounce_ms,
                poll_interval_ms,
            };
            mock.merge(config.mock);
            let schemas = if schemas.is_empty() {
                config.schemas
            } else {
                schemas
            };
            let settings = MockSettings::resolve(mock, schemas).ok_or_else(|| {
                PbmockError::InvalidArgument(
                    "--dir is required (or set mock.dir in pbmock.json)".to_string(),
                )
            })?;
            pbmock::cli::mock_cmd::run_mock(settings).await
        }
        Commands::Call {
            method_ref,
            args,
            data,
            schemas,
            base_url,
            headers,
            timeout_ms,
        } => {
            pbmock::cli::call::run_call(CallArgs {
                method_ref,
                args,
                data,
                schemas,
                base_url,
                headers,
                timeout_ms,
                config: cli.config,
            })
            .await
        }
    }
}
