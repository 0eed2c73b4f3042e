//! OQL Server CLI
//!
//! A thin wrapper around the oql-server library.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use oql_server::{ServerConfig, ServerCore};

#[derive(Parser)]
#[command(name = "oql-server")]
#[command(about = "OData-style query server over JSON datasets")]
#[command(after_help = "\
EXAMPLES:
    # Serve the bundled sample
    oql-server demos/shop.json

    # Then query it
    curl 'localhost:3000/resources/orders?$filter=status%20eq%20%27Open%27&$orderby=total%20desc'
")]
struct Args {
    /// Dataset file: a JSON document with a schema and collections
    dataset: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Page size when a request has no $top. Use 0 for unlimited.
    #[arg(long, default_value = "100")]
    default_top: usize,

    /// Largest $top a request may ask for. Use 0 for unlimited.
    #[arg(long, default_value = "1000")]
    max_top: usize,
}

fn limit(n: usize) -> Option<usize> {
    (n != 0).then_some(n)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        default_top: limit(args.default_top),
        max_top: limit(args.max_top),
    };
    log::info!(
        "Page size: default {}, max {}",
        config.default_top.map_or("unlimited".to_string(), |n| n.to_string()),
        config.max_top.map_or("unlimited".to_string(), |n| n.to_string())
    );

    let dataset = oql_server::loader::load_dataset(&args.dataset).await?;
    let core = Arc::new(ServerCore::with_dataset(dataset, config));

    let router = oql_server::build_router_with_docs(core);

    let addr = format!("{}:{}", args.host, args.port);
    println!("Starting server on {}", addr);
    println!("  GET  /resources - List collections");
    println!("  GET  /resources/{{name}}?$filter=&$orderby=&$select=&$top=&$skip= - Query a collection");
    println!("  GET  /swagger-ui - API documentation");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
