use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "routecodex", about = "LLM request gateway")]
pub struct Cli {
    /// Routing configuration file (routes, pools, providers).
    #[arg(short, long, env = "ROUTECODEX_CONFIG")]
    pub config: PathBuf,

    #[arg(long, env = "ROUTECODEX_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, env = "ROUTECODEX_PORT", default_value_t = 5520)]
    pub port: u16,
}
