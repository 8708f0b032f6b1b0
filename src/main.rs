use anyhow::Result;
use clap::Parser;

use naspt_relay::Config;

#[tokio::main]
async fn main() -> Result<()> {
    naspt_relay::run(Config::parse()).await
}
