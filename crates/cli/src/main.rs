use anyhow::Result;
use clap::Parser;

use crate::commands::WeftApp;

mod commands;
mod utils;

fn main() -> Result<()> {
    let app = WeftApp::parse();
    app.init_logging();
    app.execute()
}
