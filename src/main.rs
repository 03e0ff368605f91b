//! React Native Preview - live device previews for React Native apps
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;

use rn_preview::{describe_devices, describe_tools, run_controller};

/// React Native Preview controller
///
/// By default, serves the preview bridge over stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "rnpreview")]
#[command(about = "Live device previews for React Native apps", long_about = None)]
struct Args {
    /// Path to the React Native project
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Print the configured devices as JSON and exit
    #[arg(long)]
    list_devices: bool,

    /// Check for Xcode and Android SDK tools and exit
    #[arg(long)]
    check_tools: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let project_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if args.check_tools {
        println!("{}", describe_tools().await?);
        return Ok(());
    }

    if args.list_devices {
        let settings = rnp_app::load_settings(&project_path);
        println!("{}", describe_devices(&settings)?);
        return Ok(());
    }

    // stdout carries the bridge from here on; logs go to a file
    rnp_core::logging::init()?;
    run_controller(&project_path).await?;
    Ok(())
}
