use std::{fs, path::PathBuf};

use clap::Parser;
use storefront_api::openapi::ApiDocV1;
use utoipa::OpenApi;

#[derive(Parser)]
#[command(name = "openapi-export", about = "Write the OpenAPI document as JSON")]
struct Args {
    /// Output file; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let json = serde_json::to_string_pretty(&ApiDocV1::openapi())?;

    match args.output {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, json)?;
            eprintln!("OpenAPI spec written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
