use std::path::PathBuf;

use clap::Args;
use keeper_core::plugin::PluginManager;
use tracing::info;

use super::serve::{api_document, register_plugins};

#[derive(Args)]
pub struct OpenApiCommand {
    /// Write the document to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

impl OpenApiCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let mut manager = PluginManager::new();
        register_plugins(&mut manager);
        let document = api_document(&manager).to_pretty_json()?;

        match self.output {
            Some(path) => {
                std::fs::write(&path, document)?;
                info!("OpenAPI document written to {}", path.display());
            }
            None => println!("{}", document),
        }
        Ok(())
    }
}
