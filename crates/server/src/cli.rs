use std::path::PathBuf;

use clap::Parser;

/// Help desk assistant server.
///
/// Configuration comes from the environment (and `.env`); the flags below
/// override individual values for local runs.
#[derive(Parser, Debug)]
#[command(name = "askdesk-server", version, about = "Help desk assistant server")]
pub struct Cli {
    /// Bind address override (HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port override (PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Knowledge index JSONL override (KNOWLEDGE_INDEX_PATH)
    #[arg(long)]
    pub index: Option<PathBuf>,

    /// Provider chain TOML override (LLM_PROVIDERS_FILE)
    #[arg(long)]
    pub providers: Option<PathBuf>,

    /// Validate configuration, index and provider chain, then exit
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut askdesk_core::Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(index) = &self.index {
            config.retrieval.index_path = index.clone();
        }
        if let Some(providers) = &self.providers {
            config.llm.providers_file = providers.clone();
        }
    }
}
