use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands;

/// certhop - obtain Let's Encrypt certificates through HTTP-01 challenges
#[derive(Parser)]
#[command(name = "certhop")]
#[command(version)]
#[command(about = "certhop - obtain Let's Encrypt certificates through HTTP-01 challenges")]
pub struct Cli {
    /// Show debug output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an account key and write a configuration record
    CreateKey {
        /// Email address to register with the CA
        #[arg(long)]
        email: Option<String>,

        /// JSON file with challenge store settings
        #[arg(long, visible_alias = "google-credentials", value_name = "FILE")]
        store: Option<PathBuf>,

        /// Write the configuration here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Domains the certificate will cover; the first becomes the CN
        #[arg(required = true, value_name = "DOMAIN")]
        domains: Vec<String>,
    },

    /// Obtain a certificate for the domains in a configuration record
    Generate(GenerateArgs),

    /// Serve challenge responses from a webroot
    Serve {
        /// Document root challenge files are written below
        #[arg(long, value_name = "DIR")]
        webroot: PathBuf,

        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:80")]
        listen: String,
    },
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Configuration record created with `certhop create-key`
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Use the Let's Encrypt production directory instead of staging
    #[arg(long, conflicts_with = "directory_url")]
    pub production: bool,

    /// ACME directory URL
    #[arg(long, env = "CERTHOP_DIRECTORY_URL", value_name = "URL")]
    pub directory_url: Option<String>,

    /// Write cert.pem, chain.pem and privkey.pem here instead of stdout
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Listen address for the built-in responder (memory store only)
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Check published responses in the store instead of fetching them over HTTP
    #[arg(long)]
    pub no_http_self_check: bool,
}

impl Cli {
    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        match self.command {
            Commands::CreateKey {
                email,
                store,
                output,
                domains,
            } => commands::create_key::run(email, store.as_deref(), output.as_deref(), domains),
            Commands::Generate(args) => {
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(commands::generate::run(args))
            }
            Commands::Serve { webroot, listen } => {
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(commands::serve::run(webroot, &listen))
            }
        }
    }
}
