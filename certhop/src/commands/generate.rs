use std::sync::Arc;

use certhop_core::responder;
use certhop_core::{
    AcmeClient, AcmeSettings, ChallengeStore, Configuration, HttpSelfCheck, MemoryStore,
    SelfCheck, StoreConfig, StoreSelfCheck, WebrootStore,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cli::GenerateArgs;
use crate::output;

fn settings(args: &GenerateArgs) -> AcmeSettings {
    AcmeSettings {
        staging: !args.production,
        directory_url: args.directory_url.clone(),
        ..AcmeSettings::default()
    }
}

/// Open the configured store, starting the built-in responder for memory stores
async fn open_store(
    config: StoreConfig,
    listen: Option<&str>,
) -> Result<(Arc<dyn ChallengeStore>, Option<JoinHandle<std::io::Result<()>>>), Box<dyn std::error::Error>>
{
    match config {
        StoreConfig::Memory { listen: configured } => {
            let address = listen.unwrap_or(&configured);
            let listener = TcpListener::bind(address)
                .await
                .map_err(|e| format!("Failed to listen on {}: {}", address, e))?;
            let store = MemoryStore::new();
            let responder = tokio::spawn(responder::serve(listener, Arc::new(store.clone())));
            let store: Arc<dyn ChallengeStore> = Arc::new(store);
            Ok((store, Some(responder)))
        }
        StoreConfig::Webroot { path } => {
            info!(webroot = %path.display(), "Publishing challenge responses to webroot");
            let store: Arc<dyn ChallengeStore> = Arc::new(WebrootStore::new(path));
            Ok((store, None))
        }
    }
}

pub async fn run(args: GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Configuration::load(&args.config)?;
    let account_key = config.account_key()?;
    let settings = settings(&args);

    let client = AcmeClient::connect(account_key, settings.clone()).await?;
    client.check_registration(config.email.as_deref()).await?;

    let (store, responder) = open_store(config.store_config()?, args.listen.as_deref()).await?;
    let self_check: Arc<dyn SelfCheck> = if args.no_http_self_check {
        Arc::new(StoreSelfCheck::new(store.clone()))
    } else {
        Arc::new(HttpSelfCheck::new(settings.request_timeout)?)
    };

    let result = client
        .generate_certificate(&config.domains, store, self_check)
        .await;
    if let Some(responder) = responder {
        responder.abort();
    }
    let issued = result?;

    output::log_validity(&issued);
    match &args.out_dir {
        Some(dir) => output::write_files(dir, &issued)?,
        None => print!("{}", issued.to_pem_bundle()?),
    }
    Ok(())
}
