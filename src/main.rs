use anyhow::Result;
use log::{info, warn};
use novel_wizard::core::config::Config;
use novel_wizard::core::io::{NativeStorage, Storage};
use novel_wizard::services::llm::create_llm;
use novel_wizard::services::persistence::ProjectStore;
use novel_wizard::services::wizard::NovelWizard;
use novel_wizard::ui::{self, ConsoleApp};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config, asking for connection settings on first run
    let mut config = Config::load_or_default()?;
    if !config.is_ready() {
        println!("AI connection settings are missing; let's set them up.");
        if let Err(e) = ui::configure_llm(&mut config) {
            warn!("Configuration not completed: {:#}", e);
        }
    }
    config.ensure_directories()?;

    // 2. Wire up the model client and the project store
    let llm = create_llm(&config);
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let store = Arc::new(ProjectStore::new(storage, config.storage.cache_file.clone()));

    // 3. Restore the cached project
    let mut wizard = NovelWizard::new(llm).with_store(store.clone());
    match wizard.load_saved().await {
        Ok(true) => println!("Restored project 《{}》.", wizard.state().display_name()),
        Ok(false) => info!("No cached project found"),
        Err(e) => warn!("Failed to restore cached project: {:#}", e),
    }

    // 4. Run the interactive loop
    let mut app = ConsoleApp::new(config, wizard);
    let result = app.run().await;

    store.flush().await;
    result
}
