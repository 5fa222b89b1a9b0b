use std::path::PathBuf;

use tracing::info;

use crate::db::open_in;
use crate::error::Result;
use crate::settings::{load_settings, save_settings, save_settings_patch, shellexpand_path};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let settings = match data_dir {
        Some(dir) => save_settings_patch(serde_json::json!({ "data_dir": shellexpand_path(&dir) }))?,
        None => {
            let settings = load_settings();
            save_settings(&settings)?;
            settings
        }
    };

    let resolved = PathBuf::from(&settings.data_dir);
    for sub in ["staging", "evidence", "export", "reports", "tokens"] {
        std::fs::create_dir_all(resolved.join(sub))?;
    }
    open_in(&resolved)?;

    info!(data_dir = %resolved.display(), "initialized data directory");
    println!("Initialized fetchexpense at {}", resolved.display());
    Ok(())
}
