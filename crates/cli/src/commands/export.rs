use std::path::PathBuf;

use eyre::Result;
use madmin_store::Registry;
use madmin_store::state::legacy_export;

pub async fn handle_export_command(output: Option<PathBuf>, registry: &Registry) -> Result<()> {
    let snapshot = registry.distribution().snapshot();
    if snapshot.sequence() == 0 {
        return Err(eyre::eyre!(
            "No snapshot published yet, run `madmin-registry build` first"
        ));
    }

    let path = match output {
        Some(path) => {
            let document = legacy_export(&snapshot)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serde_json::to_vec_pretty(&document)?).await?;
            path
        }
        None => registry.export().await?,
    };

    println!(
        "✅ Exported {} modules from snapshot {} to {}",
        snapshot.len(),
        snapshot.sequence(),
        path.display()
    );
    Ok(())
}
