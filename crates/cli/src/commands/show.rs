use eyre::Result;
use madmin_store::{ClientProfile, LookupResult, Registry};
use madmin_types::ModuleManifest;

pub async fn handle_show_command(
    id: String,
    client_version: Option<String>,
    os: Option<String>,
    registry: &Registry,
) -> Result<()> {
    let client = ClientProfile::new(client_version.as_deref(), os.as_deref());

    match registry.distribution().lookup(&id, &client) {
        LookupResult::Found { module } => print_module(&module),
        LookupResult::Ineligible { message, .. } => {
            println!("🚫 {} is not offered to this client: {}", id, message);
        }
        LookupResult::NotFound { .. } => {
            println!("❌ {} is not in the live snapshot", id);
        }
    }

    if let Some(record) = registry.verification().record(&id).await {
        println!("  Verification: {} (revision {})", record.status, record.revision);
        if let (Some(reviewer), Some(at)) = (&record.reviewer, record.last_reviewed_at) {
            println!("    Last review by {} at {}", reviewer, at.format("%Y-%m-%d %H:%M"));
        }
        for entry in record.history.iter().rev().take(5) {
            println!(
                "    {} {} -> {} by {}{}",
                entry.at.format("%Y-%m-%d"),
                entry.from,
                entry.to,
                entry.reviewer,
                if entry.note.is_empty() {
                    String::new()
                } else {
                    format!(": {}", entry.note)
                }
            );
        }
    }
    Ok(())
}

fn print_module(module: &ModuleManifest) {
    println!(
        "📦 {} ({}){}",
        module.name,
        module.id,
        if module.verified { " ✅ verified" } else { "" }
    );
    println!("  {}", module.description);
    println!("  Category: {}", module.category);
    println!("  Repository: {}", module.repository);
    println!("  Author: {}", module.author.name);
    if !module.tags.is_empty() {
        println!("  Tags: {}", module.tags.iter().collect::<Vec<_>>().join(", "));
    }
    if let Some(min) = &module.requirements.min_madmin_version {
        println!("  Requires MADMIN >= {}", min);
    }
    if !module.requirements.os.is_empty() {
        println!("  OS: {}", module.requirements.os.join(", "));
    }
    println!(
        "  Version {} · {} stars · {} downloads",
        module.stats.version, module.stats.stars, module.stats.downloads
    );
}
