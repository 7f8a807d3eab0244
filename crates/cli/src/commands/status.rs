use std::collections::BTreeMap;

use eyre::Result;
use madmin_store::Registry;

/// Show the live snapshot and a verification summary
pub async fn handle_status_command(registry: &Registry) -> Result<()> {
    let snapshot = registry.distribution().snapshot();
    println!("📊 Registry Status:");
    if snapshot.sequence() == 0 {
        println!("  No snapshot published yet");
        println!("💡 Run `madmin-registry build` to publish the first snapshot");
    } else {
        println!("  Snapshot: {}", snapshot.sequence());
        println!("  Fingerprint: {}", snapshot.fingerprint());
        println!("  Built: {}", snapshot.built_at().format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  Modules: {}", snapshot.len());
        for (category, count) in snapshot.categories() {
            println!("    {}: {}", category, count);
        }
    }

    let retained = registry.distribution().retained_sequences();
    println!(
        "  Diffable from: {}",
        retained
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let ledger = registry.verification().refresh().await?;
    let mut by_status = BTreeMap::new();
    for record in ledger.records() {
        *by_status.entry(record.status.as_str()).or_insert(0usize) += 1;
    }
    println!("  Verification records: {}", ledger.len());
    for (status, count) in by_status {
        println!("    {}: {}", status, count);
    }

    if let Some(state) = registry.state() {
        println!("  State directory: {}", state.root().display());
    }
    Ok(())
}
