use eyre::Result;
use madmin_store::{BuildOutcome, BuildReport, Registry};

pub async fn handle_build_command(registry: &Registry, json: bool) -> Result<()> {
    let report = registry.rebuild().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let BuildOutcome::Aborted { reason, .. } = &report.outcome {
        return Err(eyre::eyre!("Build aborted: {}", reason));
    }
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!("🔨 Build cycle {}", report.cycle_id);
    match &report.outcome {
        BuildOutcome::Published {
            sequence,
            fingerprint,
        } => println!("  ✅ Published snapshot {} ({})", sequence, fingerprint),
        BuildOutcome::Unchanged {
            sequence,
            fingerprint,
        } => println!("  ➖ No changes, snapshot {} ({}) stays live", sequence, fingerprint),
        BuildOutcome::Aborted { reason, .. } => println!("  ❌ Aborted: {}", reason),
    }

    println!("  Submissions: {}", report.submissions);
    println!("  Published modules: {}", report.accepted.len());

    if !report.held.is_empty() {
        println!("  ⏸  Held for review: {}", report.held.join(", "));
    }

    if !report.rejected.is_empty() {
        println!("  Rejected:");
        for rejected in &report.rejected {
            println!(
                "    ❌ {} [{}]{}",
                rejected.source,
                rejected.kind,
                rejected
                    .identifier
                    .as_ref()
                    .map(|id| format!(" {}", id))
                    .unwrap_or_default()
            );
            for reason in &rejected.reasons {
                println!("       {}", reason);
            }
        }
    }

    if !report.conflicts.is_empty() {
        println!("  Conflicts:");
        for conflict in &report.conflicts {
            println!("    ⚠️  {} [{}]: {}", conflict.identifier, conflict.kind, conflict.detail);
        }
    }

    for warning in &report.warnings {
        println!("  ⚠️  {}", warning);
    }
}
