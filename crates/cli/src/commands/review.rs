use eyre::Result;
use madmin_store::{Registry, ReviewAction};
use madmin_types::VerificationStatus;

use crate::config::Config;

pub struct ReviewArgs {
    pub id: String,
    pub status: VerificationStatus,
    pub reviewer: Option<String>,
    pub note: String,
    pub expected_revision: Option<u64>,
}

pub async fn handle_review_command(
    args: ReviewArgs,
    registry: &Registry,
    config: &Config,
) -> Result<()> {
    let reviewer = args
        .reviewer
        .or_else(|| config.reviewer.clone())
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| {
            eyre::eyre!("No reviewer given. Pass --reviewer or run: madmin-registry config set reviewer <name>")
        })?;

    let record = registry
        .review(ReviewAction {
            identifier: args.id,
            reviewer,
            target: args.status,
            note: args.note,
            expected_revision: args.expected_revision,
        })
        .await?;

    println!(
        "✅ {} is now {} (revision {})",
        record.identifier, record.status, record.revision
    );
    if record.status == VerificationStatus::Verified || record.status == VerificationStatus::Rejected {
        println!("💡 Run `madmin-registry build` to publish the change");
    }
    Ok(())
}
