use std::path::PathBuf;

use eyre::Result;
use madmin_store::{DirectorySource, SchemaValidator, Submission, SubmissionSource};
use serde::Serialize;

use crate::config::Config;

#[derive(Debug, Serialize)]
struct ValidationResult {
    source: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Validate the given files, or every submission in the modules directory.
pub async fn handle_validate_command(files: Vec<PathBuf>, json: bool, config: &Config) -> Result<()> {
    let submissions = if files.is_empty() {
        DirectorySource::new(&config.registry.modules_dir)
            .fetch_submissions()
            .await?
    } else {
        let mut submissions = Vec::with_capacity(files.len());
        for file in files {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| eyre::eyre!("Failed to read {}: {}", file.display(), e))?;
            submissions.push(Submission::new(file.display().to_string(), bytes));
        }
        submissions
    };

    let validator = SchemaValidator::new(config.registry.validation.clone());
    let results: Vec<ValidationResult> = submissions
        .iter()
        .map(|submission| match validator.validate(&submission.bytes, &submission.source) {
            Ok(manifest) => ValidationResult {
                source: submission.source.clone(),
                valid: true,
                id: Some(manifest.id),
                errors: Vec::new(),
            },
            Err(violation) => ValidationResult {
                source: submission.source.clone(),
                valid: false,
                id: None,
                errors: violation.errors.iter().map(ToString::to_string).collect(),
            },
        })
        .collect();

    let failed = results.iter().filter(|r| !r.valid).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            if result.valid {
                println!("✅ {} ({})", result.source, result.id.as_deref().unwrap_or_default());
            } else {
                println!("❌ {}", result.source);
                for error in &result.errors {
                    println!("    {}", error);
                }
            }
        }
        println!(
            "\n{} checked, {} valid, {} invalid",
            results.len(),
            results.len() - failed,
            failed
        );
    }

    if failed > 0 {
        return Err(eyre::eyre!("{} of {} manifests failed validation", failed, results.len()));
    }
    Ok(())
}
