use std::fmt::Write;

/// Prompt template loaded from inference/assets/risk_assessment.md
const RISK_PROMPT: &str = include_str!("../assets/risk_assessment.md");

const NO_FILES: &str = "- (no files listed)";

/// Fill the few-shot template with the change under review.
pub(crate) fn build_prompt(changed_files: &[String], commit_message: &str) -> String {
    let mut files = String::new();
    for path in changed_files {
        let _ = writeln!(files, "- {}", path.trim());
    }
    let files = if files.is_empty() {
        NO_FILES.to_string()
    } else {
        files.trim_end().to_string()
    };

    let commit_message = commit_message.trim();
    let commit_message = if commit_message.is_empty() {
        "(empty)"
    } else {
        commit_message
    };

    // Commit message last so braces in it are never mistaken for the file slot.
    RISK_PROMPT
        .replace("{files}", &files)
        .replace("{commit_message}", commit_message)
}
