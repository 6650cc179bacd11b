// Static text resources
//
// Loading never fails: a missing or unreadable instructions file yields empty
// instructions and a log line, and the bot keeps running.

use std::path::Path;

use tracing::{error, info, warn};

/// Load system instructions from `path` as UTF-8 text.
///
/// Returns an empty string when no path is configured, when the file does not
/// exist, or when it cannot be read.
pub async fn load_system_instructions(path: Option<&Path>) -> String {
    let Some(path) = path else {
        info!("System instructions file not set");
        return String::new();
    };

    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        _ => {
            warn!(path = %path.display(), "System instructions file not found");
            return String::new();
        }
    }

    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            info!(path = %path.display(), bytes = text.len(), "Loaded system instructions");
            text
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to load system instructions");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("slackline-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_unset_path_is_empty() {
        assert_eq!(load_system_instructions(None).await, "");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let path = temp_path("does-not-exist.txt");
        assert_eq!(load_system_instructions(Some(&path)).await, "");
    }

    #[tokio::test]
    async fn test_directory_is_empty() {
        let dir = std::env::temp_dir();
        assert_eq!(load_system_instructions(Some(&dir)).await, "");
    }

    #[tokio::test]
    async fn test_reads_file_contents() {
        let path = temp_path("instructions.txt");
        tokio::fs::write(&path, "You are a concise assistant.\n")
            .await
            .unwrap();

        let text = load_system_instructions(Some(&path)).await;
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(text, "You are a concise assistant.\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_empty() {
        let path = temp_path("binary.bin");
        tokio::fs::write(&path, [0xff_u8, 0xfe, 0xfd]).await.unwrap();

        let text = load_system_instructions(Some(&path)).await;
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(text, "");
    }
}
