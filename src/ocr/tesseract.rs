//! Tesseract CLI backend

use async_trait::async_trait;
use tokio::process::Command;

use super::{split_spine_lines, OcrError, SpineOcr, SpineText};

/// Shells out to a locally installed `tesseract` binary.
pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }
}

#[async_trait]
impl SpineOcr for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn extract(&self, image_data: &[u8]) -> Result<SpineText, OcrError> {
        let temp_dir = std::env::temp_dir();
        let input_path = temp_dir.join(format!("spine_input_{}.png", uuid::Uuid::new_v4()));
        let output_base = temp_dir.join(format!("spine_output_{}", uuid::Uuid::new_v4()));

        tokio::fs::write(&input_path, image_data)
            .await
            .map_err(|e| OcrError::ProcessingError(format!("Failed to write temp file: {}", e)))?;

        let output = Command::new("tesseract")
            .arg(&input_path)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg("3")
            .output()
            .await
            .map_err(|e| OcrError::ProcessingError(format!("Failed to run tesseract: {}", e)));

        let _ = tokio::fs::remove_file(&input_path).await;
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ProcessingError(format!(
                "Tesseract failed: {}",
                stderr
            )));
        }

        let output_file = format!("{}.txt", output_base.display());
        let text = tokio::fs::read_to_string(&output_file)
            .await
            .map_err(|e| OcrError::ProcessingError(format!("Failed to read output: {}", e)))?;
        let _ = tokio::fs::remove_file(&output_file).await;

        let text = text.trim().to_string();
        let (title, author) = split_spine_lines(&text);

        Ok(SpineText { text, title, author })
    }
}
