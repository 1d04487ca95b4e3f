use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::error::ClassifierError;

/// Ordered class names, index-aligned with the model output vector.
///
/// Loaded once at startup from a plain-text file (one label per line, blank
/// lines ignored) and shared read-only for the process lifetime.
#[derive(Debug, Clone)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read labels file {}", path.display()))?;
        let labels: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        anyhow::ensure!(!labels.is_empty(), "labels file {} is empty", path.display());
        Ok(Self(labels))
    }

    pub fn from_vec(labels: Vec<String>) -> Self {
        Self(labels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }

    /// Startup invariant: vocabulary length equals model output dimensionality.
    pub fn ensure_matches(&self, output_classes: usize) -> Result<(), ClassifierError> {
        if self.0.len() != output_classes {
            return Err(ClassifierError::Startup(format!(
                "label vocabulary has {} entries but the model emits {} classes",
                self.0.len(),
                output_classes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_one_label_per_line() {
        let dir = std::env::temp_dir();
        let path = dir.join("fruit-classifier-labels-test.txt");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "apple\nbanana\n\n  cherry  \n").unwrap();

        let labels = Labels::from_file(&path).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("apple"));
        assert_eq!(labels.get(2), Some("cherry"));
        assert_eq!(labels.get(3), None);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Labels::from_file("/nonexistent/labels.txt").is_err());
    }

    #[test]
    fn vocabulary_length_is_enforced() {
        let labels = Labels::from_vec(vec!["apple".into(), "banana".into()]);
        assert!(labels.ensure_matches(2).is_ok());
        assert!(matches!(
            labels.ensure_matches(10),
            Err(ClassifierError::Startup(_))
        ));
    }
}
