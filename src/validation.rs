use std::path::Path;

use walkdir::WalkDir;

use crate::error::{AppError, Result};

/// Instance names are restricted to ASCII letters, digits and underscore.
pub fn validate_instance_name(name: &str) -> Result<String> {
    let name = name.trim();
    let is_safe = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !is_safe {
        return Err(AppError::invalid_name(name));
    }

    Ok(name.to_string())
}

/// Names of the directories directly under `apps_path`.
pub fn existing_instance_dirs(apps_path: &Path) -> Result<Vec<String>> {
    if !apps_path.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(apps_path).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_word_characters() {
        assert_eq!(validate_instance_name(" bla_2 ").unwrap(), "bla_2");
        assert_eq!(validate_instance_name("Blackfoot").unwrap(), "Blackfoot");
    }

    #[test]
    fn rejects_everything_else() {
        for bad in ["", "bla-old", "bla old", "../etc", "blä", "a;rm"] {
            let err = validate_instance_name(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidName, "{bad:?}");
        }
    }

    #[test]
    fn lists_only_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("blaold")).unwrap();
        std::fs::create_dir(dir.path().join("log")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("blaold").join("log")).unwrap();

        assert_eq!(
            existing_instance_dirs(dir.path()).unwrap(),
            vec!["blaold".to_string(), "log".to_string()]
        );
        assert!(existing_instance_dirs(&dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }
}
