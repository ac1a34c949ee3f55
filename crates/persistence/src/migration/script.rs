//! Raw SQL migration scripts.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{StorageResult, ValidationError};

/// A migration script applied verbatim to each tenant namespace.
///
/// Scripts contain unqualified statements; the fan-out binds each target
/// namespace before running them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    name: String,
    sql: String,
    path: Option<PathBuf>,
}

impl MigrationScript {
    /// Creates a script from inline SQL.
    ///
    /// Fails with [`ValidationError::EmptyScript`] when `sql` holds nothing
    /// but whitespace.
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Result<Self, ValidationError> {
        let script = Self {
            name: name.into(),
            sql: sql.into(),
            path: None,
        };
        script.validate()?;
        Ok(script)
    }

    /// Loads a script by reference.
    ///
    /// An absolute `reference` is read as is. Anything else is looked up in
    /// `scripts_dir`, first under the given name and then with a `.sql`
    /// extension appended.
    pub async fn load(reference: &str, scripts_dir: &Path) -> StorageResult<Self> {
        let candidates = candidate_paths(reference, scripts_dir);

        for candidate in &candidates {
            match tokio::fs::read_to_string(candidate).await {
                Ok(sql) => {
                    let name = candidate
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| reference.to_string());
                    tracing::debug!(script = %name, path = %candidate.display(), "Loaded migration script");
                    let mut script = Self::new(name, sql)?;
                    script.path = Some(candidate.clone());
                    return Ok(script);
                }
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ValidationError::ScriptUnreadable {
                        path: candidate.clone(),
                        source: e,
                    }
                    .into());
                }
            }
        }

        Err(ValidationError::ScriptNotFound {
            path: candidates
                .into_iter()
                .next()
                .unwrap_or_else(|| PathBuf::from(reference)),
        }
        .into())
    }

    /// Rejects scripts with no statements.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sql.trim().is_empty() {
            return Err(ValidationError::EmptyScript {
                script: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Script name, used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The file the script was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn candidate_paths(reference: &str, scripts_dir: &Path) -> Vec<PathBuf> {
    let path = Path::new(reference);
    if path.is_absolute() {
        return vec![path.to_path_buf()];
    }

    let mut candidates = vec![scripts_dir.join(path)];
    if path.extension().is_none() {
        candidates.push(scripts_dir.join(format!("{}.sql", reference)));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StorageError};

    #[test]
    fn test_blank_script_is_rejected() {
        let err = MigrationScript::new("noop", " \n\t ").unwrap_err();
        assert!(matches!(err, ValidationError::EmptyScript { ref script } if script == "noop"));
    }

    #[tokio::test]
    async fn test_load_appends_sql_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("add_column.sql"), "ALTER TABLE shifts ADD COLUMN note TEXT;").unwrap();

        let script = MigrationScript::load("add_column", dir.path()).await.unwrap();
        assert_eq!(script.name(), "add_column.sql");
        assert_eq!(script.path(), Some(dir.path().join("add_column.sql").as_path()));
        assert!(script.sql().starts_with("ALTER TABLE"));
    }

    #[tokio::test]
    async fn test_load_absolute_path_ignores_scripts_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.sql");
        std::fs::write(&path, "INSERT INTO roles VALUES ('admin');").unwrap();

        let script = MigrationScript::load(path.to_str().unwrap(), Path::new("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(script.name(), "seed.sql");
    }

    #[tokio::test]
    async fn test_load_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let err = MigrationScript::load("missing", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::ScriptNotFound { ref path }) if path == &dir.path().join("missing")
        ));
    }

    #[tokio::test]
    async fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.sql"), "\n").unwrap();
        let err = MigrationScript::load("empty.sql", dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::EmptyScript { .. })
        ));
    }
}
