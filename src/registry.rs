// registry.rs - Project enumeration and id allocation under a root
//
// A root directory holds one subdirectory per project. A directory counts
// as a project when it carries a version.json, or (for projects created
// before version metadata existed) a chunks/ directory. Creation resolves
// id collisions by appending _N with the smallest free N >= 1.

use std::fs;
use std::path::Path;

use crate::errors::{EngineError, Result};
use crate::layout::validate_project_id;

/// Names of all projects directly under `root`
pub fn list_all_projects(root: &Path) -> Result<Vec<String>> {
    let mut projects = Vec::new();
    if !root.is_dir() {
        return Ok(projects);
    }

    let entries = fs::read_dir(root).map_err(|e| EngineError::io("read-dir", root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io("read-dir", root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join("version.json").is_file() || path.join("chunks").is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                projects.push(name.to_string());
            }
        }
    }

    projects.sort();
    Ok(projects)
}

/// Resolve `requested` to a free project id under `root`
///
/// Returns the requested id unchanged when its directory does not exist,
/// otherwise `requested_N` for the smallest free N >= 1.
pub(crate) fn allocate_project_id(root: &Path, requested: &str) -> Result<String> {
    validate_project_id(requested)?;

    if !root.join(requested).exists() {
        return Ok(requested.to_string());
    }

    let mut n = 1;
    loop {
        let candidate = format!("{}_{}", requested, n);
        if !root.join(&candidate).exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_free_id_unchanged() {
        let temp = TempDir::new().unwrap();
        assert_eq!(allocate_project_id(temp.path(), "p").unwrap(), "p");
    }

    #[test]
    fn test_allocate_appends_smallest_free_suffix() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("p")).unwrap();
        assert_eq!(allocate_project_id(temp.path(), "p").unwrap(), "p_1");

        fs::create_dir(temp.path().join("p_1")).unwrap();
        fs::create_dir(temp.path().join("p_2")).unwrap();
        assert_eq!(allocate_project_id(temp.path(), "p").unwrap(), "p_3");
    }

    #[test]
    fn test_allocate_reuses_gaps() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("p")).unwrap();
        fs::create_dir(temp.path().join("p_2")).unwrap();
        // p_1 is free, use it even though p_2 exists
        assert_eq!(allocate_project_id(temp.path(), "p").unwrap(), "p_1");
    }

    #[test]
    fn test_list_detects_projects_by_marker() {
        let temp = TempDir::new().unwrap();

        // current-format project
        fs::create_dir_all(temp.path().join("alpha")).unwrap();
        fs::write(temp.path().join("alpha/version.json"), "{}").unwrap();

        // legacy project: chunks/ only
        fs::create_dir_all(temp.path().join("beta/chunks")).unwrap();

        // not a project
        fs::create_dir_all(temp.path().join("random")).unwrap();
        fs::write(temp.path().join("stray.txt"), "x").unwrap();

        let listed = list_all_projects(temp.path()).unwrap();
        assert_eq!(listed, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let listed = list_all_projects(&temp.path().join("nope")).unwrap();
        assert!(listed.is_empty());
    }
}
