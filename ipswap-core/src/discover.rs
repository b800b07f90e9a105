//! Input discovery: enumerate the input directory, derive work items and subtract the
//! resume set.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::contract::WorkItem;
use crate::naming::{output_name, RenameRule};

#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("input directory not found: {0}")]
    MissingDir(PathBuf),
    #[error("listing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("gif"))
        .unwrap_or(false)
}

/// Regular, non-GIF files of `dir`, sorted by path.
pub fn enumerate_inputs(dir: &Path) -> Result<Vec<PathBuf>, DiscoverError> {
    if !dir.is_dir() {
        return Err(DiscoverError::MissingDir(dir.to_path_buf()));
    }
    let io_error = |source: std::io::Error| DiscoverError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(&io_error)? {
        let path = entry.map_err(&io_error)?.path();
        if !path.is_file() {
            debug!(path = %path.display(), "Skipping non-file entry");
            continue;
        }
        if is_gif(&path) {
            debug!(path = %path.display(), "Skipping GIF input");
            continue;
        }
        inputs.push(path);
    }
    inputs.sort();
    Ok(inputs)
}

/// The input the single-image mode picks when none is given.
pub fn first_input(dir: &Path) -> Result<Option<PathBuf>, DiscoverError> {
    Ok(enumerate_inputs(dir)?.into_iter().next())
}

/// Pairs inputs with output paths. An input whose output name is already taken by an
/// earlier input is dropped so that every item owns its output path.
pub fn work_items(
    inputs: Vec<PathBuf>,
    output_dir: &Path,
    rules: &[RenameRule],
) -> Vec<WorkItem> {
    let mut owners: HashMap<String, PathBuf> = HashMap::new();
    let mut items = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = output_name(&input, rules);
        if let Some(owner) = owners.get(&name) {
            warn!(
                input = %input.display(),
                owner = %owner.display(),
                output = %name,
                "Output name already taken by another input, skipping"
            );
            continue;
        }
        owners.insert(name.clone(), input.clone());
        items.push(WorkItem {
            output: output_dir.join(&name),
            input,
        });
    }
    items
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Items this run will process, in sorted input order.
    pub items: Vec<WorkItem>,
    /// Inputs found on disk, before resume and limit.
    pub discovered: usize,
    /// Items skipped because the ledger already holds a success for them.
    pub already_done: usize,
}

/// Everything discovery needs to know to build a plan.
#[derive(Debug, Clone)]
pub struct PlanOptions<'a> {
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub rename: &'a [RenameRule],
    /// 0 means unlimited.
    pub limit: usize,
}

pub fn plan(
    options: &PlanOptions<'_>,
    completed: &HashSet<String>,
) -> Result<BatchPlan, DiscoverError> {
    let items = work_items(
        enumerate_inputs(options.input_dir)?,
        options.output_dir,
        options.rename,
    );
    let discovered = items.len();
    let mut items: Vec<WorkItem> = items
        .into_iter()
        .filter(|item| !completed.contains(&item.input_key()))
        .collect();
    let already_done = discovered - items.len();
    if options.limit > 0 {
        items.truncate(options.limit);
    }
    info!(
        discovered,
        already_done,
        pending = items.len(),
        limit = options.limit,
        "Planned batch"
    );
    Ok(BatchPlan {
        items,
        discovered,
        already_done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn gifs_directories_are_skipped_and_order_is_sorted() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "c.jpg");
        touch(dir.path(), "b.gif");
        touch(dir.path(), "a.png");
        touch(dir.path(), "d.GIF");
        fs::create_dir(dir.path().join("sub.png")).unwrap();

        let inputs = enumerate_inputs(dir.path()).unwrap();
        let names: Vec<_> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "c.jpg"]);
    }

    #[test]
    fn missing_dir_is_reported() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            enumerate_inputs(&missing),
            Err(DiscoverError::MissingDir(_))
        ));
    }

    #[test]
    fn colliding_output_names_keep_the_first_input() {
        let out = Path::new("out");
        let items = work_items(
            vec![
                PathBuf::from("imgs/a.PNG"),
                PathBuf::from("imgs/a.png"),
                PathBuf::from("imgs/a.jpg"),
            ],
            out,
            &[],
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].input, PathBuf::from("imgs/a.PNG"));
        assert_eq!(items[0].output, out.join("a.png"));
        assert_eq!(items[1].output, out.join("a__jpg.png"));
    }

    #[test]
    fn plan_subtracts_completed_then_applies_limit() {
        let dir = tempdir().unwrap();
        for name in ["a.png", "b.jpg", "c.jpg", "d.webp"] {
            touch(dir.path(), name);
        }
        let out = dir.path().join("out");
        let done: HashSet<String> = [dir.path().join("b.jpg").display().to_string()].into();
        let options = PlanOptions {
            input_dir: dir.path(),
            output_dir: &out,
            rename: &[],
            limit: 2,
        };

        let plan = plan(&options, &done).unwrap();
        assert_eq!(plan.discovered, 4);
        assert_eq!(plan.already_done, 1);
        let inputs: Vec<_> = plan.items.iter().map(|i| i.display_name()).collect();
        assert_eq!(inputs, vec!["a.png", "c.jpg"]);
    }
}
