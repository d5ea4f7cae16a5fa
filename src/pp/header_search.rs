use std::path::{Path, PathBuf};

/// Manages header search paths and include resolution
#[derive(Clone, Debug, Default)]
pub(crate) struct HeaderSearch {
    /// `-I` directories, searched for both quoted and angled includes
    pub(crate) angled_paths: Vec<PathBuf>,
    /// `-internal-isystem` directories, searched last
    pub(crate) system_paths: Vec<PathBuf>,
}

/// Where a header was found; `#include_next` resumes after `index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FoundHeader {
    pub(crate) path: PathBuf,
    /// Index into the combined search list, `None` for the includer's directory
    pub(crate) index: Option<usize>,
}

impl HeaderSearch {
    pub(crate) fn new(angled_paths: Vec<PathBuf>, system_paths: Vec<PathBuf>) -> Self {
        HeaderSearch {
            angled_paths,
            system_paths,
        }
    }

    fn search_list(&self) -> impl Iterator<Item = &PathBuf> {
        self.angled_paths.iter().chain(self.system_paths.iter())
    }

    /// Resolve an include. Quoted includes try the includer's directory first.
    pub(crate) fn resolve_path(&self, include_path: &str, is_angled: bool, current_dir: &Path) -> Option<FoundHeader> {
        if Path::new(include_path).is_absolute() {
            let path = PathBuf::from(include_path);
            return path.is_file().then_some(FoundHeader { path, index: None });
        }
        if !is_angled {
            let candidate = current_dir.join(include_path);
            if candidate.is_file() {
                return Some(FoundHeader {
                    path: candidate,
                    index: None,
                });
            }
        }
        self.check_paths(include_path, 0)
    }

    /// Resolve for `#include_next`: continue after the directory the current header came from.
    pub(crate) fn resolve_next_path(&self, include_path: &str, found_in: Option<usize>) -> Option<FoundHeader> {
        let start = found_in.map_or(0, |i| i + 1);
        self.check_paths(include_path, start)
    }

    fn check_paths(&self, include_path: &str, start: usize) -> Option<FoundHeader> {
        self.search_list()
            .enumerate()
            .skip(start)
            .map(|(index, dir)| (index, dir.join(include_path)))
            .find(|(_, candidate)| candidate.is_file())
            .map(|(index, path)| FoundHeader {
                path,
                index: Some(index),
            })
    }

    /// Does the header live in a system directory?
    pub(crate) fn is_system_header(&self, found_in: Option<usize>) -> bool {
        found_in.is_some_and(|i| i >= self.angled_paths.len())
    }
}
