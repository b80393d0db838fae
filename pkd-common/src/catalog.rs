// pkd-common/src/catalog.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::parse_descriptor;
use crate::error::{PkdError, Result};
use crate::model::Descriptor;

const DESCRIPTOR_EXTENSION: &str = "rb";

/// Descriptors keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, Arc<Descriptor>>,
    sources: BTreeMap<String, PathBuf>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.rb` file in `dir`. Any parse error aborts the load.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        debug!("Loading catalog from {}", dir.display());
        let read_dir = fs::read_dir(dir).map_err(|e| {
            PkdError::IoError(format!("Failed to read catalog {}: {}", dir.display(), e))
        })?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(DESCRIPTOR_EXTENSION)
            {
                paths.push(path);
            } else {
                debug!("Skipping non-descriptor entry {}", path.display());
            }
        }
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            let text = fs::read_to_string(&path)?;
            let descriptor = parse_descriptor(&text).inspect_err(|e| {
                warn!("Failed to load {}: {}", path.display(), e);
            })?;
            catalog.insert_from(descriptor, Some(path))?;
        }
        debug!("Catalog loaded with {} descriptors", catalog.len());
        Ok(catalog)
    }

    /// Adds a descriptor; a second descriptor with the same identifier is a
    /// `DuplicateField` error.
    pub fn insert(&mut self, descriptor: Descriptor) -> Result<()> {
        self.insert_from(descriptor, None)
    }

    fn insert_from(&mut self, descriptor: Descriptor, source: Option<PathBuf>) -> Result<()> {
        if self.entries.contains_key(&descriptor.token) {
            let field = match self.sources.get(&descriptor.token) {
                Some(first) => format!("identifier (first defined in {})", first.display()),
                None => "identifier".to_string(),
            };
            return Err(PkdError::DuplicateField {
                token: descriptor.token,
                field,
                line: 1,
                first_line: 1,
            });
        }
        if let Some(source) = source {
            self.sources.insert(descriptor.token.clone(), source);
        }
        self.entries
            .insert(descriptor.token.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, token: &str) -> Result<Arc<Descriptor>> {
        self.entries
            .get(token)
            .cloned()
            .ok_or_else(|| PkdError::NotInCatalog(token.to_string()))
    }

    pub fn source_path(&self, token: &str) -> Option<&Path> {
        self.sources.get(token).map(PathBuf::as_path)
    }

    /// Descriptors in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
