//! Durable identity → templates store.
//!
//! The whole store is one JSON document. It is loaded wholesale at startup
//! and rewritten wholesale (temp file + atomic rename) on every enrollment,
//! so a reader never sees a half-written store.

use crate::template::Template;
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no template store at {0}")]
    NotFound(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt template store {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
    #[error("failed to serialize template store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("external id '{0}' is already enrolled")]
    DuplicateExternalId(String),
    #[error("an identity needs at least one template")]
    NoTemplates,
}

/// One identity together with the templates it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    #[serde(flatten)]
    pub identity: Identity,
    pub templates: Vec<Template>,
}

/// In-memory contents of the store.
///
/// Keyed by identity index; iteration is ascending index, then template
/// insertion order. Matching relies on that order for tie-breaking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateSet {
    identities: BTreeMap<u32, EnrolledIdentity>,
    next_index: u32,
}

/// On-disk layout.
#[derive(Serialize, Deserialize)]
struct StoreRecord {
    version: u32,
    next_index: u32,
    identities: Vec<EnrolledIdentity>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// At least one identity with at least one template.
    pub fn is_trained(&self) -> bool {
        self.identities.values().any(|e| !e.templates.is_empty())
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn template_count(&self) -> usize {
        self.identities.values().map(|e| e.templates.len()).sum()
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn identity(&self, index: u32) -> Option<&Identity> {
        self.identities.get(&index).map(|e| &e.identity)
    }

    pub fn enrolled(&self, index: u32) -> Option<&EnrolledIdentity> {
        self.identities.get(&index)
    }

    pub fn identities(&self) -> impl Iterator<Item = &EnrolledIdentity> {
        self.identities.values()
    }

    pub fn contains_external_id(&self, external_id: &str) -> bool {
        self.identities
            .values()
            .any(|e| e.identity.external_id == external_id)
    }

    /// Every template with the index of its owner, in stable order.
    pub fn templates(&self) -> impl Iterator<Item = (u32, &Template)> {
        self.identities
            .iter()
            .flat_map(|(&index, e)| e.templates.iter().map(move |t| (index, t)))
    }

    /// Register a new identity under the next free index.
    pub fn insert(
        &mut self,
        display_name: &str,
        external_id: &str,
        templates: Vec<Template>,
    ) -> Result<Identity, StoreError> {
        if templates.is_empty() {
            return Err(StoreError::NoTemplates);
        }
        if self.contains_external_id(external_id) {
            return Err(StoreError::DuplicateExternalId(external_id.to_string()));
        }
        let identity = Identity {
            index: self.next_index,
            display_name: display_name.to_string(),
            external_id: external_id.to_string(),
        };
        self.identities.insert(
            identity.index,
            EnrolledIdentity {
                identity: identity.clone(),
                templates,
            },
        );
        self.next_index += 1;
        Ok(identity)
    }

    /// Undo an `insert` whose persist failed.
    fn rollback(&mut self, identity: &Identity) {
        self.identities.remove(&identity.index);
        self.next_index = identity.index;
    }

    fn to_record(&self) -> StoreRecord {
        StoreRecord {
            version: STORE_VERSION,
            next_index: self.next_index,
            identities: self.identities.values().cloned().collect(),
        }
    }

    fn from_record(record: StoreRecord) -> Result<Self, String> {
        if record.version != STORE_VERSION {
            return Err(format!(
                "unsupported version {} (expected {STORE_VERSION})",
                record.version
            ));
        }

        let mut identities = BTreeMap::new();
        let mut external_ids = HashSet::new();
        for entry in record.identities {
            let index = entry.identity.index;
            if index >= record.next_index {
                return Err(format!(
                    "identity index {index} is not below next_index {}",
                    record.next_index
                ));
            }
            if entry.templates.is_empty() {
                return Err(format!("identity {index} has no templates"));
            }
            if !external_ids.insert(entry.identity.external_id.clone()) {
                return Err(format!(
                    "external id '{}' appears twice",
                    entry.identity.external_id
                ));
            }
            if identities.insert(index, entry).is_some() {
                return Err(format!("identity index {index} appears twice"));
            }
        }

        Ok(Self {
            identities,
            next_index: record.next_index,
        })
    }
}

/// The template set bound to its backing file.
pub struct TemplateStore {
    path: PathBuf,
    set: TemplateSet,
}

impl TemplateStore {
    /// Load the store at `path`, falling back to an empty one.
    ///
    /// A missing file is the normal first-run case. A corrupt file is moved
    /// aside to `<name>.corrupt` so the next persist cannot overwrite it; a
    /// file that cannot be read is left where it is.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let set = match Self::load(&path) {
            Ok(set) => {
                tracing::info!(
                    path = %path.display(),
                    identities = set.identity_count(),
                    templates = set.template_count(),
                    "template store loaded"
                );
                set
            }
            Err(StoreError::NotFound(_)) => {
                tracing::info!(path = %path.display(), "no enrolled users found, starting empty");
                TemplateSet::new()
            }
            Err(err @ StoreError::Corrupt { .. }) => {
                tracing::warn!(error = %err, "template store corrupt, starting empty");
                quarantine(&path);
                TemplateSet::new()
            }
            Err(err) => {
                tracing::warn!(error = %err, "template store unreadable, starting empty");
                TemplateSet::new()
            }
        };
        Self { path, set }
    }

    /// An empty store that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            set: TemplateSet::new(),
        }
    }

    pub fn load(path: &Path) -> Result<TemplateSet, StoreError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let corrupt = |detail: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            detail,
        };
        let record: StoreRecord =
            serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
        TemplateSet::from_record(record).map_err(corrupt)
    }

    /// Write the complete set to `path` via a temp file in the same
    /// directory and an atomic rename.
    pub fn persist(path: &Path, set: &TemplateSet) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let bytes = serde_json::to_vec(&set.to_record())?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        tmp.as_file_mut().write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        tracing::debug!(
            path = %path.display(),
            bytes = bytes.len(),
            identities = set.identity_count(),
            "template store persisted"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self) -> &TemplateSet {
        &self.set
    }

    /// Add an identity and persist. If the write fails the in-memory set is
    /// rolled back, so memory and disk never diverge.
    pub fn commit_identity(
        &mut self,
        display_name: &str,
        external_id: &str,
        templates: Vec<Template>,
    ) -> Result<Identity, StoreError> {
        let identity = self.set.insert(display_name, external_id, templates)?;
        if let Err(err) = Self::persist(&self.path, &self.set) {
            self.set.rollback(&identity);
            return Err(err);
        }
        Ok(identity)
    }
}

fn quarantine(path: &Path) {
    let Some(name) = path.file_name() else {
        return;
    };
    let mut aside = name.to_os_string();
    aside.push(".corrupt");
    let target = path.with_file_name(aside);
    match fs::rename(path, &target) {
        Ok(()) => tracing::warn!(moved_to = %target.display(), "corrupt template store set aside"),
        Err(e) => tracing::warn!(error = %e, "could not set corrupt template store aside"),
    }
}
