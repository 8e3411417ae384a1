//! Declarative mapping manifests.
//!
//! A manifest lists link rules in TOML or JSON:
//!
//! ```toml
//! [[link]]
//! source = "/mods/a"
//! target = "/game/data"
//! kind = "directory"
//! monitor = true
//!
//! [[link]]
//! source = "/mods/b/textures/foo.dds"
//! target = "/game/data/textures/foo.dds"
//! kind = "file"
//! ```
//!
//! Directory links are applied before file links, so file links always
//! override children generated by a recursive directory link.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CoreError, CoreResult, LinkFlags, LinkKind, LinkRule, MappingTable};

/// A parsed mapping manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingManifest {
    /// Link entries in declaration order.
    #[serde(default, rename = "link")]
    pub links: Vec<LinkEntry>,
}

/// One `[[link]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkEntry {
    /// Real path on disk.
    pub source: PathBuf,
    /// Virtual path.
    pub target: PathBuf,
    /// File or directory.
    pub kind: LinkKind,
    /// Walk the source subtree. Defaults to `true` for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    /// Regenerate children when the source changes.
    #[serde(default)]
    pub monitor: bool,
    /// Redirect newly created files into `source`.
    #[serde(default)]
    pub create_target: bool,
    /// Fail if `target` already exists on disk.
    #[serde(default)]
    pub fail_if_exists: bool,
}

impl LinkEntry {
    /// Flags this entry stands for.
    #[must_use]
    pub fn flags(&self) -> LinkFlags {
        let mut flags = LinkFlags::empty();
        let recursive = self
            .recursive
            .unwrap_or(self.kind == LinkKind::Directory);
        flags.set(LinkFlags::RECURSIVE, recursive);
        flags.set(LinkFlags::MONITOR_CHANGES, self.monitor);
        flags.set(LinkFlags::CREATE_TARGET, self.create_target);
        flags.set(LinkFlags::FAIL_IF_EXISTS, self.fail_if_exists);
        flags
    }

    /// Validated rule for this entry.
    ///
    /// # Errors
    ///
    /// See [`LinkRule::new`].
    pub fn to_rule(&self) -> CoreResult<LinkRule> {
        LinkRule::new(&self.source, &self.target, self.kind, self.flags())
    }
}

impl MappingManifest {
    /// Parse a TOML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Manifest`] on malformed input.
    pub fn from_toml(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|e| CoreError::Manifest(e.to_string()))
    }

    /// Parse a JSON manifest.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Manifest`] on malformed input.
    pub fn from_json(content: &str) -> CoreResult<Self> {
        serde_json::from_str(content).map_err(|e| CoreError::Manifest(e.to_string()))
    }

    /// Load a manifest file; `.json` files are parsed as JSON, anything else
    /// as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] if the file cannot be read, or
    /// [`CoreError::Manifest`] if it cannot be parsed.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// Every entry as a validated rule, directories first.
    ///
    /// # Errors
    ///
    /// Returns the first rule validation error.
    pub fn rules(&self) -> CoreResult<Vec<LinkRule>> {
        let directories = self
            .links
            .iter()
            .filter(|entry| entry.kind == LinkKind::Directory);
        let files = self
            .links
            .iter()
            .filter(|entry| entry.kind == LinkKind::File);

        directories.chain(files).map(LinkEntry::to_rule).collect()
    }

    /// Link every entry into a fresh table.
    ///
    /// # Errors
    ///
    /// Returns the first validation or link error; no partially built table
    /// is returned.
    pub fn build(&self) -> CoreResult<MappingTable> {
        let mut table = MappingTable::new();
        for rule in self.rules()? {
            table.link(rule)?;
        }
        debug!(rules = table.rules().len(), entries = table.len(), "Built mapping table from manifest");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn manifest_for(root: &Path) -> String {
        let p = |s: &str| root.join(s).display().to_string().replace('\\', "\\\\");
        format!(
            r#"
[[link]]
source = "{file_src}"
target = "{file_dst}"
kind = "file"

[[link]]
source = "{dir_src}"
target = "{dir_dst}"
kind = "directory"
monitor = true
"#,
            file_src = p("modB/foo.dds"),
            file_dst = p("data/foo.dds"),
            dir_src = p("modA"),
            dir_dst = p("data"),
        )
    }

    #[test]
    fn test_directories_default_to_recursive() {
        let entry = LinkEntry {
            source: PathBuf::from("/a"),
            target: PathBuf::from("/b"),
            kind: LinkKind::Directory,
            recursive: None,
            monitor: false,
            create_target: false,
            fail_if_exists: false,
        };
        assert_eq!(entry.flags(), LinkFlags::RECURSIVE);

        let file = LinkEntry {
            kind: LinkKind::File,
            ..entry.clone()
        };
        assert_eq!(file.flags(), LinkFlags::empty());

        let shallow = LinkEntry {
            recursive: Some(false),
            ..entry
        };
        assert_eq!(shallow.flags(), LinkFlags::empty());
    }

    #[test]
    fn test_file_links_override_directory_children_regardless_of_order() {
        let tmp = TempDir::new().unwrap();
        for f in ["modA/foo.dds", "modA/bar.dds", "modB/foo.dds"] {
            let path = tmp.path().join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"x").unwrap();
        }

        let manifest = MappingManifest::from_toml(&manifest_for(tmp.path())).unwrap();
        assert_eq!(manifest.links.len(), 2);

        let rules = manifest.rules().unwrap();
        assert_eq!(rules[0].kind(), LinkKind::Directory);
        assert!(rules[0].is_monitored());

        let table = manifest.build().unwrap();
        let data = tmp.path().join("data");
        assert_eq!(
            table.resolve(&data.join("foo.dds")),
            Some(tmp.path().join("modB/foo.dds"))
        );
        assert_eq!(
            table.resolve(&data.join("bar.dds")),
            Some(tmp.path().join("modA/bar.dds"))
        );
    }

    #[test]
    fn test_json_and_file_loading() {
        let tmp = TempDir::new().unwrap();
        let manifest = MappingManifest {
            links: vec![LinkEntry {
                source: tmp.path().join("real.txt"),
                target: tmp.path().join("virt.txt"),
                kind: LinkKind::File,
                recursive: None,
                monitor: false,
                create_target: false,
                fail_if_exists: true,
            }],
        };

        let path = tmp.path().join("mapping.json");
        fs::write(&path, serde_json::to_string(&manifest).unwrap()).unwrap();
        assert_eq!(MappingManifest::load(&path).unwrap(), manifest);

        let path = tmp.path().join("mapping.toml");
        fs::write(&path, toml::to_string(&manifest).unwrap()).unwrap();
        assert_eq!(MappingManifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn test_malformed_manifests_rejected() {
        assert!(matches!(
            MappingManifest::from_toml("[[link]]\nsource = 1"),
            Err(CoreError::Manifest(_))
        ));
        assert!(matches!(
            MappingManifest::from_toml("[[link]]\nsource = \"/a\"\ntarget = \"/b\"\nkind = \"file\"\nbogus = true"),
            Err(CoreError::Manifest(_))
        ));
        assert!(MappingManifest::from_toml("").unwrap().links.is_empty());
    }
}
