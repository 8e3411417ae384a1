//! The mapping table: ordered link rules plus their expanded entries.
//!
//! Every rule expands at link time into one or more [`MappedEntry`] values:
//! the rule's own target, plus (for recursive directory rules) one entry per
//! descendant of the source. Lookups go through an index keyed by
//! [`VirtualKey`] that always points at the effective entry for a path.
//!
//! # Precedence
//!
//! ```text
//! explicit rule  vs explicit rule   → later rule wins
//! generated child vs generated child → later rule wins
//! generated child vs explicit rule  → explicit rule wins
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::path::{VirtualKey, is_within, normalize};
use crate::{CoreError, CoreResult, LinkFlags, LinkKind, LinkRule};

/// One effective virtual → real mapping produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedEntry {
    virtual_path: PathBuf,
    real_path: PathBuf,
    kind: LinkKind,
    flags: LinkFlags,
    explicit: bool,
}

impl MappedEntry {
    /// Virtual path seen by intercepted processes.
    #[must_use]
    pub fn virtual_path(&self) -> &Path {
        &self.virtual_path
    }

    /// Real path the virtual path redirects to.
    #[must_use]
    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    /// File or directory.
    #[must_use]
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Flags inherited from the originating rule.
    #[must_use]
    pub fn flags(&self) -> LinkFlags {
        self.flags
    }

    /// `true` for the rule's own target, `false` for generated children.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }
}

/// Position of an entry: (rule index, entry index within its expansion).
type Slot = (usize, usize);

/// Ordered collection of link rules with conflict-resolved lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "TableRepr", into = "TableRepr")]
pub struct MappingTable {
    rules: Vec<LinkRule>,
    expansions: Vec<Vec<MappedEntry>>,
    index: HashMap<VirtualKey, Slot>,
}

#[derive(Clone, Serialize, Deserialize)]
struct TableRepr {
    rules: Vec<LinkRule>,
    expansions: Vec<Vec<MappedEntry>>,
}

impl From<TableRepr> for MappingTable {
    fn from(repr: TableRepr) -> Self {
        let TableRepr {
            mut rules,
            mut expansions,
        } = repr;
        let len = rules.len().min(expansions.len());
        rules.truncate(len);
        expansions.truncate(len);

        let mut table = Self {
            rules,
            expansions,
            index: HashMap::new(),
        };
        table.rebuild_index();
        table
    }
}

impl From<MappingTable> for TableRepr {
    fn from(table: MappingTable) -> Self {
        Self {
            rules: table.rules,
            expansions: table.expansions,
        }
    }
}

impl PartialEq for MappingTable {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules && self.expansions == other.expansions
    }
}

impl Eq for MappingTable {}

impl MappingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, expanding it immediately.
    ///
    /// On failure the table is left exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`CoreError::RuleConflict`] if `FAIL_IF_EXISTS` is set and the
    ///   target exists on disk.
    /// - [`CoreError::Io`] if a recursive source cannot be walked or a
    ///   `CREATE_TARGET` directory cannot be created.
    pub fn link(&mut self, rule: LinkRule) -> CoreResult<()> {
        if rule.flags().contains(LinkFlags::FAIL_IF_EXISTS) && path_exists(rule.target())? {
            return Err(CoreError::RuleConflict {
                target: rule.target().to_path_buf(),
            });
        }

        let expansion = expand(&rule)?;

        if rule.kind() == LinkKind::Directory
            && rule.flags().contains(LinkFlags::CREATE_TARGET)
            && !path_exists(rule.target())?
        {
            std::fs::create_dir_all(rule.target()).map_err(|e| CoreError::Io {
                path: rule.target().to_path_buf(),
                source: e,
            })?;
            debug!(target = %rule.target().display(), "Created link target directory");
        }

        debug!(rule = %rule, entries = expansion.len(), "Linked rule");

        let idx = self.rules.len();
        self.rules.push(rule);
        self.expansions.push(expansion);
        self.apply_expansion(idx);
        Ok(())
    }

    /// Resolve a virtual path to its real path.
    ///
    /// Tries an exact match first, then the longest directory entry that is
    /// an ancestor of `path`. Returns `None` when no rule covers the path;
    /// callers then use the real filesystem unmodified.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let normalized = normalize(path).ok()?;
        let components: Vec<Component<'_>> = normalized.components().collect();

        if let Some(entry) = self.entry_at(&components) {
            return Some(entry.real_path.clone());
        }

        self.ancestor_match(&components, |entry| entry.kind == LinkKind::Directory)
    }

    /// Where a file newly created at `path` should be placed.
    ///
    /// The inner-most directory entry carrying `CREATE_TARGET` that covers
    /// `path` decides.
    #[must_use]
    pub fn create_target(&self, path: &Path) -> Option<PathBuf> {
        let normalized = normalize(path).ok()?;
        let components: Vec<Component<'_>> = normalized.components().collect();
        let redirects = |entry: &MappedEntry| {
            entry.kind == LinkKind::Directory && entry.flags.contains(LinkFlags::CREATE_TARGET)
        };

        if let Some(entry) = self.entry_at(&components)
            && redirects(entry)
        {
            return Some(entry.real_path.clone());
        }

        self.ancestor_match(&components, redirects)
    }

    /// The effective entry for an exact virtual path, if any.
    #[must_use]
    pub fn entry(&self, path: &Path) -> Option<&MappedEntry> {
        let normalized = normalize(path).ok()?;
        let components: Vec<Component<'_>> = normalized.components().collect();
        self.entry_at(&components)
    }

    /// Remove every rule.
    pub fn clear(&mut self) {
        self.rules.clear();
        self.expansions.clear();
        self.index.clear();
    }

    /// Re-expand monitored rules whose source contains `changed`.
    ///
    /// Returns the number of rules that were regenerated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] if a source subtree cannot be walked.
    pub fn refresh_source(&mut self, changed: &Path) -> CoreResult<usize> {
        let mut refreshed = 0usize;

        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule.is_monitored() || !is_within(changed, rule.source()) {
                continue;
            }

            let expansion = match expand(rule) {
                Ok(expansion) => expansion,
                Err(CoreError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    vec![root_entry(rule)]
                },
                Err(e) => return Err(e),
            };

            if let Some(slot) = self.expansions.get_mut(idx) {
                *slot = expansion;
                refreshed = refreshed.saturating_add(1);
            }
        }

        if refreshed > 0 {
            self.rebuild_index();
        }
        Ok(refreshed)
    }

    /// Rules in priority order (later wins).
    #[must_use]
    pub fn rules(&self) -> &[LinkRule] {
        &self.rules
    }

    /// Sources of rules that need a change watcher.
    pub fn monitored_sources(&self) -> impl Iterator<Item = &Path> {
        self.rules
            .iter()
            .filter(|rule| rule.is_monitored())
            .map(LinkRule::source)
    }

    /// Effective entries, sorted by virtual key.
    #[must_use]
    pub fn entries(&self) -> Vec<&MappedEntry> {
        let mut slots: Vec<(&VirtualKey, &Slot)> = self.index.iter().collect();
        slots.sort_by(|a, b| a.0.cmp(b.0));
        slots
            .into_iter()
            .filter_map(|(_, slot)| self.slot_entry(*slot))
            .collect()
    }

    /// Number of effective entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the table holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn slot_entry(&self, (rule, entry): Slot) -> Option<&MappedEntry> {
        self.expansions.get(rule)?.get(entry)
    }

    fn entry_at(&self, components: &[Component<'_>]) -> Option<&MappedEntry> {
        let key = VirtualKey::from_components(components.iter().copied());
        let slot = self.index.get(&key)?;
        self.slot_entry(*slot)
    }

    /// Longest proper ancestor entry accepted by `accept`, joined with the
    /// remaining components.
    fn ancestor_match(
        &self,
        components: &[Component<'_>],
        accept: impl Fn(&MappedEntry) -> bool,
    ) -> Option<PathBuf> {
        for len in (1..components.len()).rev() {
            let (head, rest) = components.split_at(len);
            if let Some(entry) = self.entry_at(head) {
                if accept(entry) {
                    let rest: PathBuf = rest.iter().collect();
                    return Some(entry.real_path.join(rest));
                }
            }
        }
        None
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for idx in 0..self.rules.len() {
            self.apply_expansion(idx);
        }
    }

    fn apply_expansion(&mut self, idx: usize) {
        let Self {
            expansions, index, ..
        } = self;
        let Some(expansion) = expansions.get(idx) else {
            return;
        };

        for (pos, entry) in expansion.iter().enumerate() {
            let key = VirtualKey::from_normalized(&entry.virtual_path);
            let shadowed_by_explicit = index
                .get(&key)
                .and_then(|&(r, e)| expansions.get(r)?.get(e))
                .is_some_and(|existing| existing.explicit && !entry.explicit);

            if !shadowed_by_explicit {
                index.insert(key, (idx, pos));
            }
        }
    }
}

fn path_exists(path: &Path) -> CoreResult<bool> {
    path.try_exists().map_err(|e| CoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn root_entry(rule: &LinkRule) -> MappedEntry {
    MappedEntry {
        virtual_path: rule.target().to_path_buf(),
        real_path: rule.source().to_path_buf(),
        kind: rule.kind(),
        flags: rule.flags(),
        explicit: true,
    }
}

/// Expand a rule into its entries. Recursive directory rules walk the real
/// source subtree; children inherit the rule's flags.
fn expand(rule: &LinkRule) -> CoreResult<Vec<MappedEntry>> {
    let mut entries = vec![root_entry(rule)];
    if !rule.is_recursive() {
        return Ok(entries);
    }

    let walker = WalkDir::new(rule.source())
        .follow_links(false)
        .sort_by_file_name();

    for item in walker {
        let item = item.map_err(|e| CoreError::Io {
            path: e
                .path()
                .map_or_else(|| rule.source().to_path_buf(), Path::to_path_buf),
            source: e.into(),
        })?;

        if item.depth() == 0 {
            if !item.file_type().is_dir() {
                return Err(CoreError::InvalidRule(format!(
                    "recursive source is not a directory: {}",
                    rule.source().display()
                )));
            }
            continue;
        }

        let Ok(rel) = item.path().strip_prefix(rule.source()) else {
            continue;
        };

        entries.push(MappedEntry {
            virtual_path: rule.target().join(rel),
            real_path: item.path().to_path_buf(),
            kind: if item.file_type().is_dir() {
                LinkKind::Directory
            } else {
                LinkKind::File
            },
            flags: rule.flags(),
            explicit: false,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_file_rule_resolves_exactly() {
        let base = std::env::temp_dir();
        let mut table = MappingTable::new();
        table
            .link(LinkRule::file(base.join("real/a.txt"), base.join("virt/a.txt"), LinkFlags::empty()).unwrap())
            .unwrap();

        assert_eq!(table.resolve(&base.join("virt/a.txt")), Some(base.join("real/a.txt")));
        assert_eq!(table.resolve(&base.join("virt/b.txt")), None);
        assert_eq!(table.resolve(&base.join("virt/a.txt/child")), None);
        assert_eq!(table.resolve(Path::new("virt/a.txt")), None);
    }

    #[test]
    fn test_directory_rule_resolves_by_prefix() {
        let base = std::env::temp_dir();
        let mut table = MappingTable::new();
        table
            .link(LinkRule::directory(base.join("mods/a"), base.join("game/data"), LinkFlags::empty()).unwrap())
            .unwrap();

        assert_eq!(table.resolve(&base.join("game/data")), Some(base.join("mods/a")));
        assert_eq!(
            table.resolve(&base.join("game/data/textures/x.dds")),
            Some(base.join("mods/a").join("textures").join("x.dds"))
        );
        assert_eq!(table.resolve(&base.join("game/other")), None);
    }

    #[test]
    fn test_recursive_expansion_covers_every_descendant() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("modA");
        let files = ["a.txt", "sub/b.txt", "sub/deeper/c.txt", "other/d.txt"];
        for f in files {
            write(&src.join(f));
        }
        fs::create_dir_all(src.join("empty")).unwrap();
        let target = tmp.path().join("game/data");

        let mut table = MappingTable::new();
        table
            .link(LinkRule::directory(&src, &target, LinkFlags::RECURSIVE).unwrap())
            .unwrap();

        // root + 4 files + sub, sub/deeper, other, empty
        assert_eq!(table.len(), 9);
        for f in files {
            assert_eq!(table.resolve(&target.join(f)), Some(src.join(f)));
        }
        let empty = table.entry(&target.join("empty")).unwrap();
        assert_eq!(empty.kind(), LinkKind::Directory);
        assert!(!empty.is_explicit());
        assert_eq!(empty.flags(), LinkFlags::RECURSIVE);

        table.clear();
        assert!(table.is_empty());
        for f in files {
            assert_eq!(table.resolve(&target.join(f)), None);
        }
    }

    #[test]
    fn test_recursive_link_of_missing_source_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let mut table = MappingTable::new();
        let before = table.clone();

        let res = table.link(
            LinkRule::directory(tmp.path().join("missing"), tmp.path().join("v"), LinkFlags::RECURSIVE).unwrap(),
        );
        assert!(matches!(res, Err(CoreError::Io { .. })));
        assert_eq!(table, before);
    }

    #[test]
    fn test_fail_if_exists_leaves_table_untouched() {
        let tmp = TempDir::new().unwrap();
        let existing = tmp.path().join("existing.txt");
        write(&existing);

        let mut table = MappingTable::new();
        table
            .link(LinkRule::file(tmp.path().join("r1"), tmp.path().join("v1"), LinkFlags::empty()).unwrap())
            .unwrap();
        let before = table.clone();

        let res = table.link(
            LinkRule::file(tmp.path().join("r2"), &existing, LinkFlags::FAIL_IF_EXISTS).unwrap(),
        );
        assert!(matches!(res, Err(CoreError::RuleConflict { .. })));
        assert_eq!(table, before);
        assert_eq!(table.resolve(&existing), None);
    }

    #[test]
    fn test_later_file_rule_overrides_recursive_child() {
        let tmp = TempDir::new().unwrap();
        let mod_a = tmp.path().join("modA");
        let mod_b = tmp.path().join("modB");
        write(&mod_a.join("textures/foo.dds"));
        write(&mod_a.join("textures/bar.dds"));
        write(&mod_a.join("meshes/m.nif"));
        write(&mod_b.join("textures/foo.dds"));
        let data = tmp.path().join("game/data");

        let mut table = MappingTable::new();
        table
            .link(LinkRule::directory(&mod_a, &data, LinkFlags::RECURSIVE).unwrap())
            .unwrap();
        table
            .link(
                LinkRule::file(mod_b.join("textures/foo.dds"), data.join("textures/foo.dds"), LinkFlags::empty())
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(
            table.resolve(&data.join("textures/foo.dds")),
            Some(mod_b.join("textures/foo.dds"))
        );
        assert_eq!(
            table.resolve(&data.join("textures/bar.dds")),
            Some(mod_a.join("textures/bar.dds"))
        );
        assert_eq!(table.resolve(&data.join("meshes/m.nif")), Some(mod_a.join("meshes/m.nif")));
    }

    #[test]
    fn test_generated_child_never_displaces_explicit_rule() {
        let tmp = TempDir::new().unwrap();
        let mod_a = tmp.path().join("modA");
        write(&mod_a.join("foo.dds"));
        let pinned = tmp.path().join("pinned.dds");
        let data = tmp.path().join("data");

        let mut table = MappingTable::new();
        table
            .link(LinkRule::file(&pinned, data.join("foo.dds"), LinkFlags::empty()).unwrap())
            .unwrap();
        table
            .link(LinkRule::directory(&mod_a, &data, LinkFlags::RECURSIVE).unwrap())
            .unwrap();

        assert_eq!(table.resolve(&data.join("foo.dds")), Some(pinned));
        assert_eq!(table.resolve(&data), Some(mod_a));
    }

    #[test]
    fn test_later_directory_overlay_wins_for_children() {
        let tmp = TempDir::new().unwrap();
        let mod_a = tmp.path().join("modA");
        let mod_b = tmp.path().join("modB");
        write(&mod_a.join("shared.txt"));
        write(&mod_a.join("only_a.txt"));
        write(&mod_b.join("shared.txt"));
        let data = tmp.path().join("data");

        let mut table = MappingTable::new();
        for src in [&mod_a, &mod_b] {
            table
                .link(LinkRule::directory(src, &data, LinkFlags::RECURSIVE).unwrap())
                .unwrap();
        }

        assert_eq!(table.resolve(&data.join("shared.txt")), Some(mod_b.join("shared.txt")));
        assert_eq!(table.resolve(&data.join("only_a.txt")), Some(mod_a.join("only_a.txt")));
        // Unknown files fall back to the last directory rule for the root.
        assert_eq!(table.resolve(&data.join("new.txt")), Some(mod_b.join("new.txt")));
    }

    #[test]
    fn test_create_target_materializes_and_redirects() {
        let tmp = TempDir::new().unwrap();
        let overwrite = tmp.path().join("overwrite");
        fs::create_dir_all(&overwrite).unwrap();
        let inner_src = tmp.path().join("saves");
        let data = tmp.path().join("game/data");

        let mut table = MappingTable::new();
        table
            .link(LinkRule::directory(&overwrite, &data, LinkFlags::CREATE_TARGET).unwrap())
            .unwrap();
        table
            .link(
                LinkRule::directory(&inner_src, data.join("saves"), LinkFlags::CREATE_TARGET).unwrap(),
            )
            .unwrap();

        assert!(data.is_dir(), "CREATE_TARGET must materialize the target");
        assert_eq!(table.create_target(&data.join("new.ini")), Some(overwrite.join("new.ini")));
        assert_eq!(
            table.create_target(&data.join("saves/slot1.sav")),
            Some(inner_src.join("slot1.sav"))
        );
        assert_eq!(table.create_target(&tmp.path().join("elsewhere")), None);
    }

    #[test]
    fn test_refresh_source_picks_up_new_files() {
        let tmp = TempDir::new().unwrap();
        let mod_a = tmp.path().join("modA");
        let mod_b = tmp.path().join("modB");
        write(&mod_a.join("a.txt"));
        fs::create_dir_all(&mod_b).unwrap();
        let data = tmp.path().join("data");

        let mut table = MappingTable::new();
        table
            .link(
                LinkRule::directory(&mod_a, &data, LinkFlags::RECURSIVE | LinkFlags::MONITOR_CHANGES)
                    .unwrap(),
            )
            .unwrap();
        table
            .link(LinkRule::directory(&mod_b, &data, LinkFlags::RECURSIVE).unwrap())
            .unwrap();
        assert_eq!(table.monitored_sources().count(), 1);

        write(&mod_a.join("late.txt"));
        assert_eq!(table.resolve(&data.join("late.txt")), Some(mod_b.join("late.txt")));

        let refreshed = table.refresh_source(&mod_a.join("late.txt")).unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(table.resolve(&data.join("late.txt")), Some(mod_a.join("late.txt")));

        assert_eq!(table.refresh_source(&mod_b.join("x")).unwrap(), 0);
    }

    #[test]
    fn test_serialized_table_keeps_resolution() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("a/b.txt"));
        let mut table = MappingTable::new();
        table
            .link(LinkRule::directory(&src, tmp.path().join("v"), LinkFlags::RECURSIVE).unwrap())
            .unwrap();

        let json = serde_json::to_string(&table).unwrap();
        let parsed: MappingTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
        assert_eq!(parsed.len(), table.len());
        assert_eq!(
            parsed.resolve(&tmp.path().join("v/a/b.txt")),
            Some(src.join("a/b.txt"))
        );
    }
}
