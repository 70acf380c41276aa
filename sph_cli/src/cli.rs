//! Command line argument parsing and the dotted-key config tree: positional
//! arguments, boolean `--flag` switches, and `--a.b.c=VALUE` overrides that land
//! in a nested tree addressable as `a.b.c`. The same tree shape is reused by
//! [`crate::scene`] for scene description files, generalized from this crate's
//! octree-node style (`generic_tree`) to a string-keyed tree rather than a
//! spatial one.

use std::collections::BTreeMap;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("argument \"{0}\" is missing a value (expected --a.b.c=VALUE)")]
    MissingValue(String),
    #[error("empty key in override \"{0}\"")]
    EmptyKey(String),
}

/// A node in the dotted-key config tree: either a leaf string value or a
/// branch of further-nested keys.
#[derive(Debug, Clone)]
pub enum ConfigNode {
    Leaf(String),
    Branch(BTreeMap<String, ConfigNode>),
}

impl ConfigNode {
    fn branch_mut(&mut self) -> &mut BTreeMap<String, ConfigNode> {
        if !matches!(self, ConfigNode::Branch(_)) {
            *self = ConfigNode::Branch(BTreeMap::new());
        }
        match self {
            ConfigNode::Branch(m) => m,
            ConfigNode::Leaf(_) => unreachable!(),
        }
    }
}

/// A nested `tree.a.b.c`-addressable string tree built from CLI overrides or a
/// scene description file, both of which share the same `key=value` grammar.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    root: BTreeMap<String, ConfigNode>,
}

impl ConfigTree {
    pub fn new() -> Self {
        ConfigTree::default()
    }

    /// Inserts `value` at the dotted `path`, creating intermediate branches as
    /// needed. A later insert at the same path overwrites an earlier one.
    pub fn insert_dotted(&mut self, path: &str, value: impl Into<String>) -> Result<(), CliError> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CliError::EmptyKey(path.to_string()));
        }
        let mut node_map = &mut self.root;
        for part in &parts[..parts.len() - 1] {
            let entry = node_map.entry(part.to_string()).or_insert_with(|| ConfigNode::Branch(BTreeMap::new()));
            node_map = entry.branch_mut();
        }
        node_map.insert(parts[parts.len() - 1].to_string(), ConfigNode::Leaf(value.into()));
        Ok(())
    }

    /// Overlays `other` onto `self`, recursively; leaves in `other` win over
    /// leaves already present in `self`.
    pub fn merge(&mut self, other: ConfigTree) {
        Self::merge_maps(&mut self.root, other.root);
    }

    fn merge_maps(into: &mut BTreeMap<String, ConfigNode>, from: BTreeMap<String, ConfigNode>) {
        for (key, node) in from {
            match (into.get_mut(&key), node) {
                (Some(ConfigNode::Branch(existing)), ConfigNode::Branch(incoming)) => {
                    Self::merge_maps(existing, incoming);
                }
                (_, node) => {
                    into.insert(key, node);
                }
            }
        }
    }

    fn lookup(&self, path: &str) -> Option<&ConfigNode> {
        let mut node_map = &self.root;
        let parts: Vec<&str> = path.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            match node_map.get(*part)? {
                ConfigNode::Branch(m) => node_map = m,
                ConfigNode::Leaf(_) => return None,
            }
        }
        node_map.get(parts[parts.len() - 1])
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        match self.lookup(path)? {
            ConfigNode::Leaf(s) => Some(s.as_str()),
            ConfigNode::Branch(_) => None,
        }
    }

    pub fn get_str_or<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        self.get_str(path).unwrap_or(default)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_str(path)?.parse().ok()
    }

    pub fn get_f64_or(&self, path: &str, default: f64) -> f64 {
        self.get_f64(path).unwrap_or(default)
    }

    pub fn get_u64_or(&self, path: &str, default: u64) -> u64 {
        self.get_str(path).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool_or(&self, path: &str, default: bool) -> bool {
        self.get_str(path).map(|s| s == "true" || s == "1").unwrap_or(default)
    }

    /// Names of the children of the branch at `path`, in lexicographic order;
    /// empty if `path` is a leaf or does not exist. Used to enumerate e.g. the
    /// group names under `model.group` or the indices under a `sample` list.
    pub fn children(&self, path: &str) -> Vec<String> {
        if path.is_empty() {
            return self.root.keys().cloned().collect();
        }
        match self.lookup(path) {
            Some(ConfigNode::Branch(m)) => m.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Parses a scene-description-style text file: one `key=value` override
    /// per non-blank, non-`#`-comment line, in the same dotted-key grammar as
    /// `--a.b.c=VALUE` CLI overrides.
    pub fn parse_lines(contents: &str) -> Result<ConfigTree, CliError> {
        let mut tree = ConfigTree::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| CliError::MissingValue(line.to_string()))?;
            tree.insert_dotted(key.trim(), value.trim())?;
        }
        Ok(tree)
    }
}

/// Parsed command line: positional arguments, boolean flags, and the
/// `--a.b.c=VALUE` override tree.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positionals: Vec<String>,
    pub flags: std::collections::HashSet<String>,
    pub overrides: ConfigTree,
}

impl Args {
    pub fn parse(argv: impl IntoIterator<Item = String>) -> Result<Args, CliError> {
        let mut args = Args::default();
        for arg in argv {
            if let Some(rest) = arg.strip_prefix("--") {
                match rest.split_once('=') {
                    Some((key, value)) => args.overrides.insert_dotted(key, value)?,
                    None => {
                        args.flags.insert(rest.to_string());
                    }
                }
            } else {
                args.positionals.push(arg);
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_override_lands_in_the_nested_tree() {
        let args = Args::parse(["--a.b.c=1.5".to_string(), "scene.txt".to_string(), "--verbose".to_string()]).unwrap();
        assert_eq!(args.positionals, vec!["scene.txt".to_string()]);
        assert!(args.flags.contains("verbose"));
        assert_eq!(args.overrides.get_f64("a.b.c"), Some(1.5));
    }

    #[test]
    fn later_overrides_win_on_merge() {
        let mut base = ConfigTree::new();
        base.insert_dotted("model.group.water.type", "fluid").unwrap();
        let mut overlay = ConfigTree::new();
        overlay.insert_dotted("model.group.water.type", "boundary").unwrap();
        base.merge(overlay);
        assert_eq!(base.get_str("model.group.water.type"), Some("boundary"));
    }

    #[test]
    fn children_enumerates_branch_keys() {
        let mut tree = ConfigTree::new();
        tree.insert_dotted("model.group.water.type", "fluid").unwrap();
        tree.insert_dotted("model.group.box.type", "boundary").unwrap();
        let mut names = tree.children("model.group");
        names.sort();
        assert_eq!(names, vec!["box".to_string(), "water".to_string()]);
    }

    #[test]
    fn parse_lines_ignores_blanks_and_comments() {
        let tree = ConfigTree::parse_lines(
            "\n# a comment\nmodel.group.water.type=fluid\n  model.group.water.rest_density = 1000.0 \n",
        )
        .unwrap();
        assert_eq!(tree.get_str("model.group.water.type"), Some("fluid"));
        assert_eq!(tree.get_f64("model.group.water.rest_density"), Some(1000.0));
    }
}
