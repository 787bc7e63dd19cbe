//! Bead id routing: the prefix -> rig-directory table.
//!
//! `<town>/.beads/routes.jsonl` carries one JSON object per line,
//! `{"prefix": "gt", "path": "gastown"}`. Every cross-rig store operation
//! resolves through this table; an id whose prefix is absent is unroutable.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub path: String,
}

/// In-memory prefix table. Cheap to clone; the session registry holds the
/// process-wide instance and tests substitute their own.
#[derive(Debug, Clone, Default)]
pub struct PrefixRegistry {
    routes: BTreeMap<String, String>,
}

impl PrefixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: &str, path: &str) {
        self.routes.insert(prefix.to_string(), path.to_string());
    }

    pub fn rig_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.routes.get(prefix).map(String::as_str)
    }

    pub fn known_prefix(&self, prefix: &str) -> bool {
        self.routes.contains_key(prefix)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Prefix of a bead id (`gt-abc1` -> `gt`, `hq-cv-x` -> `hq`).
    pub fn id_prefix(id: &str) -> &str {
        id.split('-').next().unwrap_or("")
    }
}

/// Load the routing table. Unparseable lines are skipped with a debug record
/// rather than failing the whole load; a truncated table is still useful.
pub fn load_routes(town: &Path) -> std::io::Result<PrefixRegistry> {
    let path = crate::paths::routes_path(town);
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PrefixRegistry::default());
        }
        Err(err) => return Err(err),
    };

    let mut registry = PrefixRegistry::default();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Route>(line) {
            Ok(route) => registry.register(&route.prefix, &route.path),
            Err(err) => {
                tracing::debug!("skipping malformed route line: {err}");
            }
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_routes_and_skips_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let beads = dir.path().join(".beads");
        std::fs::create_dir_all(&beads).unwrap();
        std::fs::write(
            beads.join("routes.jsonl"),
            concat!(
                r#"{"prefix":"gt","path":"gastown"}"#,
                "\n",
                "not json\n",
                r#"{"prefix":"hq","path":"."}"#,
                "\n",
            ),
        )
        .unwrap();

        let registry = load_routes(dir.path()).expect("load");
        assert_eq!(registry.rig_for_prefix("gt"), Some("gastown"));
        assert_eq!(registry.rig_for_prefix("hq"), Some("."));
        assert!(!registry.known_prefix("bd"));
    }

    #[test]
    fn missing_table_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = load_routes(dir.path()).expect("load");
        assert_eq!(registry.prefixes().count(), 0);
    }

    #[test]
    fn id_prefix_extraction() {
        assert_eq!(PrefixRegistry::id_prefix("gt-abc1"), "gt");
        assert_eq!(PrefixRegistry::id_prefix("hq-cv-ab3de"), "hq");
        assert_eq!(PrefixRegistry::id_prefix(""), "");
    }
}
