//! Session identity: canonical naming and parsing of agent sessions.
//!
//! Canonical form is `<prefix>-<rig>-<role>[-<name>]`, collapsing to
//! `<prefix>-<role>[-<name>]` when the rig's prefix and its name coincide.
//! A session is "known" when its prefix appears in the route table.

use std::collections::BTreeMap;
use std::path::Path;

use crate::beads::{PrefixRegistry, load_routes};
use crate::tmux;

/// Worker roles, closed set. Role dispatch is a match, never a string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Mayor,
    Deacon,
    Witness,
    Refinery,
    Polecat,
    Crew,
    Boot,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Mayor => "mayor",
            AgentRole::Deacon => "deacon",
            AgentRole::Witness => "witness",
            AgentRole::Refinery => "refinery",
            AgentRole::Polecat => "polecat",
            AgentRole::Crew => "crew",
            AgentRole::Boot => "boot",
        }
    }

    /// Parse a role segment. The boot watchdog reports as deacon here; it
    /// only differs in its env profile.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "mayor" => Some(AgentRole::Mayor),
            "deacon" | "boot" => Some(AgentRole::Deacon),
            "witness" => Some(AgentRole::Witness),
            "refinery" => Some(AgentRole::Refinery),
            "polecat" => Some(AgentRole::Polecat),
            "crew" => Some(AgentRole::Crew),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed session identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionName {
    pub prefix: String,
    pub rig: String,
    pub role: AgentRole,
    /// Worker name for polecat/crew sessions; empty otherwise.
    pub name: String,
}

impl SessionName {
    pub fn new(prefix: &str, rig: &str, role: AgentRole, name: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            rig: rig.to_string(),
            role,
            name: name.to_string(),
        }
    }

    /// Render the canonical session name, collapsing when prefix == rig.
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.prefix);
        if self.prefix != self.rig && !self.rig.is_empty() {
            out.push('-');
            out.push_str(&self.rig);
        }
        out.push('-');
        out.push_str(self.role.as_str());
        if !self.name.is_empty() {
            out.push('-');
            out.push_str(&self.name);
        }
        out
    }

    /// Parse a session name against the route table.
    ///
    /// Returns `None` for sessions whose prefix is unknown or whose shape
    /// does not match either the canonical or collapsed form.
    pub fn parse(session: &str, registry: &Registry) -> Option<Self> {
        let parts: Vec<&str> = session.split('-').collect();
        if parts.len() < 2 {
            return None;
        }
        let prefix = parts[0];
        let rig = registry.prefixes.rig_for_prefix(prefix)?.to_string();

        // Collapsed form: <prefix>-<role>[-<name>]
        if let Some(role) = AgentRole::parse(parts[1]) {
            let name = parts[2..].join("-");
            return Some(SessionName::new(prefix, &rig, role, &name));
        }

        // Canonical form: <prefix>-<rig>-<role>[-<name>]
        if parts.len() >= 3
            && let Some(role) = AgentRole::parse(parts[2])
        {
            let name = parts[3..].join("-");
            return Some(SessionName::new(prefix, parts[1], role, &name));
        }

        None
    }
}

/// Environment profile handed to a spawned agent session.
///
/// Boot is the one role whose session identity (deacon) and env profile
/// diverge: the watchdog needs to know it is the watchdog.
pub fn agent_env(role: AgentRole, rig: &str, name: &str, town: &Path) -> Vec<(String, String)> {
    let mut env = vec![
        ("GT_ROLE".to_string(), role.as_str().to_string()),
        ("GT_RIG".to_string(), rig.to_string()),
        (
            "GT_TOWN_ROOT".to_string(),
            town.display().to_string(),
        ),
    ];
    match role {
        AgentRole::Polecat | AgentRole::Crew => {
            env.push(("GT_POLECAT".to_string(), name.to_string()));
        }
        AgentRole::Boot => {
            // Reported as deacon by the parser; the env tells the truth.
            env.push(("GT_BOOT".to_string(), "1".to_string()));
        }
        _ => {}
    }
    env
}

/// Process-scoped session registry: the route table plus rig lookup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    prefixes: PrefixRegistry,
    /// rig name -> prefix, the reverse of the route table.
    rig_prefixes: BTreeMap<String, String>,
}

impl Registry {
    pub fn new(prefixes: PrefixRegistry) -> Self {
        let mut rig_prefixes = BTreeMap::new();
        for prefix in prefixes.prefixes() {
            if let Some(rig) = prefixes.rig_for_prefix(prefix) {
                rig_prefixes.insert(rig.to_string(), prefix.to_string());
            }
        }
        Self {
            prefixes,
            rig_prefixes,
        }
    }

    pub fn prefix_for_rig(&self, rig: &str) -> Option<&str> {
        self.rig_prefixes.get(rig).map(String::as_str)
    }

    pub fn known_prefix(&self, prefix: &str) -> bool {
        self.prefixes.known_prefix(prefix)
    }

    pub fn prefixes(&self) -> &PrefixRegistry {
        &self.prefixes
    }
}

/// Initialize the registry for a town.
///
/// Always pins the multiplexer socket to `"default"` first (per-town
/// sockets caused cross-socket bugs and split session visibility without
/// buying real isolation), then loads the route table.
pub fn init_registry(town: &Path) -> std::io::Result<Registry> {
    tmux::set_default_socket("default");
    let prefixes = load_routes(town)?;
    Ok(Registry::new(prefixes))
}

/// Sanitize a town name for inclusion in error messages.
///
/// Not used for sockets or session names; those are fixed.
pub fn sanitize_town_name(name: &str) -> String {
    let mut out = String::new();
    let mut last_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if c.is_ascii() && !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        let mut prefixes = PrefixRegistry::new();
        prefixes.register("bd", "beads");
        prefixes.register("gt", "beads");
        prefixes.register("hq", ".");
        Registry::new(prefixes)
    }

    #[test]
    fn parses_canonical_with_rig() {
        let parsed = SessionName::parse("bd-beads-witness", &test_registry()).expect("parse");
        assert_eq!(parsed.role, AgentRole::Witness);
        assert_eq!(parsed.rig, "beads");
        assert_eq!(parsed.prefix, "bd");
        assert!(parsed.name.is_empty());
    }

    #[test]
    fn parses_polecat_with_name() {
        let parsed =
            SessionName::parse("gt-beads-polecat-jade", &test_registry()).expect("parse");
        assert_eq!(parsed.role, AgentRole::Polecat);
        assert_eq!(parsed.rig, "beads");
        assert_eq!(parsed.name, "jade");
    }

    #[test]
    fn parses_collapsed_form() {
        let parsed = SessionName::parse("gt-mayor", &test_registry()).expect("parse");
        assert_eq!(parsed.role, AgentRole::Mayor);
        assert_eq!(parsed.rig, "beads");
    }

    #[test]
    fn boot_reports_as_deacon() {
        let parsed = SessionName::parse("gt-boot", &test_registry()).expect("parse");
        assert_eq!(parsed.role, AgentRole::Deacon);
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(SessionName::parse("zz-beads-witness", &test_registry()).is_none());
    }

    #[test]
    fn format_collapses_when_prefix_matches_rig() {
        let name = SessionName::new("beads", "beads", AgentRole::Witness, "");
        assert_eq!(name.format(), "beads-witness");

        let full = SessionName::new("gt", "beads", AgentRole::Polecat, "jade");
        assert_eq!(full.format(), "gt-beads-polecat-jade");
    }

    #[test]
    fn agent_env_profiles() {
        let town = Path::new("/town");
        let env = agent_env(AgentRole::Polecat, "beads", "jade", town);
        assert!(env.contains(&("GT_POLECAT".to_string(), "jade".to_string())));
        assert!(env.contains(&("GT_TOWN_ROOT".to_string(), "/town".to_string())));

        let boot = agent_env(AgentRole::Boot, "beads", "", town);
        assert!(boot.contains(&("GT_BOOT".to_string(), "1".to_string())));
        assert!(boot.iter().any(|(k, v)| k == "GT_ROLE" && v == "boot"));
    }

    #[test]
    fn sanitize_town_names() {
        let cases = [
            ("mytown", "mytown"),
            ("MyTown", "mytown"),
            ("my town", "my-town"),
            ("my_town!", "my-town"),
            ("  spaces  ", "spaces"),
            ("My-Town-123", "my-town-123"),
            ("café", "caf"),
            ("", "default"),
            ("!!!!", "default"),
            ("a/b/c", "a-b-c"),
        ];
        for (input, want) in cases {
            assert_eq!(sanitize_town_name(input), want, "input {input:?}");
        }
    }
}
