use crate::document::{ConfigDocument, CURRENT_CONFIG_VERSION};
use mcpz_core::{McpzError, McpzResult};
use std::collections::HashSet;

/// Check the semantic rules serde cannot express.
///
/// All problems are collected and reported together as
/// [`McpzError::ConfigCorrupt`]. Toolbox members are not required to name
/// existing servers; that is checked when a toolbox is expanded.
pub fn validate(doc: &ConfigDocument) -> McpzResult<()> {
    let mut problems = Vec::new();

    if doc.config_version != CURRENT_CONFIG_VERSION {
        problems.push(format!(
            "configVersion is {}, expected {CURRENT_CONFIG_VERSION}",
            doc.config_version
        ));
    }

    let mut names = HashSet::new();
    for server in &doc.servers {
        if server.name.trim().is_empty() {
            problems.push("server with empty name".to_string());
        } else if !names.insert(server.name.as_str()) {
            problems.push(format!("duplicate server '{}'", server.name));
        }
        if !server.origin.is_builtin() {
            problems.push(format!(
                "server '{}' declares origin '{}' but config servers are builtin",
                server.name, server.origin
            ));
        }
    }

    for (toolbox, members) in &doc.toolboxes {
        if toolbox.trim().is_empty() {
            problems.push("toolbox with empty name".to_string());
        }
        let mut seen = HashSet::new();
        for member in members {
            if member.trim().is_empty() {
                problems.push(format!("toolbox '{toolbox}' has an empty member"));
            } else if !seen.insert(member.as_str()) {
                problems.push(format!("toolbox '{toolbox}' lists '{member}' twice"));
            }
        }
    }

    if doc.plugins.keys().any(|id| id.trim().is_empty()) {
        problems.push("plugin with empty id".to_string());
    }
    if doc.skills.keys().any(|id| id.trim().is_empty()) {
        problems.push("skill with empty id".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(McpzError::ConfigCorrupt(problems.join("; ")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcpz_core::{ServerOrigin, ServerSpec};

    #[test]
    fn test_empty_document_is_valid() {
        validate(&ConfigDocument::default()).unwrap();
    }

    #[test]
    fn test_dangling_toolbox_member_is_valid() {
        let mut doc = ConfigDocument::default();
        doc.toolboxes.insert("t".into(), vec!["ghost".into()]);
        validate(&doc).unwrap();
    }

    #[test]
    fn test_duplicate_servers_rejected() {
        let mut doc = ConfigDocument::default();
        doc.servers.push(ServerSpec::new("a", "x"));
        doc.servers.push(ServerSpec::new("a", "y"));
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("duplicate server 'a'"));
    }

    #[test]
    fn test_problems_are_collected() {
        let mut doc = ConfigDocument::default();
        doc.servers.push(ServerSpec::new("", "x"));
        doc.servers
            .push(ServerSpec::new("p", "x").with_origin(ServerOrigin::Plugin("acme".into())));
        doc.toolboxes
            .insert("t".into(), vec!["a".into(), "a".into()]);
        let msg = validate(&doc).unwrap_err().to_string();
        assert!(msg.contains("empty name"));
        assert!(msg.contains("origin 'plugin:acme'"));
        assert!(msg.contains("lists 'a' twice"));
    }
}
