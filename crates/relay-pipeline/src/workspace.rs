use std::path::{Component, Path, PathBuf};

use relay_core::config::RoutingConfig;

/// Workspace for `chat_id`: its explicit mapping, else the default.
pub fn resolve<'a>(routing: &'a RoutingConfig, chat_id: &str) -> &'a str {
    routing
        .chat_to_workspace
        .get(chat_id)
        .map(String::as_str)
        .unwrap_or(&routing.default_workspace)
}

/// Whether `workspace` may be handed to the agent.
///
/// With an empty allowlist only the default and mapped workspaces pass.
/// Paths are compared after lexical normalization, without touching the
/// filesystem.
pub fn is_allowed(routing: &RoutingConfig, workspace: &str) -> bool {
    let target = normalize(workspace);
    if routing.workspace_allowlist.is_empty() {
        std::iter::once(&routing.default_workspace)
            .chain(routing.chat_to_workspace.values())
            .any(|p| normalize(p) == target)
    } else {
        routing
            .workspace_allowlist
            .iter()
            .any(|p| normalize(p) == target)
    }
}

/// Absolute form of `path` with `.` and `..` folded away.
fn normalize(path: &str) -> PathBuf {
    let path = Path::new(path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn routing(allowlist: &[&str]) -> RoutingConfig {
        RoutingConfig {
            default_workspace: "/srv/default".into(),
            chat_to_workspace: BTreeMap::from([("oc_1".to_string(), "/srv/one".to_string())]),
            workspace_allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn mapping_wins_over_default() {
        let r = routing(&[]);
        assert_eq!(resolve(&r, "oc_1"), "/srv/one");
        assert_eq!(resolve(&r, "oc_2"), "/srv/default");
    }

    #[test]
    fn empty_allowlist_allows_default_and_mapped() {
        let r = routing(&[]);
        assert!(is_allowed(&r, "/srv/default"));
        assert!(is_allowed(&r, "/srv/one/"));
        assert!(is_allowed(&r, "/srv/x/../one"));
        assert!(!is_allowed(&r, "/srv/other"));
    }

    #[test]
    fn explicit_allowlist_replaces_defaults() {
        let r = routing(&["/srv/one"]);
        assert!(is_allowed(&r, "/srv/./one"));
        assert!(!is_allowed(&r, "/srv/default"));
    }
}
