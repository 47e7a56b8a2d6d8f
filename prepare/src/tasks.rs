//! Cache management behind `prepare task ...` and `prepare tasks ...`.

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::core::reference::ActionReference;
use crate::core::types::ActionKind;
use crate::io::cache::{ActionCache, FsCache};
use crate::io::git::{Fetcher, Git};
use crate::io::provision::Provisioner;
use crate::resolve::{ResolvedAction, Resolver};

/// Render cached actions as an `org / name / version` tree.
pub fn render_tree(references: &[ActionReference]) -> String {
    if references.is_empty() {
        return "No actions cached\n".to_string();
    }
    // (organization, [(name, [version])]) preserving sorted input order.
    let mut groups: Vec<(&str, Vec<(&str, Vec<&str>)>)> = Vec::new();
    for reference in references {
        if groups.last().map(|(org, _)| *org) != Some(reference.organization.as_str()) {
            groups.push((reference.organization.as_str(), Vec::new()));
        }
        let Some((_, names)) = groups.last_mut() else {
            continue;
        };
        if names.last().map(|(name, _)| *name) != Some(reference.name.as_str()) {
            names.push((reference.name.as_str(), Vec::new()));
        }
        if let Some((_, versions)) = names.last_mut() {
            versions.push(reference.version.as_str());
        }
    }

    let mut out = String::new();
    for (organization, names) in &groups {
        out.push_str(&format!("{organization}\n"));
        for (i, (name, versions)) in names.iter().enumerate() {
            let last_name = i + 1 == names.len();
            out.push_str(&format!("{}{name}\n", if last_name { "└── " } else { "├── " }));
            let indent = if last_name { "    " } else { "│   " };
            for (j, version) in versions.iter().enumerate() {
                let branch = if j + 1 == versions.len() { "└── " } else { "├── " };
                out.push_str(&format!("{indent}{branch}{version}\n"));
            }
        }
    }
    out
}

/// `tasks ls`.
pub fn list(cache: &FsCache) -> Result<String> {
    Ok(render_tree(&cache.references()?))
}

/// `task info <reference>`: a human readable summary of a cached action.
pub fn info(cache: &FsCache, raw: &str) -> Result<String> {
    let reference = ActionReference::parse(raw)?;
    let Some(cached) = cache.load(&reference)? else {
        bail!("action '{reference}' is not cached");
    };
    let paths = cache.entry_paths(&reference);
    let definition = &cached.definition;

    let mut out = String::new();
    out.push_str(&format!("{} ({})\n", definition.name, reference));
    out.push_str(&format!("  id:          {}\n", definition.id));
    out.push_str(&format!("  description: {}\n", definition.description));
    match &definition.kind {
        ActionKind::Leaf { using, main } => {
            out.push_str(&format!("  runs:        {using} {}\n", main.display()));
        }
        ActionKind::Composite { steps } => {
            out.push_str(&format!("  runs:        composite ({} steps)\n", steps.len()));
        }
    }
    match Git::new(&paths.repo).head_short_sha(12) {
        Ok(sha) => {
            out.push_str(&format!("  commit:      {sha}\n"));
        }
        Err(err) => debug!(err = %err, "no commit information"),
    }
    out.push_str(&format!("  path:        {}\n", paths.dir.display()));
    if !definition.inputs.is_empty() {
        out.push_str("  inputs:\n");
        for input in &definition.inputs {
            let value_type = match input.items {
                Some(items) => format!("{}<{items}>", input.value_type),
                None => input.value_type.to_string(),
            };
            out.push_str(&format!("    {}: {value_type}", input.name));
            if input.required {
                out.push_str(" (required)");
            }
            if let Some(default) = &input.default {
                out.push_str(&format!(" = {default}"));
            }
            out.push_str(&format!("  {}\n", input.description));
        }
    }
    if !definition.outputs.is_empty() {
        out.push_str("  outputs:\n");
        for (name, output) in &definition.outputs {
            out.push_str(&format!("    {name}: {}  {}\n", output.value_type, output.description));
        }
    }
    Ok(out)
}

/// `task remove <reference>`; returns whether the action was cached.
pub fn remove(cache: &FsCache, raw: &str) -> Result<bool> {
    let reference = ActionReference::parse(raw)?;
    let removed = cache.remove(&reference)?;
    info!(action = %reference, removed, "remove cached action");
    Ok(removed)
}

/// `task update <reference>`: drop the cached copy and resolve it again.
pub fn update<F: Fetcher, P: Provisioner>(
    cache: &FsCache,
    resolver: &Resolver<'_, FsCache, F, P>,
    raw: &str,
) -> Result<ResolvedAction> {
    let reference = ActionReference::parse(raw)?;
    cache.remove(&reference)?;
    info!(action = %reference, "re-resolving action");
    Ok(resolver.resolve_reference(raw)?)
}

/// `tasks remove`.
pub fn remove_all(cache: &FsCache) -> Result<()> {
    cache.remove_all()
}
