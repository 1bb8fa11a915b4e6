//! The six built-in transformer bundles (SPEC_FULL §4.F): named
//! `TransformerConfig`s identifying a format pair, with an empty declarative
//! overlay by default. The overlay fields (`request`/`response`) are the hook
//! a route's own config may use to adjust a value beyond what the hardcoded
//! field-mapping translator already sets; the hardcoded mapping itself lives
//! one crate over, in `prism-translator`, which `prism-core` cannot depend on
//! (the dependency direction runs translator → core). Wiring a bundle's name
//! to the actual translator functions is the server's job
//! (`crates/server/src/builtin_plugins.rs`).

use crate::provider::Format;
use prism_types::TransformerConfig;
use std::collections::HashMap;

/// Declaration order mirrors the names in SPEC_FULL §4.F.
pub const BUILTIN_BUNDLE_NAMES: &[&str] = &[
    "anthropic-to-openai",
    "anthropic-to-gemini",
    "openai-to-anthropic",
    "openai-to-gemini",
    "gemini-to-anthropic",
    "gemini-to-openai",
];

/// The `(from, to)` format pair a built-in bundle name identifies, or `None`
/// if `name` isn't one of the six.
pub fn builtin_format_pair(name: &str) -> Option<(Format, Format)> {
    match name {
        "anthropic-to-openai" => Some((Format::Claude, Format::OpenAI)),
        "anthropic-to-gemini" => Some((Format::Claude, Format::Gemini)),
        "openai-to-anthropic" => Some((Format::OpenAI, Format::Claude)),
        "openai-to-gemini" => Some((Format::OpenAI, Format::Gemini)),
        "gemini-to-anthropic" => Some((Format::Gemini, Format::Claude)),
        "gemini-to-openai" => Some((Format::Gemini, Format::OpenAI)),
        _ => None,
    }
}

/// Default (empty-overlay) `TransformerConfig` for every built-in bundle,
/// keyed by name. Used as the base a route's own `TransformerConfig` of the
/// same name, if present in its plugin descriptors, may override.
pub fn builtin_transformer_configs() -> HashMap<String, TransformerConfig> {
    BUILTIN_BUNDLE_NAMES
        .iter()
        .filter_map(|&name| {
            let (from, to) = builtin_format_pair(name)?;
            Some((
                name.to_string(),
                TransformerConfig {
                    name: name.to_string(),
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                    request: None,
                    response: Vec::new(),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_declared_name_has_a_format_pair() {
        for name in BUILTIN_BUNDLE_NAMES {
            assert!(builtin_format_pair(name).is_some(), "missing pair for {name}");
        }
    }

    #[test]
    fn configs_cover_all_six_names() {
        let configs = builtin_transformer_configs();
        assert_eq!(configs.len(), 6);
        for name in BUILTIN_BUNDLE_NAMES {
            assert!(configs.contains_key(*name));
        }
    }
}
