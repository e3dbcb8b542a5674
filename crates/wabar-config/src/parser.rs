//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl is built against an older miette, so rebuild the span by hand
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "bar" => {
                config.bar = parse_bar(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

/// First argument of a node as a string, if present
fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries().first().and_then(|e| e.value().as_string())
}

fn required_string<'a>(node: &'a kdl::KdlNode, field: &str) -> Result<&'a str, ConfigError> {
    first_string(node).ok_or_else(|| ConfigError::MissingField {
        field: format!("{} (e.g., `{} \"...\"`)", field, node.name().value()),
    })
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    let val = required_string(child, "log level")?;
                    global.log_level = val
                        .parse()
                        .map_err(|message| ConfigError::Invalid { message })?;
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_bar(node: &kdl::KdlNode) -> Result<BarSettings, ConfigError> {
    let mut bar = BarSettings {
        id: first_string(node).map(str::to_string),
        ..BarSettings::default()
    };

    if bar.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            message: "Bar id must not be empty; omit it to use the first bar".to_string(),
        });
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "socket" => {
                    let val = required_string(child, "socket path")?;
                    bar.socket = Some(shellexpand::tilde(val).into_owned().into());
                }
                "modifier-reset" => {
                    let val = required_string(child, "modifier reset mode")?;
                    bar.modifier_reset = val
                        .parse()
                        .map_err(|message| ConfigError::Invalid { message })?;
                }
                "toggle-modifier" => {
                    let val = required_string(child, "modifier name")?;
                    bar.toggle_modifier = Some(val.to_string());
                }
                "max-frame-size" => {
                    let raw = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_i64())
                        .ok_or_else(|| ConfigError::MissingField {
                            field: "max-frame-size (e.g., `max-frame-size 1048576`)".to_string(),
                        })?;
                    bar.max_frame_size = u32::try_from(raw)
                        .ok()
                        .filter(|size| *size > 0)
                        .ok_or_else(|| ConfigError::Invalid {
                            message: format!(
                                "max-frame-size must be between 1 and {}, got {}",
                                u32::MAX,
                                raw
                            ),
                        })?;
                }
                name => {
                    tracing::warn!("Unknown bar config option: {}", name);
                }
            }
        }
    }

    Ok(bar)
}
