//! Type/coder resolution: from a collection id to the coder the engine uses.
//!
//! A collection declares its coder as a tree of component-table entries.
//! Three flavors of the same tree are derived here:
//!
//! - `legacy_coder`: the tree as declared.
//! - `sdk_coder`: every runtime-specific (non-model) coder wrapped in a
//!   length prefix, so the bytes can be skipped by runtimes that do not
//!   understand them.
//! - `wire_coder`: every non-model coder replaced by a length-prefixed byte
//!   string, which any runtime can decode.
//!
//! `sdk_coder` and `wire_coder` share a byte layout; the coder bridge relies
//! on that.

use crate::coder::{CoderSpec, SerdeFormat, WindowCoder, WindowedValueCoder, urn};
use crate::engine::TypeInfo;
use crate::pipeline::Components;

const MAX_DEPTH: usize = 64;

/// How non-model coders are treated while instantiating a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderPolicy {
    AsDeclared,
    LengthPrefixUnknown,
    ReplaceUnknownWithBytes,
}

/// The declared coder of a collection.
pub fn legacy_coder(
    pcollection_id: &str,
    components: &Components,
) -> Result<WindowedValueCoder, ResolveError> {
    resolve(pcollection_id, components, CoderPolicy::AsDeclared)
}

/// The coder a runtime uses to produce values for cross-runtime consumers.
pub fn sdk_coder(
    pcollection_id: &str,
    components: &Components,
) -> Result<WindowedValueCoder, ResolveError> {
    resolve(pcollection_id, components, CoderPolicy::LengthPrefixUnknown)
}

/// The coder the engine uses to carry values it cannot interpret.
pub fn wire_coder(
    pcollection_id: &str,
    components: &Components,
) -> Result<WindowedValueCoder, ResolveError> {
    resolve(pcollection_id, components, CoderPolicy::ReplaceUnknownWithBytes)
}

/// Engine type descriptor for a collection under `policy`.
pub fn type_info(
    pcollection_id: &str,
    components: &Components,
    policy: CoderPolicy,
) -> Result<TypeInfo, ResolveError> {
    resolve(pcollection_id, components, policy).map(TypeInfo::new)
}

/// Instantiate the windowed value coder of a collection.
pub fn resolve(
    pcollection_id: &str,
    components: &Components,
    policy: CoderPolicy,
) -> Result<WindowedValueCoder, ResolveError> {
    let pcollection = components
        .pcollections
        .get(pcollection_id)
        .ok_or_else(|| ResolveError::UnknownCollection(pcollection_id.to_string()))?;

    let value = Resolver { components, policy }.value_coder(&pcollection.coder_id, 0)?;
    let window = window_coder(&pcollection.windowing_strategy_id, components)?;
    Ok(WindowedValueCoder::new(value, window))
}

fn window_coder(strategy_id: &str, components: &Components) -> Result<WindowCoder, ResolveError> {
    let strategy = components
        .windowing_strategies
        .get(strategy_id)
        .ok_or_else(|| ResolveError::UnknownWindowingStrategy(strategy_id.to_string()))?;
    let coder_id = &strategy.window_coder_id;
    let coder = components
        .coders
        .get(coder_id)
        .ok_or_else(|| ResolveError::UnknownCoder(coder_id.clone()))?;

    match coder.urn.as_str() {
        urn::GLOBAL_WINDOW => Ok(WindowCoder::Global),
        urn::INTERVAL_WINDOW => Ok(WindowCoder::Interval),
        other if urn::is_model(other) => Err(ResolveError::InvalidCoder {
            coder_id: coder_id.clone(),
            reason: format!("'{}' is not a window coder", other),
        }),
        other => Err(ResolveError::UnsupportedCoder {
            coder_id: coder_id.clone(),
            urn: other.to_string(),
        }),
    }
}

struct Resolver<'a> {
    components: &'a Components,
    policy: CoderPolicy,
}

impl Resolver<'_> {
    fn value_coder(&self, coder_id: &str, depth: usize) -> Result<CoderSpec, ResolveError> {
        if depth > MAX_DEPTH {
            return Err(ResolveError::InvalidCoder {
                coder_id: coder_id.to_string(),
                reason: "coder tree is too deep or cyclic".into(),
            });
        }

        let coder = self
            .components
            .coders
            .get(coder_id)
            .ok_or_else(|| ResolveError::UnknownCoder(coder_id.to_string()))?;
        let arity = |n: usize| -> Result<(), ResolveError> {
            if coder.components.len() == n {
                Ok(())
            } else {
                Err(ResolveError::InvalidCoder {
                    coder_id: coder_id.to_string(),
                    reason: format!("expected {} components, found {}", n, coder.components.len()),
                })
            }
        };

        match coder.urn.as_str() {
            urn::BYTES => arity(0).map(|_| CoderSpec::Bytes),
            urn::STRING_UTF8 => arity(0).map(|_| CoderSpec::StringUtf8),
            urn::VARINT => arity(0).map(|_| CoderSpec::VarInt),
            urn::DOUBLE => arity(0).map(|_| CoderSpec::Double),
            urn::BOOL => arity(0).map(|_| CoderSpec::Bool),
            urn::KV => {
                arity(2)?;
                Ok(CoderSpec::kv(
                    self.value_coder(&coder.components[0], depth + 1)?,
                    self.value_coder(&coder.components[1], depth + 1)?,
                ))
            }
            urn::ITERABLE => {
                arity(1)?;
                Ok(CoderSpec::iterable(
                    self.value_coder(&coder.components[0], depth + 1)?,
                ))
            }
            urn::LENGTH_PREFIX => {
                arity(1)?;
                // An explicit length prefix already delimits its contents.
                let inner = match self.policy {
                    CoderPolicy::ReplaceUnknownWithBytes
                        if !self.is_model_tree(&coder.components[0], depth + 1)? =>
                    {
                        CoderSpec::Bytes
                    }
                    _ => Resolver {
                        components: self.components,
                        policy: CoderPolicy::AsDeclared,
                    }
                    .value_coder(&coder.components[0], depth + 1)?,
                };
                Ok(CoderSpec::length_prefix(inner))
            }
            urn::GLOBAL_WINDOW | urn::INTERVAL_WINDOW => Err(ResolveError::InvalidCoder {
                coder_id: coder_id.to_string(),
                reason: "window coders cannot encode values".into(),
            }),
            urn::SERDE => {
                let format =
                    SerdeFormat::parse(&coder.payload).ok_or_else(|| ResolveError::InvalidCoder {
                        coder_id: coder_id.to_string(),
                        reason: format!("unknown serde format '{}'", coder.payload),
                    })?;
                Ok(self.unknown(CoderSpec::Serde(format)))
            }
            other => match self.policy {
                CoderPolicy::ReplaceUnknownWithBytes => Ok(self.unknown(CoderSpec::Bytes)),
                _ => Err(ResolveError::UnsupportedCoder {
                    coder_id: coder_id.to_string(),
                    urn: other.to_string(),
                }),
            },
        }
    }

    /// Apply the policy to a coder this runtime treats as opaque.
    fn unknown(&self, declared: CoderSpec) -> CoderSpec {
        match self.policy {
            CoderPolicy::AsDeclared => declared,
            CoderPolicy::LengthPrefixUnknown => CoderSpec::length_prefix(declared),
            CoderPolicy::ReplaceUnknownWithBytes => CoderSpec::length_prefix(CoderSpec::Bytes),
        }
    }

    fn is_model_tree(&self, coder_id: &str, depth: usize) -> Result<bool, ResolveError> {
        if depth > MAX_DEPTH {
            return Ok(false);
        }
        let coder = self
            .components
            .coders
            .get(coder_id)
            .ok_or_else(|| ResolveError::UnknownCoder(coder_id.to_string()))?;
        if !urn::is_model(&coder.urn) {
            return Ok(false);
        }
        for component in &coder.components {
            if !self.is_model_tree(component, depth + 1)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Errors raised while resolving coders.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("unknown coder '{0}'")]
    UnknownCoder(String),

    #[error("unknown windowing strategy '{0}'")]
    UnknownWindowingStrategy(String),

    #[error("coder '{coder_id}' has unsupported URN '{urn}'")]
    UnsupportedCoder { coder_id: String, urn: String },

    #[error("invalid coder '{coder_id}': {reason}")]
    InvalidCoder { coder_id: String, reason: String },
}
