//! Model Registry (C1) — a pure lookup over a compiled-in catalog.
//!
//! Free of I/O and free of global mutable state: every catalog entry is a
//! `&'static` reference into a `const` array, so lookups never allocate and
//! never touch a lock.

use std::sync::Once;

/// Declared type of a generation parameter (temperature, max_tokens, ...).
/// The declared type is authoritative — a value that merely happens to
/// parse as the wrong type (an integer where a float is declared) is
/// still rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Float,
    Int,
    String,
}

/// A constant-constructible parameter value, used both for declared
/// defaults/bounds and for runtime values supplied by a caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(&'static str),
}

impl ParamValue {
    fn type_name(&self) -> ParamType {
        match self {
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Str(_) => ParamType::String,
        }
    }
}

/// A declared generation parameter: its type, default, and optional
/// bounds/enumeration used by `validate_parameter`.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default: ParamValue,
    pub min: Option<ParamValue>,
    pub max: Option<ParamValue>,
    pub enumeration: Option<&'static [&'static str]>,
}

/// Immutable, process-lifetime model identity and limits.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    /// The API model id — also the registry lookup key.
    pub id: &'static str,
    pub display_name: &'static str,
    pub provider: &'static str,
    /// Maximum tokens the model will accept as input.
    pub context_window: u64,
    pub max_output_tokens: u64,
    pub parameters: &'static [ParameterSpec],
    pub deprecated: bool,
}

const TEMPERATURE: ParameterSpec = ParameterSpec {
    name: "temperature",
    param_type: ParamType::Float,
    default: ParamValue::Float(0.7),
    min: Some(ParamValue::Float(0.0)),
    max: Some(ParamValue::Float(2.0)),
    enumeration: None,
};

const GOOGLE_PARAMS: &[ParameterSpec] = &[
    TEMPERATURE,
    ParameterSpec {
        name: "max_tokens",
        param_type: ParamType::Int,
        default: ParamValue::Int(8192),
        min: Some(ParamValue::Int(1)),
        max: Some(ParamValue::Int(65_536)),
        enumeration: None,
    },
];

const ANTHROPIC_PARAMS: &[ParameterSpec] = &[
    TEMPERATURE,
    ParameterSpec {
        name: "max_tokens",
        param_type: ParamType::Int,
        default: ParamValue::Int(4096),
        min: Some(ParamValue::Int(1)),
        max: Some(ParamValue::Int(32_768)),
        enumeration: None,
    },
];

const OPENAI_PARAMS: &[ParameterSpec] = &[
    TEMPERATURE,
    ParameterSpec {
        name: "max_tokens",
        param_type: ParamType::Int,
        default: ParamValue::Int(4096),
        min: Some(ParamValue::Int(1)),
        max: Some(ParamValue::Int(16_384)),
        enumeration: None,
    },
    ParameterSpec {
        name: "reasoning_effort",
        param_type: ParamType::String,
        default: ParamValue::Str("medium"),
        min: None,
        max: None,
        enumeration: Some(&["low", "medium", "high"]),
    },
];

const GROQ_PARAMS: &[ParameterSpec] = &[
    TEMPERATURE,
    ParameterSpec {
        name: "max_tokens",
        param_type: ParamType::Int,
        default: ParamValue::Int(4096),
        min: Some(ParamValue::Int(1)),
        max: Some(ParamValue::Int(8_192)),
        enumeration: None,
    },
];

const DEEPSEEK_PARAMS: &[ParameterSpec] = &[
    TEMPERATURE,
    ParameterSpec {
        name: "max_tokens",
        param_type: ParamType::Int,
        default: ParamValue::Int(4096),
        min: Some(ParamValue::Int(1)),
        max: Some(ParamValue::Int(8_192)),
        enumeration: None,
    },
];

const PERPLEXITY_PARAMS: &[ParameterSpec] = &[
    ParameterSpec {
        name: "max_tokens",
        param_type: ParamType::Int,
        default: ParamValue::Int(4096),
        min: Some(ParamValue::Int(1)),
        max: Some(ParamValue::Int(8_192)),
        enumeration: None,
    },
];

const GOOGLE_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "gemini-3-pro-preview",
        display_name: "Gemini 3 Pro (Preview)",
        provider: "google",
        context_window: 2_000_000,
        max_output_tokens: 65_536,
        parameters: GOOGLE_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "gemini-3-flash-preview",
        display_name: "Gemini 3 Flash (Preview)",
        provider: "google",
        context_window: 1_000_000,
        max_output_tokens: 65_536,
        parameters: GOOGLE_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        provider: "google",
        context_window: 1_000_000,
        max_output_tokens: 65_536,
        parameters: GOOGLE_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        provider: "google",
        context_window: 1_000_000,
        max_output_tokens: 65_536,
        parameters: GOOGLE_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "gemini-2.5-flash-lite",
        display_name: "Gemini 2.5 Flash-Lite",
        provider: "google",
        context_window: 1_000_000,
        max_output_tokens: 65_536,
        parameters: GOOGLE_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "gemini-2.0-flash",
        display_name: "Gemini 2.0 Flash",
        provider: "google",
        context_window: 1_000_000,
        max_output_tokens: 8_192,
        parameters: GOOGLE_PARAMS,
        deprecated: true,
    },
];

const ANTHROPIC_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "claude-opus-4-20250514",
        display_name: "Claude Opus 4",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 32_768,
        parameters: ANTHROPIC_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "claude-sonnet-4-20250514",
        display_name: "Claude Sonnet 4",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 16_384,
        parameters: ANTHROPIC_PARAMS,
        deprecated: false,
    },
];

const OPENAI_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "gpt-4o",
        display_name: "GPT-4o",
        provider: "openai",
        context_window: 128_000,
        max_output_tokens: 16_384,
        parameters: OPENAI_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        display_name: "GPT-4o mini",
        provider: "openai",
        context_window: 128_000,
        max_output_tokens: 16_384,
        parameters: OPENAI_PARAMS,
        deprecated: false,
    },
];

const GROQ_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "llama-3.3-70b-versatile",
        display_name: "Llama 3.3 70B Versatile",
        provider: "groq",
        context_window: 128_000,
        max_output_tokens: 32_768,
        parameters: GROQ_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "llama-3.1-8b-instant",
        display_name: "Llama 3.1 8B Instant",
        provider: "groq",
        context_window: 128_000,
        max_output_tokens: 8_192,
        parameters: GROQ_PARAMS,
        deprecated: false,
    },
];

const DEEPSEEK_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "deepseek-chat",
        display_name: "DeepSeek Chat",
        provider: "deepseek",
        context_window: 64_000,
        max_output_tokens: 8_192,
        parameters: DEEPSEEK_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "deepseek-reasoner",
        display_name: "DeepSeek Reasoner (R1)",
        provider: "deepseek",
        context_window: 64_000,
        max_output_tokens: 8_192,
        parameters: DEEPSEEK_PARAMS,
        deprecated: false,
    },
];

const PERPLEXITY_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "sonar-pro",
        display_name: "Sonar Pro",
        provider: "perplexity",
        context_window: 200_000,
        max_output_tokens: 8_192,
        parameters: PERPLEXITY_PARAMS,
        deprecated: false,
    },
    ModelInfo {
        id: "sonar",
        display_name: "Sonar",
        provider: "perplexity",
        context_window: 128_000,
        max_output_tokens: 8_192,
        parameters: PERPLEXITY_PARAMS,
        deprecated: false,
    },
];

const CATALOG: &[&[ModelInfo]] = &[
    GOOGLE_MODELS,
    ANTHROPIC_MODELS,
    OPENAI_MODELS,
    GROQ_MODELS,
    DEEPSEEK_MODELS,
    PERPLEXITY_MODELS,
];

static WARN_UNKNOWN_PARAM_ONCE: Once = Once::new();

/// `GetModelInfo(name) -> ModelInfo | NotFound`.
pub fn get_model_info(name: &str) -> Option<&'static ModelInfo> {
    CATALOG
        .iter()
        .flat_map(|models| models.iter())
        .find(|m| m.id == name)
}

/// `GetProviderForModel(name) -> provider name | NotFound`.
pub fn get_provider_for_model(name: &str) -> Option<&'static str> {
    get_model_info(name).map(|m| m.provider)
}

/// `ListAllModels() -> sequence`.
pub fn list_all_models() -> impl Iterator<Item = &'static ModelInfo> {
    CATALOG.iter().flat_map(|models| models.iter())
}

/// `ListModelsForProvider(provider) -> sequence`.
pub fn list_models_for_provider(provider: &str) -> Vec<&'static ModelInfo> {
    list_all_models().filter(|m| m.provider == provider).collect()
}

/// `GetAPIKeyEnvVar(provider) -> string`. Catalog-driven with a
/// hard-coded default shape: provider "p" -> "P_API_KEY".
pub fn get_api_key_env_var(provider: &str) -> String {
    match provider {
        "openai" => "OPENAI_API_KEY".to_string(),
        "anthropic" => "ANTHROPIC_API_KEY".to_string(),
        "google" => "GOOGLE_API_KEY".to_string(),
        "groq" => "GROQ_API_KEY".to_string(),
        "deepseek" => "DEEPSEEK_API_KEY".to_string(),
        "perplexity" => "PERPLEXITY_API_KEY".to_string(),
        other => format!("{}_API_KEY", other.to_uppercase()),
    }
}

/// `ValidateParameter(model, paramName, value) -> ok | error(kind, message)`.
///
/// Declared type is authoritative: a value that merely parses as another
/// type is rejected. An undeclared parameter name is logged once (at the
/// process level) and accepted. Absent min/max bounds are wildcards.
pub fn validate_parameter(
    model: &str,
    param_name: &str,
    value: ParamValue,
) -> Result<(), crate::error::TaxonomyError> {
    use crate::error::{ErrorKind, TaxonomyError};

    let info = get_model_info(model).ok_or_else(|| {
        TaxonomyError::new(ErrorKind::ModelNotFound, format!("unknown model '{model}'"))
    })?;

    let Some(spec) = info.parameters.iter().find(|p| p.name == param_name) else {
        WARN_UNKNOWN_PARAM_ONCE.call_once(|| {
            tracing::warn!(model, param_name, "unrecognized parameter; accepting as-is");
        });
        return Ok(());
    };

    if value.type_name() != spec.param_type {
        return Err(TaxonomyError::new(
            ErrorKind::InvalidConfiguration,
            format!(
                "parameter '{param_name}' for model '{model}' expects {:?}, got {:?}",
                spec.param_type,
                value.type_name()
            ),
        ));
    }

    match (value, spec.min, spec.max) {
        (ParamValue::Float(v), min, max) => {
            if let Some(ParamValue::Float(lo)) = min {
                if v < lo {
                    return Err(out_of_range(model, param_name, v, lo, "min"));
                }
            }
            if let Some(ParamValue::Float(hi)) = max {
                if v > hi {
                    return Err(out_of_range(model, param_name, v, hi, "max"));
                }
            }
        }
        (ParamValue::Int(v), min, max) => {
            if let Some(ParamValue::Int(lo)) = min {
                if v < lo {
                    return Err(out_of_range(model, param_name, v, lo, "min"));
                }
            }
            if let Some(ParamValue::Int(hi)) = max {
                if v > hi {
                    return Err(out_of_range(model, param_name, v, hi, "max"));
                }
            }
        }
        (ParamValue::Str(v), _, _) => {
            if let Some(allowed) = spec.enumeration {
                if !allowed.contains(&v) {
                    return Err(TaxonomyError::new(
                        ErrorKind::InvalidConfiguration,
                        format!(
                            "parameter '{param_name}' for model '{model}' must be one of {allowed:?}, got '{v}'"
                        ),
                    ));
                }
            }
        }
    }

    Ok(())
}

fn out_of_range(
    model: &str,
    param_name: &str,
    value: impl std::fmt::Display,
    bound: impl std::fmt::Display,
    which: &str,
) -> crate::error::TaxonomyError {
    crate::error::TaxonomyError::new(
        crate::error::ErrorKind::InvalidConfiguration,
        format!("parameter '{param_name}' for model '{model}' value {value} violates {which} bound {bound}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_model_info_finds_known_model() {
        let info = get_model_info("gemini-2.5-pro").unwrap();
        assert_eq!(info.provider, "google");
        assert_eq!(info.context_window, 1_000_000);
    }

    #[test]
    fn get_model_info_returns_none_for_unknown() {
        assert!(get_model_info("not-a-real-model").is_none());
    }

    #[test]
    fn get_provider_for_model_resolves_provider() {
        assert_eq!(get_provider_for_model("claude-sonnet-4-20250514"), Some("anthropic"));
    }

    #[test]
    fn list_models_for_provider_filters_correctly() {
        let models = list_models_for_provider("openai");
        assert_eq!(models.len(), 2);
        assert!(models.iter().all(|m| m.provider == "openai"));
    }

    #[test]
    fn api_key_env_var_follows_catalog_shape() {
        assert_eq!(get_api_key_env_var("openai"), "OPENAI_API_KEY");
        assert_eq!(get_api_key_env_var("some-new-vendor"), "SOME-NEW-VENDOR_API_KEY");
    }

    #[test]
    fn validate_parameter_accepts_in_range_value() {
        assert!(validate_parameter("gpt-4o", "temperature", ParamValue::Float(0.5)).is_ok());
    }

    #[test]
    fn validate_parameter_rejects_out_of_range_value() {
        let err = validate_parameter("gpt-4o", "temperature", ParamValue::Float(5.0)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn validate_parameter_rejects_wrong_declared_type() {
        let err = validate_parameter("gpt-4o", "max_tokens", ParamValue::Float(1.5)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn validate_parameter_accepts_unknown_parameter_name() {
        assert!(validate_parameter("gpt-4o", "totally_unknown_param", ParamValue::Int(1)).is_ok());
    }

    #[test]
    fn validate_parameter_enforces_enumeration() {
        assert!(validate_parameter("gpt-4o", "reasoning_effort", ParamValue::Str("high")).is_ok());
        assert!(validate_parameter("gpt-4o", "reasoning_effort", ParamValue::Str("extreme")).is_err());
    }

    #[test]
    fn validate_parameter_unknown_model_is_model_not_found() {
        let err = validate_parameter("nope", "temperature", ParamValue::Float(0.5)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ModelNotFound);
    }
}
