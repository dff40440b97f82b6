use std::collections::HashMap;

/// Endpoint defaults for an OpenAI-compatible provider.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    let (default_base_url, needs_api_key, extra_headers): (_, _, &'static [(&str, &str)]) =
        match provider {
            "openai" => ("https://api.openai.com/v1/chat/completions", true, &[]),
            "ollama" => ("http://localhost:11434/v1/chat/completions", false, &[]),
            "groq" => ("https://api.groq.com/openai/v1/chat/completions", true, &[]),
            "openrouter" => (
                "https://openrouter.ai/api/v1/chat/completions",
                true,
                &[("X-Title", "weft")],
            ),
            "together" => ("https://api.together.xyz/v1/chat/completions", true, &[]),
            "mistral" => ("https://api.mistral.ai/v1/chat/completions", true, &[]),
            "deepseek" => ("https://api.deepseek.com/v1/chat/completions", true, &[]),
            "xai" => ("https://api.x.ai/v1/chat/completions", true, &[]),
            _ => return None,
        };
    Some(ProviderPreset {
        default_base_url,
        needs_api_key,
        extra_headers,
    })
}

/// Preset headers merged with configured ones; configured values win.
pub fn build_extra_headers(
    preset: Option<&ProviderPreset>,
    user_headers: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = preset
        .map(|p| p.extra_headers)
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (k, v) in user_headers {
        match headers.iter_mut().find(|(hk, _)| hk.eq_ignore_ascii_case(k)) {
            Some(existing) => existing.1 = v.clone(),
            None => headers.push((k.clone(), v.clone())),
        }
    }

    headers
}

/// Names of every OpenAI-compatible preset.
pub fn all_preset_names() -> &'static [&'static str] {
    &[
        "openai",
        "ollama",
        "groq",
        "openrouter",
        "together",
        "mistral",
        "deepseek",
        "xai",
    ]
}
