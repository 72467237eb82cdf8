use serde::{Deserialize, Serialize};
use tiktoken_rs::{get_bpe_from_model, o200k_base, CoreBPE};
use tracing::debug;

/// Backend pricing in USD per 1K tokens: (model, input, output).
/// https://platform.openai.com/docs/pricing
const PRICING: &[(&str, f64, f64)] = &[
    // GPT-5 series
    ("gpt-5", 0.00125, 0.010),
    ("gpt-5-mini", 0.00025, 0.002),
    ("gpt-5-nano", 0.00005, 0.0004),
    ("gpt-5-chat-latest", 0.00125, 0.010),
    ("gpt-5-codex", 0.00125, 0.010),
    ("gpt-5-pro", 0.015, 0.120),
    // GPT-4.1 series
    ("gpt-4.1", 0.002, 0.008),
    ("gpt-4.1-mini", 0.0004, 0.0016),
    ("gpt-4.1-nano", 0.0001, 0.0004),
    // O-series reasoning models
    ("o1", 0.015, 0.060),
    ("o1-pro", 0.150, 0.600),
    ("o3", 0.002, 0.008),
    ("o3-pro", 0.020, 0.080),
    ("o3-deep-research", 0.010, 0.040),
    ("o4-mini", 0.0011, 0.0044),
    ("o4-mini-deep-research", 0.002, 0.008),
    ("o3-mini", 0.0011, 0.0044),
    ("o1-mini", 0.0011, 0.0044),
    // GPT-4o series
    ("gpt-4o", 0.0025, 0.010),
    ("gpt-4o-mini", 0.000150, 0.000600),
    ("gpt-4o-2024-05-13", 0.005, 0.015),
    // Realtime models
    ("gpt-realtime", 0.004, 0.016),
    ("gpt-realtime-mini", 0.0006, 0.0024),
    // Legacy models
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-32k", 0.06, 0.12),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
    ("gpt-3.5-turbo-16k", 0.003, 0.004),
];

/// Fallback tier for unknown models (gpt-4.1-mini rates).
const DEFAULT_PRICING: (f64, f64) = (0.0004, 0.0016);

/// Substring patterns for versioned model names, ordered most specific
/// first so e.g. "gpt-4o-mini-2024-07-18" resolves before "gpt-4o".
const MODEL_PATTERNS: &[&str] = &[
    "gpt-5-pro",
    "gpt-5-nano",
    "gpt-5-mini",
    "gpt-5-chat-latest",
    "gpt-5-codex",
    "gpt-5",
    "gpt-4.1-nano",
    "gpt-4.1-mini",
    "gpt-4.1",
    "o4-mini-deep-research",
    "o4-mini",
    "o3-deep-research",
    "o3-pro",
    "o3-mini",
    "o3",
    "o1-pro",
    "o1-mini",
    "o1",
    "gpt-4o-mini",
    "gpt-4o-2024-05-13",
    "gpt-4o",
    "gpt-realtime-mini",
    "gpt-realtime",
    "gpt-4-turbo",
    "gpt-4-32k",
    "gpt-4",
    "gpt-3.5-turbo-16k",
    "gpt-3.5-turbo",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Token usage and cost for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageMetrics {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl UsageMetrics {
    pub fn from_counts(model: &str, input_tokens: u64, output_tokens: u64) -> Self {
        let cost = calculate_cost(model, input_tokens, output_tokens);
        Self {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            input_cost_usd: cost.input_cost,
            output_cost_usd: cost.output_cost,
            total_cost_usd: cost.total_cost,
        }
    }

    pub fn zero(model: &str) -> Self {
        Self::from_counts(model, 0, 0)
    }
}

/// Map a model name onto a pricing-table key: exact match first, then
/// the most specific matching substring pattern, then the default tier.
pub fn normalize_model_name(model: &str) -> &'static str {
    let lower = model.to_lowercase();
    let lower = lower.trim();

    if let Some(&(name, _, _)) = PRICING.iter().find(|(name, _, _)| *name == lower) {
        return name;
    }

    for &pattern in MODEL_PATTERNS {
        if lower.contains(pattern) {
            return pattern;
        }
    }

    "default"
}

/// Cost of a request in USD, rounded to 6 decimal places per component.
/// Pure function of (model, input_tokens, output_tokens).
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
    let normalized = normalize_model_name(model);
    let (input_price, output_price) = PRICING
        .iter()
        .find(|(name, _, _)| *name == normalized)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_PRICING);

    let input_cost = (input_tokens as f64 / 1000.0) * input_price;
    let output_cost = (output_tokens as f64 / 1000.0) * output_price;

    CostBreakdown {
        input_cost: round6(input_cost),
        output_cost: round6(output_cost),
        total_cost: round6(input_cost + output_cost),
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Counts tokens with the model's canonical encoding, falling back to
/// o200k_base for models tiktoken does not recognize.
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    pub fn new(model: &str) -> Self {
        let bpe = get_bpe_from_model(model).unwrap_or_else(|_| {
            debug!("No tiktoken encoding for '{}', falling back to o200k_base", model);
            o200k_base().expect("o200k_base encoding should always load")
        });

        Self { bpe }
    }

    pub fn count(&self, text: &str) -> u64 {
        self.bpe.encode_ordinary(text).len() as u64
    }

    /// Approximate token count for a chat exchange: roles and contents
    /// joined line by line, the way the backend sees them.
    pub fn count_messages(&self, messages: &[(&str, &str)]) -> u64 {
        let joined = messages
            .iter()
            .map(|(role, content)| format!("{}: {}", role, content))
            .collect::<Vec<_>>()
            .join("\n");
        self.count(&joined)
    }
}

/// Pre-flight cost estimate for a set of texts. Output tokens are
/// approximated at 1.2x the input, which tracks translation well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub model: String,
    pub text_count: usize,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub estimated_total_tokens: u64,
    pub estimated_cost: CostBreakdown,
}

pub fn estimate_translation_cost(texts: &[String], model: &str) -> CostEstimate {
    let counter = TokenCounter::new(model);

    let non_empty: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
    let input_tokens: u64 = non_empty.iter().map(|t| counter.count(t)).sum();
    let output_tokens = (input_tokens as f64 * 1.2) as u64;

    CostEstimate {
        model: model.to_string(),
        text_count: non_empty.len(),
        estimated_input_tokens: input_tokens,
        estimated_output_tokens: output_tokens,
        estimated_total_tokens: input_tokens + output_tokens,
        estimated_cost: calculate_cost(model, input_tokens, output_tokens),
    }
}
