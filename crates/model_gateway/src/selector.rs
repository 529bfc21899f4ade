//! Score-based model selection.
//!
//! Scoring is a pure, in-memory computation over catalog snapshots; it never
//! suspends. The registry feeds it candidates in stable insertion order,
//! which is also the documented tie-break: the first candidate with the
//! highest score wins.

use modelflow_core::types::{GenerationRequest, HealthStatus, ModelDescriptor, PricingPolicy, ProviderKind};

/// Health contribution. The candidate pool is already health-filtered, so
/// today this is a constant bias; reserved for partial-health states.
const HEALTH_SCORE: f64 = 50.0;

/// Latency score for a model without any recorded samples. Keeps fresh
/// catalog entries from being starved by established ones.
const NEW_MODEL_LATENCY_SCORE: f64 = 25.0;

/// Bonus when the request's token demand fits the model's context window.
const CAPABILITY_BONUS: f64 = 20.0;

/// Cost-efficiency contribution, 0–30 points. Cheaper models score higher.
pub fn cost_efficiency_score(pricing: &PricingPolicy) -> f64 {
    match pricing {
        PricingPolicy::Free => 30.0,
        PricingPolicy::PerToken {
            input_cost,
            output_cost,
            ..
        } => {
            let avg_cost = (input_cost + output_cost) / 2.0;
            (30.0 - avg_cost * 3000.0).max(0.0)
        }
        _ => 15.0,
    }
}

/// Fixed additive bias per provider family. A policy knob for breaking ties
/// toward preferred ecosystems, not a correctness requirement.
pub fn provider_bias(provider: ProviderKind) -> f64 {
    match provider {
        ProviderKind::HostedB => 10.0,
        ProviderKind::HostedA => 8.0,
        ProviderKind::Local => 15.0,
        ProviderKind::Custom => 0.0,
    }
}

/// Score one candidate for a request.
pub fn score_model(
    descriptor: &ModelDescriptor,
    average_latency_ms: Option<f64>,
    request: &GenerationRequest,
) -> f64 {
    let mut score = 0.0;

    if descriptor.health_status == HealthStatus::Healthy {
        score += HEALTH_SCORE;
    }

    // Faster models score higher; unmeasured models get the new-model default.
    match average_latency_ms {
        Some(avg) if avg > 0.0 => score += (50.0 - avg / 100.0).max(0.0),
        _ => score += NEW_MODEL_LATENCY_SCORE,
    }

    score += cost_efficiency_score(&descriptor.pricing);

    if let Some(max_tokens) = request.max_tokens {
        if max_tokens <= descriptor.max_context {
            score += CAPABILITY_BONUS;
        }
    }

    score += provider_bias(descriptor.provider);

    score
}

/// Pick the best-scoring candidate. Candidates must already be filtered to
/// active + healthy models and arrive in catalog insertion order; ties keep
/// the earlier candidate.
pub fn select_best<'a, I>(candidates: I, request: &GenerationRequest) -> Option<String>
where
    I: IntoIterator<Item = (&'a ModelDescriptor, Option<f64>)>,
{
    let mut best: Option<(String, f64)> = None;

    for (descriptor, avg_latency) in candidates {
        let score = score_model(descriptor, avg_latency, request);
        tracing::debug!(model = %descriptor.model_id, score, "Scored candidate");

        match &best {
            Some((_, best_score)) if score <= *best_score => {}
            _ => best = Some((descriptor.model_id.clone(), score)),
        }
    }

    if let Some((model_id, score)) = &best {
        tracing::info!(model = %model_id, score, "Selected model");
    }

    best.map(|(model_id, _)| model_id)
}
