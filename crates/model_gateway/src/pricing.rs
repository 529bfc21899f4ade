//! Cost computation for token usage.
//!
//! Pure functions of a pricing policy and observed token counts. Anything
//! that affects billing correctness lives here; scoring heuristics that only
//! affect selection live in the selector.

use serde::{Deserialize, Serialize};

use modelflow_core::types::{PricingPolicy, TokenUsage};

/// Estimate the cost of a generation under a pricing policy.
pub fn estimate_cost(policy: &PricingPolicy, usage: &TokenUsage) -> f64 {
    match policy {
        PricingPolicy::Free | PricingPolicy::Subscription => 0.0,
        PricingPolicy::PerToken {
            input_cost,
            output_cost,
            ..
        } => usage.input_tokens as f64 * input_cost + usage.output_tokens as f64 * output_cost,
        PricingPolicy::PerRequest { cost, .. } => *cost,
    }
}

/// Itemized cost for a hypothetical token count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total: f64,
    pub currency: String,
}

/// Compute a cost breakdown for the given token counts.
///
/// Only per-token policies have a meaningful input/output split; flat and
/// free policies report everything under `total`.
pub fn cost_breakdown(policy: &PricingPolicy, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
    let usage = TokenUsage::new(input_tokens, output_tokens);
    match policy {
        PricingPolicy::PerToken {
            input_cost,
            output_cost,
            currency,
        } => CostBreakdown {
            input_cost: input_tokens as f64 * input_cost,
            output_cost: output_tokens as f64 * output_cost,
            total: estimate_cost(policy, &usage),
            currency: currency.clone(),
        },
        other => CostBreakdown {
            input_cost: 0.0,
            output_cost: 0.0,
            total: estimate_cost(other, &usage),
            currency: other.currency().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_token_cost() {
        let policy = PricingPolicy::per_token(0.001, 0.002);

        // 100 input + 50 output = 0.1 + 0.1 = 0.2
        let cost = estimate_cost(&policy, &TokenUsage::new(100, 50));
        assert!((cost - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_free_and_subscription_cost_nothing() {
        let usage = TokenUsage::new(10_000, 10_000);
        assert_eq!(estimate_cost(&PricingPolicy::Free, &usage), 0.0);
        assert_eq!(estimate_cost(&PricingPolicy::Subscription, &usage), 0.0);
    }

    #[test]
    fn test_per_request_flat_cost() {
        let policy = PricingPolicy::PerRequest {
            cost: 0.05,
            currency: "USD".to_string(),
        };
        assert_eq!(estimate_cost(&policy, &TokenUsage::new(1, 1)), 0.05);
        assert_eq!(estimate_cost(&policy, &TokenUsage::new(9999, 9999)), 0.05);
    }

    #[test]
    fn test_per_token_monotonic() {
        let policy = PricingPolicy::per_token(0.001, 0.002);

        let mut previous = -1.0;
        for tokens in [0u64, 1, 10, 100, 1000] {
            let cost = estimate_cost(&policy, &TokenUsage::new(tokens, tokens));
            assert!(cost >= previous);
            previous = cost;
        }
    }

    #[test]
    fn test_breakdown_split() {
        let policy = PricingPolicy::per_token(0.001, 0.002);
        let breakdown = cost_breakdown(&policy, 100, 50);

        assert!((breakdown.input_cost - 0.1).abs() < 1e-9);
        assert!((breakdown.output_cost - 0.1).abs() < 1e-9);
        assert!((breakdown.total - 0.2).abs() < 1e-9);
        assert_eq!(breakdown.currency, "USD");
    }
}
