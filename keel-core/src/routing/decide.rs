//! Route decision.

use super::config::ProviderRoutingConfig;
use crate::types::{Budget, Complexity, ProviderRoute, RouteHint};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// What the router looks at for one call
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteInput<'a> {
    pub prompt: &'a str,
    pub system_prompt: Option<&'a str>,
    pub hint: Option<&'a RouteHint>,
}

/// Outcome of routing one call.
///
/// Recomputed per call, never cached.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    pub selected: ProviderRoute,
    /// Routes to attempt, in order. May be empty when the policy filters out everything.
    pub candidates: Vec<ProviderRoute>,
    pub reason: String,
    pub metadata: BTreeMap<String, Value>,
}

/// Select a primary route and an ordered list of fallback candidates.
///
/// Pure: identical input yields identical output.
pub fn decide_provider_route(config: &ProviderRoutingConfig, input: RouteInput<'_>) -> RouteDecision {
    let mut metadata = BTreeMap::new();
    let mut selected = config.primary.clone();
    let mut reason = "primary".to_string();

    let hint = input.hint;
    let complexity = hint.and_then(|h| h.complexity);
    let budget = hint.and_then(|h| h.budget);

    if let (Some(complexity), Some(heuristic)) = (complexity, &config.heuristic) {
        selected = match complexity {
            Complexity::High => heuristic.high.clone(),
            Complexity::Low => heuristic.low.clone(),
        };
        reason = format!("hint.complexity={}", complexity.as_str());
    } else if let (Some(budget), Some(heuristic)) = (budget, &config.heuristic) {
        selected = match budget {
            Budget::Low => heuristic.low.clone(),
            Budget::High => heuristic.high.clone(),
        };
        reason = format!("hint.budget={}", budget.as_str());
    } else if let Some(heuristic) = &config.heuristic {
        let total_chars = input.prompt.chars().count()
            + input.system_prompt.map_or(0, |s| s.chars().count());
        let complexity = if total_chars > heuristic.threshold_chars {
            Complexity::High
        } else {
            Complexity::Low
        };
        selected = match complexity {
            Complexity::High => heuristic.high.clone(),
            Complexity::Low => heuristic.low.clone(),
        };
        reason = format!("heuristic.complexity={}", complexity.as_str());
        metadata.insert("totalChars".to_string(), Value::from(total_chars));
        metadata.insert(
            "thresholdChars".to_string(),
            Value::from(heuristic.threshold_chars),
        );
    }

    let mut seen = HashSet::new();
    let mut candidates: Vec<ProviderRoute> = std::iter::once(&selected)
        .chain(config.fallbacks.iter())
        .chain(std::iter::once(&config.primary))
        .filter(|route| seen.insert((route.provider_id.as_str(), route.model_id.as_str())))
        .cloned()
        .collect();

    if let Some(policy) = &config.fallback_policy {
        if !policy.skip_provider_ids.is_empty() {
            let before = candidates.len();
            candidates.retain(|route| !policy.skip_provider_ids.contains(&route.provider_id));
            metadata.insert(
                "skippedCandidates".to_string(),
                Value::from(before - candidates.len()),
            );
        }
        if let Some(max_attempts) = policy.max_attempts {
            candidates.truncate(max_attempts);
            metadata.insert("maxAttempts".to_string(), Value::from(max_attempts));
        }
    }

    if !candidates.contains(&selected) {
        metadata.insert(
            "originalSelected".to_string(),
            Value::from(selected.to_string()),
        );
        match candidates.first() {
            Some(first) => {
                selected = first.clone();
                reason = "policy.overrideSelected".to_string();
            }
            None => reason = "policy.noCandidates".to_string(),
        }
    }

    RouteDecision {
        selected,
        candidates,
        reason,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::config::{FallbackPolicy, HeuristicConfig};
    use proptest::prelude::*;

    fn route(provider: &str, model: &str) -> ProviderRoute {
        ProviderRoute::new(provider, model)
    }

    fn config_with_heuristic() -> ProviderRoutingConfig {
        ProviderRoutingConfig::new(route("openai", "gpt-4o"))
            .with_fallback(route("deepseek", "deepseek-chat"))
            .with_heuristic(HeuristicConfig {
                threshold_chars: 10,
                low: route("openai", "gpt-4o-mini"),
                high: route("openai", "gpt-4o"),
            })
    }

    #[test]
    fn test_primary_only() {
        let config = ProviderRoutingConfig::new(route("openai", "gpt-4o"))
            .with_fallback(route("deepseek", "deepseek-chat"));
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "hi",
                ..Default::default()
            },
        );

        assert_eq!(decision.selected, route("openai", "gpt-4o"));
        assert_eq!(decision.reason, "primary");
        assert_eq!(
            decision.candidates,
            vec![route("openai", "gpt-4o"), route("deepseek", "deepseek-chat")]
        );
    }

    #[test]
    fn test_heuristic_by_length() {
        let config = config_with_heuristic();

        let short = decide_provider_route(
            &config,
            RouteInput {
                prompt: "short",
                ..Default::default()
            },
        );
        assert_eq!(short.selected, route("openai", "gpt-4o-mini"));
        assert_eq!(short.reason, "heuristic.complexity=low");
        assert_eq!(
            short.candidates,
            vec![
                route("openai", "gpt-4o-mini"),
                route("deepseek", "deepseek-chat"),
                route("openai", "gpt-4o"),
            ]
        );

        let long = decide_provider_route(
            &config,
            RouteInput {
                prompt: "a prompt",
                system_prompt: Some("with system"),
                hint: None,
            },
        );
        assert_eq!(long.selected, route("openai", "gpt-4o"));
        assert_eq!(long.reason, "heuristic.complexity=high");
        assert_eq!(long.metadata["totalChars"], Value::from(19));
        // selected == primary, de-duplicated
        assert_eq!(long.candidates.len(), 2);
    }

    #[test]
    fn test_hint_complexity_wins() {
        let config = config_with_heuristic();
        let low = RouteHint {
            complexity: Some(Complexity::Low),
            budget: Some(Budget::High),
        };
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "a very long prompt indeed",
                system_prompt: None,
                hint: Some(&low),
            },
        );
        assert_eq!(decision.selected, route("openai", "gpt-4o-mini"));
        assert_eq!(decision.reason, "hint.complexity=low");

        let high = RouteHint {
            complexity: Some(Complexity::High),
            budget: None,
        };
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "x",
                system_prompt: None,
                hint: Some(&high),
            },
        );
        assert_eq!(decision.selected, route("openai", "gpt-4o"));
        assert_eq!(decision.reason, "hint.complexity=high");
    }

    #[test]
    fn test_hint_budget() {
        let config = config_with_heuristic();
        let hint = RouteHint {
            complexity: None,
            budget: Some(Budget::Low),
        };
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "a very long prompt indeed",
                system_prompt: None,
                hint: Some(&hint),
            },
        );
        assert_eq!(decision.selected, route("openai", "gpt-4o-mini"));
        assert_eq!(decision.reason, "hint.budget=low");
    }

    #[test]
    fn test_skip_and_truncate() {
        let config = config_with_heuristic().with_fallback_policy(FallbackPolicy {
            skip_provider_ids: vec!["deepseek".to_string()],
            max_attempts: Some(1),
        });
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "short",
                ..Default::default()
            },
        );
        assert_eq!(decision.candidates, vec![route("openai", "gpt-4o-mini")]);
        assert_eq!(decision.reason, "heuristic.complexity=low");
    }

    #[test]
    fn test_policy_overrides_selected() {
        let config = ProviderRoutingConfig::new(route("openai", "gpt-4o"))
            .with_fallback(route("deepseek", "deepseek-chat"))
            .with_fallback_policy(FallbackPolicy {
                skip_provider_ids: vec!["openai".to_string()],
                max_attempts: None,
            });
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "hi",
                ..Default::default()
            },
        );
        assert_eq!(decision.selected, route("deepseek", "deepseek-chat"));
        assert_eq!(decision.reason, "policy.overrideSelected");
        assert_eq!(decision.candidates, vec![route("deepseek", "deepseek-chat")]);
    }

    #[test]
    fn test_skip_everything_is_valid() {
        let config = ProviderRoutingConfig::new(route("openai", "gpt-4o")).with_fallback_policy(
            FallbackPolicy {
                skip_provider_ids: vec!["openai".to_string()],
                max_attempts: None,
            },
        );
        let decision = decide_provider_route(
            &config,
            RouteInput {
                prompt: "hi",
                ..Default::default()
            },
        );
        assert!(decision.candidates.is_empty());
        assert_eq!(decision.reason, "policy.noCandidates");
    }

    proptest! {
        #[test]
        fn prop_decision_is_deterministic(
            prompt in ".{0,40}",
            system in proptest::option::of(".{0,20}"),
            complexity in proptest::option::of(prop_oneof![Just(Complexity::Low), Just(Complexity::High)]),
            threshold in 0usize..50,
        ) {
            let mut config = config_with_heuristic();
            if let Some(h) = config.heuristic.as_mut() {
                h.threshold_chars = threshold;
            }
            let hint = RouteHint { complexity, budget: None };
            let input = RouteInput {
                prompt: &prompt,
                system_prompt: system.as_deref(),
                hint: Some(&hint),
            };

            let first = decide_provider_route(&config, input);
            let second = decide_provider_route(&config, input);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.candidates.contains(&first.selected));

            if let Some(c) = complexity {
                let expected = match c {
                    Complexity::Low => route("openai", "gpt-4o-mini"),
                    Complexity::High => route("openai", "gpt-4o"),
                };
                prop_assert_eq!(first.selected, expected);
            }
        }
    }
}
