//! Backend selection policies

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the active backend is chosen among connected ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Rotate through connected backends
    #[default]
    RoundRobin,
    /// Fewest sends in flight
    LeastConnections,
    /// Uniformly random
    Random,
    /// Random, proportional to configured weight
    Weighted,
}

/// A connected backend eligible for selection
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Backend address
    pub url: &'a str,
    /// Configured weight
    pub weight: u32,
    /// Sends currently in flight
    pub active_connections: usize,
}

/// Stateful selector
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    cursor: usize,
}

impl LoadBalancer {
    /// Create a selector for `strategy`
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            cursor: 0,
        }
    }

    /// Current strategy
    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Switch strategy and reset the round-robin cursor
    pub fn set_strategy(&mut self, strategy: LoadBalancingStrategy) {
        self.strategy = strategy;
        self.cursor = 0;
    }

    /// Index of the chosen candidate
    pub fn select(&mut self, candidates: &[Candidate<'_>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let index = self.cursor % candidates.len();
                self.cursor = self.cursor.wrapping_add(1);
                index
            }
            LoadBalancingStrategy::LeastConnections => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, candidate)| candidate.active_connections)
                .map_or(0, |(index, _)| index),
            LoadBalancingStrategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
            LoadBalancingStrategy::Weighted => {
                let total: u64 = candidates.iter().map(|c| u64::from(c.weight)).sum();
                if total == 0 {
                    0
                } else {
                    let mut point = rand::thread_rng().gen_range(0..total);
                    candidates
                        .iter()
                        .position(|candidate| {
                            let weight = u64::from(candidate.weight);
                            if point < weight {
                                true
                            } else {
                                point -= weight;
                                false
                            }
                        })
                        .unwrap_or(0)
                }
            }
        };
        Some(chosen)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalancingStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Candidate<'static>> {
        vec![
            Candidate { url: "a", weight: 1, active_connections: 3 },
            Candidate { url: "b", weight: 0, active_connections: 1 },
            Candidate { url: "c", weight: 1, active_connections: 2 },
        ]
    }

    #[test]
    fn test_round_robin_wraps() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::RoundRobin);
        let picks: Vec<_> = (0..4).filter_map(|_| lb.select(&candidates())).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_least_connections() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::LeastConnections);
        assert_eq!(lb.select(&candidates()), Some(1));
    }

    #[test]
    fn test_weighted_skips_zero_weight() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::Weighted);
        for _ in 0..50 {
            assert_ne!(lb.select(&candidates()), Some(1));
        }
    }

    #[test]
    fn test_empty_returns_none() {
        let mut lb = LoadBalancer::default();
        assert_eq!(lb.select(&[]), None);
    }
}
