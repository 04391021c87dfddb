use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::error::{LaunchError, LaunchResult};
use crate::search::trial::Trial;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Distinct grid points drawn at random, up to the trial budget
    #[default]
    #[value(name = "grid_search", alias = "grid")]
    GridSearch,
    /// Independent samples per trial
    #[value(name = "random_search", alias = "random")]
    RandomSearch,
}

/// Values a tunable hyperparameter may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamDomain {
    Choice {
        values: Vec<Value>,
    },
    Range {
        low: f64,
        high: f64,
        #[serde(default)]
        log_scale: bool,
        #[serde(default)]
        integer: bool,
        /// Grid resolution; ignored by random search
        #[serde(default = "default_samples")]
        samples: usize,
    },
}

fn default_samples() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunableParam {
    pub name: String,
    #[serde(flatten)]
    pub domain: ParamDomain,
}

impl TunableParam {
    pub fn choice(name: &str, values: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            domain: ParamDomain::Choice { values },
        }
    }

    pub fn range(name: &str, low: f64, high: f64) -> Self {
        Self {
            name: name.to_string(),
            domain: ParamDomain::Range {
                low,
                high,
                log_scale: false,
                integer: false,
                samples: default_samples(),
            },
        }
    }

    pub fn validate(&self) -> LaunchResult<()> {
        let fail = |msg: &str| Err(LaunchError::SearchSpace(format!("'{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(LaunchError::SearchSpace("parameter name must not be empty".to_string()));
        }

        match &self.domain {
            ParamDomain::Choice { values } => {
                if values.is_empty() {
                    return fail("choice needs at least one value");
                }
            }
            ParamDomain::Range { low, high, log_scale, samples, .. } => {
                if !low.is_finite() || !high.is_finite() {
                    return fail("range bounds must be finite");
                }
                if low > high {
                    return fail("low must be <= high");
                }
                if *log_scale && *low <= 0.0 {
                    return fail("log-scaled range needs low > 0");
                }
                if *samples == 0 {
                    return fail("samples must be >= 1");
                }
            }
        }
        Ok(())
    }

    /// Discrete values visited by grid search
    pub fn grid_values(&self) -> Vec<Value> {
        match &self.domain {
            ParamDomain::Choice { values } => values.clone(),
            ParamDomain::Range { low, high, log_scale, integer, samples } => {
                let points: Vec<f64> = if *samples == 1 {
                    vec![*low]
                } else {
                    let steps = (*samples - 1) as f64;
                    (0..*samples)
                        .map(|i| {
                            let t = i as f64 / steps;
                            if *log_scale {
                                (low.ln() + (high.ln() - low.ln()) * t).exp()
                            } else {
                                low + (high - low) * t
                            }
                        })
                        .collect()
                };

                if *integer {
                    let mut seen = HashSet::new();
                    points
                        .into_iter()
                        .map(|p| p.round() as i64)
                        .filter(|p| seen.insert(*p))
                        .map(Value::from)
                        .collect()
                } else {
                    points.into_iter().map(Value::from).collect()
                }
            }
        }
    }

    /// Draw one value for random search
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Value {
        match &self.domain {
            ParamDomain::Choice { values } => values
                .choose(rng)
                .cloned()
                .unwrap_or(Value::Null),
            ParamDomain::Range { low, high, log_scale, integer, .. } => {
                let x = if *log_scale {
                    rng.gen_range(low.ln()..=high.ln()).exp().clamp(*low, *high)
                } else {
                    rng.gen_range(*low..=*high)
                };
                if *integer {
                    Value::from(x.round() as i64)
                } else {
                    Value::from(x)
                }
            }
        }
    }
}

pub fn validate_space(space: &[TunableParam]) -> LaunchResult<()> {
    let mut names = HashSet::new();
    for param in space {
        param.validate()?;
        if !names.insert(param.name.as_str()) {
            return Err(LaunchError::SearchSpace(format!(
                "parameter '{}' declared twice",
                param.name
            )));
        }
    }
    Ok(())
}

/// Build the trial list for a sweep. Same seed, same trials.
pub fn generate_trials(
    space: &[TunableParam],
    strategy: Strategy,
    nb_trials: usize,
    seed: Option<u64>,
) -> LaunchResult<Vec<Trial>> {
    validate_space(space)?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    if space.is_empty() {
        warn!("Search space is empty; every trial runs the base hyperparameters");
    }

    let combos: Vec<BTreeMap<String, Value>> = match strategy {
        Strategy::GridSearch => {
            let grids: Vec<Vec<Value>> = space.iter().map(|p| p.grid_values()).collect();
            let lengths: Vec<usize> = grids.iter().map(Vec::len).collect();
            let total = grid_size(&lengths)?;
            let picked = index::sample(&mut rng, total, nb_trials.min(total));
            debug!("Grid has {} combinations, running {}", total, picked.len());
            picked
                .into_iter()
                .map(|i| grid_combination(space, &grids, i))
                .collect()
        }
        Strategy::RandomSearch => (0..nb_trials)
            .map(|_| {
                space
                    .iter()
                    .map(|p| (p.name.clone(), p.sample(&mut rng)))
                    .collect()
            })
            .collect(),
    };

    Ok(combos
        .into_iter()
        .enumerate()
        .map(|(index, params)| Trial::new(index, params))
        .collect())
}

/// Number of grid points, refusing grids that do not fit in `usize`
fn grid_size(lengths: &[usize]) -> LaunchResult<usize> {
    lengths.iter().try_fold(1usize, |total, len| {
        total.checked_mul(*len).ok_or_else(|| {
            LaunchError::SearchSpace("grid has too many combinations".to_string())
        })
    })
}

/// Decode a flat grid index in mixed radix, last parameter varying fastest
fn grid_combination(
    space: &[TunableParam],
    grids: &[Vec<Value>],
    mut index: usize,
) -> BTreeMap<String, Value> {
    let mut combo = BTreeMap::new();
    for (param, values) in space.iter().zip(grids).rev() {
        combo.insert(param.name.clone(), values[index % values.len()].clone());
        index /= values.len();
    }
    combo
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn space() -> Vec<TunableParam> {
        vec![
            TunableParam::choice("dropout", vec![json!(0.1), json!(0.2), json!(0.3)]),
            TunableParam::choice("batch_size", vec![json!(16), json!(32)]),
        ]
    }

    #[test]
    fn test_grid_covers_product_when_budget_allows() {
        let trials = generate_trials(&space(), Strategy::GridSearch, 20, Some(7)).unwrap();
        assert_eq!(trials.len(), 6);

        let distinct: HashSet<String> = trials
            .iter()
            .map(|t| serde_json::to_string(&t.params).unwrap())
            .collect();
        assert_eq!(distinct.len(), 6);
        assert!(trials.iter().enumerate().all(|(i, t)| t.index == i));
    }

    #[test]
    fn test_grid_truncates_to_budget() {
        let trials = generate_trials(&space(), Strategy::GridSearch, 4, Some(7)).unwrap();
        assert_eq!(trials.len(), 4);
    }

    #[test]
    fn test_seed_makes_trials_reproducible() {
        let a = generate_trials(&space(), Strategy::GridSearch, 6, Some(42)).unwrap();
        let b = generate_trials(&space(), Strategy::GridSearch, 6, Some(42)).unwrap();
        assert_eq!(a, b);

        let space = vec![TunableParam::range("lr", 1e-5, 1e-2)];
        let a = generate_trials(&space, Strategy::RandomSearch, 5, Some(3)).unwrap();
        let b = generate_trials(&space, Strategy::RandomSearch, 5, Some(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_samples_stay_in_range() {
        let space = vec![TunableParam {
            name: "lr".to_string(),
            domain: ParamDomain::Range {
                low: 1e-5,
                high: 1e-2,
                log_scale: true,
                integer: false,
                samples: 10,
            },
        }];
        let trials = generate_trials(&space, Strategy::RandomSearch, 50, Some(1)).unwrap();
        assert_eq!(trials.len(), 50);
        for trial in trials {
            let lr = trial.params["lr"].as_f64().unwrap();
            assert!((1e-5..=1e-2).contains(&lr), "lr out of range: {}", lr);
        }
    }

    #[test]
    fn test_integer_grid_values_dedupe() {
        let param = TunableParam {
            name: "layers".to_string(),
            domain: ParamDomain::Range {
                low: 1.0,
                high: 3.0,
                log_scale: false,
                integer: true,
                samples: 5,
            },
        };
        assert_eq!(param.grid_values(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_log_grid_endpoints() {
        let param = TunableParam {
            name: "lr".to_string(),
            domain: ParamDomain::Range {
                low: 1e-4,
                high: 1e-2,
                log_scale: true,
                integer: false,
                samples: 3,
            },
        };
        let values: Vec<f64> = param.grid_values().iter().map(|v| v.as_f64().unwrap()).collect();
        assert_eq!(values.len(), 3);
        assert!((values[0] - 1e-4).abs() < 1e-12);
        assert!((values[1] - 1e-3).abs() < 1e-9);
        assert!((values[2] - 1e-2).abs() < 1e-9);
    }

    #[test]
    fn test_huge_grid_samples_within_budget() {
        let space: Vec<TunableParam> = (0..9)
            .map(|i| TunableParam::range(&format!("p{}", i), 0.0, 1.0))
            .collect();
        let trials = generate_trials(&space, Strategy::GridSearch, 20, Some(11)).unwrap();
        assert_eq!(trials.len(), 20);

        let distinct: HashSet<String> = trials
            .iter()
            .map(|t| serde_json::to_string(&t.params).unwrap())
            .collect();
        assert_eq!(distinct.len(), 20);
        assert!(trials.iter().all(|t| t.params.len() == 9));
    }

    #[test]
    fn test_grid_size_overflow_is_rejected() {
        assert_eq!(grid_size(&[3, 3]).unwrap(), 9);
        assert_eq!(grid_size(&[]).unwrap(), 1);
        assert!(matches!(
            grid_size(&[usize::MAX, 2]),
            Err(LaunchError::SearchSpace(_))
        ));
    }

    #[test]
    fn test_grid_combination_decodes_mixed_radix() {
        let space = space();
        let grids: Vec<Vec<Value>> = space.iter().map(|p| p.grid_values()).collect();
        let combo = grid_combination(&space, &grids, 5);
        assert_eq!(combo["dropout"], json!(0.3));
        assert_eq!(combo["batch_size"], json!(32));
    }

    #[test]
    fn test_empty_space() {
        let grid = generate_trials(&[], Strategy::GridSearch, 20, Some(0)).unwrap();
        assert_eq!(grid.len(), 1);
        assert!(grid[0].params.is_empty());

        let random = generate_trials(&[], Strategy::RandomSearch, 3, Some(0)).unwrap();
        assert_eq!(random.len(), 3);
    }

    #[test]
    fn test_invalid_space() {
        let dup = vec![
            TunableParam::choice("lr", vec![json!(0.1)]),
            TunableParam::choice("lr", vec![json!(0.2)]),
        ];
        assert!(validate_space(&dup).is_err());

        let empty_choice = vec![TunableParam::choice("lr", vec![])];
        assert!(validate_space(&empty_choice).is_err());

        let inverted = vec![TunableParam::range("lr", 1.0, 0.5)];
        assert!(validate_space(&inverted).is_err());

        let bad_log = vec![TunableParam {
            name: "lr".to_string(),
            domain: ParamDomain::Range {
                low: 0.0,
                high: 1.0,
                log_scale: true,
                integer: false,
                samples: 4,
            },
        }];
        assert!(validate_space(&bad_log).is_err());
    }
}
