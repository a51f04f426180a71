//! State-occupancy probabilities and restricted mean state times from
//! simulated trajectories.

use crate::simulator::Trajectory;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OccupancyError {
    #[error("Query time {0} must be finite and non-negative")]
    InvalidTime(f64),
    #[error("Trajectory of unit {unit:?} visits state {state}, but only {n_states} states were declared")]
    StateOutOfRange {
        unit: crate::population::UnitId,
        state: usize,
        n_states: usize,
    },
    #[error("Strategy {strategy_id}, sample {sample} has zero total weight")]
    ZeroWeight { strategy_id: u64, sample: usize },
}

/// Weighted fraction of units in `state` at `time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateProbability {
    pub strategy_id: u64,
    pub sample: usize,
    pub state: usize,
    pub time: f64,
    pub probability: f64,
}

/// Weighted mean time spent in `state` over `[0, restriction]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTime {
    pub strategy_id: u64,
    pub sample: usize,
    pub state: usize,
    pub restriction: f64,
    pub expected_time: f64,
}

/// State occupied by `trajectory` at time `t`.
///
/// Records are time-sorted and contiguous, so the record containing `t` is found
/// by binary search on `time_start`. Past the last record the unit sits in that
/// record's target state.
pub fn state_at(trajectory: &Trajectory, t: f64) -> usize {
    let records = &trajectory.records;
    let index = records.partition_point(|r| r.time_start <= t);
    if index == 0 {
        return trajectory.initial_state;
    }
    let record = &records[index - 1];
    if t < record.time_stop {
        record.from
    } else {
        record.to
    }
}

type Groups<'a> = BTreeMap<(u64, usize), Vec<&'a Trajectory>>;

fn group<'a>(trajectories: &'a [Trajectory], n_states: usize) -> Result<Groups<'a>, OccupancyError> {
    let mut groups: Groups<'a> = BTreeMap::new();
    for trajectory in trajectories {
        let states = std::iter::once(trajectory.initial_state)
            .chain(trajectory.records.iter().map(|r| r.to));
        if let Some(state) = states.into_iter().find(|&s| s >= n_states) {
            return Err(OccupancyError::StateOutOfRange {
                unit: trajectory.unit,
                state,
                n_states,
            });
        }
        groups
            .entry((trajectory.unit.strategy_id, trajectory.unit.sample))
            .or_default()
            .push(trajectory);
    }
    Ok(groups)
}

fn total_weight(members: &[&Trajectory], key: (u64, usize)) -> Result<f64, OccupancyError> {
    let total: f64 = members.iter().map(|t| t.weight).sum();
    if total > 0.0 {
        Ok(total)
    } else {
        Err(OccupancyError::ZeroWeight {
            strategy_id: key.0,
            sample: key.1,
        })
    }
}

/// Occupancy probabilities for every (strategy, sample) group, query time and
/// state. Groups come out in ascending (strategy, sample) order, times in the
/// order given, states ascending.
pub fn state_probabilities(
    trajectories: &[Trajectory],
    n_states: usize,
    times: &[f64],
) -> Result<Vec<StateProbability>, OccupancyError> {
    if let Some(&bad) = times.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
        return Err(OccupancyError::InvalidTime(bad));
    }
    let groups = group(trajectories, n_states)?;
    let blocks = groups
        .into_par_iter()
        .map(|(key, members)| {
            let total = total_weight(&members, key)?;
            let mut rows = Vec::with_capacity(times.len() * n_states);
            for &time in times {
                let mut occupancy = vec![0.0; n_states];
                for trajectory in &members {
                    occupancy[state_at(trajectory, time)] += trajectory.weight;
                }
                rows.extend(occupancy.into_iter().enumerate().map(|(state, weight)| {
                    StateProbability {
                        strategy_id: key.0,
                        sample: key.1,
                        state,
                        time,
                        probability: weight / total,
                    }
                }));
            }
            Ok(rows)
        })
        .collect::<Result<Vec<_>, OccupancyError>>()?;
    Ok(blocks.into_iter().flatten().collect())
}

/// Restricted mean time in each state up to `restriction`.
pub fn expected_state_times(
    trajectories: &[Trajectory],
    n_states: usize,
    restriction: f64,
) -> Result<Vec<StateTime>, OccupancyError> {
    if !(restriction.is_finite() && restriction >= 0.0) {
        return Err(OccupancyError::InvalidTime(restriction));
    }
    let groups = group(trajectories, n_states)?;
    let blocks = groups
        .into_par_iter()
        .map(|(key, members)| {
            let total = total_weight(&members, key)?;
            let mut time_in_state = vec![0.0; n_states];
            for trajectory in &members {
                let mut covered = 0.0;
                for record in &trajectory.records {
                    if record.time_start >= restriction {
                        break;
                    }
                    let stop = record.time_stop.min(restriction);
                    time_in_state[record.from] += trajectory.weight * (stop - record.time_start);
                    covered = stop;
                }
                if covered < restriction {
                    time_in_state[trajectory.final_state()] +=
                        trajectory.weight * (restriction - covered);
                }
            }
            Ok(time_in_state
                .into_iter()
                .enumerate()
                .map(|(state, weighted)| StateTime {
                    strategy_id: key.0,
                    sample: key.1,
                    state,
                    restriction,
                    expected_time: weighted / total,
                })
                .collect::<Vec<_>>())
        })
        .collect::<Result<Vec<_>, OccupancyError>>()?;
    Ok(blocks.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::UnitId;
    use crate::simulator::{Outcome, TransitionRecord};
    use approx::assert_relative_eq;

    fn trajectory(
        strategy_id: u64,
        patient_id: u64,
        weight: f64,
        steps: &[(usize, usize, f64, f64)],
        outcome: Outcome,
    ) -> Trajectory {
        let unit = UnitId {
            strategy_id,
            patient_id,
            sample: 0,
        };
        let records = steps
            .iter()
            .enumerate()
            .map(|(i, &(from, to, time_start, time_stop))| TransitionRecord {
                strategy_id,
                patient_id,
                sample: 0,
                from,
                to,
                time_start,
                time_stop,
                censored: outcome == Outcome::Censored && i + 1 == steps.len(),
                is_final: i + 1 == steps.len(),
            })
            .collect();
        Trajectory {
            unit,
            initial_state: steps.first().map_or(0, |s| s.0),
            weight,
            records,
            outcome,
        }
    }

    #[test]
    fn state_lookup_uses_half_open_intervals() {
        let t = trajectory(1, 1, 1.0, &[(0, 1, 0.0, 2.0), (1, 2, 2.0, 5.0)], Outcome::Absorbed);
        assert_eq!(state_at(&t, 0.0), 0);
        assert_eq!(state_at(&t, 1.999), 0);
        assert_eq!(state_at(&t, 2.0), 1);
        assert_eq!(state_at(&t, 5.0), 2);
        assert_eq!(state_at(&t, 50.0), 2);

        let censored = trajectory(1, 2, 1.0, &[(0, 0, 0.0, 3.0)], Outcome::Censored);
        assert_eq!(state_at(&censored, 10.0), 0);
    }

    #[test]
    fn weighted_occupancy_sums_to_one() {
        let trajectories = vec![
            trajectory(1, 1, 1.0, &[(0, 1, 0.0, 2.0), (1, 2, 2.0, 5.0)], Outcome::Absorbed),
            trajectory(1, 2, 3.0, &[(0, 2, 0.0, 1.0)], Outcome::Absorbed),
            trajectory(2, 1, 1.0, &[(0, 0, 0.0, 10.0)], Outcome::Censored),
        ];
        let probabilities = state_probabilities(&trajectories, 3, &[0.5, 3.0]).unwrap();
        assert_eq!(probabilities.len(), 2 * 2 * 3);

        let lookup = |strategy: u64, time: f64, state: usize| {
            probabilities
                .iter()
                .find(|p| p.strategy_id == strategy && p.time == time && p.state == state)
                .map(|p| p.probability)
                .unwrap()
        };
        assert_relative_eq!(lookup(1, 0.5, 0), 1.0);
        assert_relative_eq!(lookup(1, 3.0, 1), 0.25);
        assert_relative_eq!(lookup(1, 3.0, 2), 0.75);
        assert_relative_eq!(lookup(2, 3.0, 0), 1.0);
        for strategy in [1, 2] {
            for time in [0.5, 3.0] {
                let total: f64 = (0..3).map(|s| lookup(strategy, time, s)).sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn expected_times_partition_the_restriction() {
        let trajectories = vec![
            trajectory(1, 1, 1.0, &[(0, 1, 0.0, 2.0), (1, 2, 2.0, 5.0)], Outcome::Absorbed),
            trajectory(1, 2, 1.0, &[(0, 0, 0.0, 4.0)], Outcome::Censored),
        ];
        let times = expected_state_times(&trajectories, 3, 6.0).unwrap();
        assert_eq!(times.len(), 3);
        // Unit 1: 2 in state 0, 3 in state 1, 1 in state 2.
        // Unit 2: censored at 4, counted in state 0 for all 6.
        assert_relative_eq!(times[0].expected_time, (2.0 + 6.0) / 2.0);
        assert_relative_eq!(times[1].expected_time, 3.0 / 2.0);
        assert_relative_eq!(times[2].expected_time, 1.0 / 2.0);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let trajectories = vec![trajectory(1, 1, 0.0, &[(0, 1, 0.0, 1.0)], Outcome::Absorbed)];
        assert!(matches!(
            state_probabilities(&trajectories, 2, &[-1.0]),
            Err(OccupancyError::InvalidTime(_))
        ));
        assert!(matches!(
            state_probabilities(&trajectories, 1, &[0.0]),
            Err(OccupancyError::StateOutOfRange { state: 1, .. })
        ));
        assert!(matches!(
            state_probabilities(&trajectories, 2, &[0.0]),
            Err(OccupancyError::ZeroWeight { .. })
        ));
    }
}
