use analysis_core::{adaptive, AnalysisError, Bar, InstrumentId, PrefilterStrategy};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::data::DataFacade;

/// Bars averaged for the volume baseline
const VOLUME_BASELINE_BARS: usize = 20;
/// Minimum returns needed to judge an anomaly
const MIN_RETURN_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenOutcome {
    pub selected: Vec<InstrumentId>,
    pub filtered_out: Vec<InstrumentId>,
}

/// Decide whether one instrument survives the pre-filter.
///
/// Instruments whose data could not be judged pass through so that the
/// analysis stage can report them properly.
pub fn passes(strategy: &PrefilterStrategy, bars: Option<&[Bar]>) -> bool {
    let bars = match (strategy, bars) {
        (PrefilterStrategy::None, _) => return true,
        (_, None) => return true,
        (_, Some(bars)) => bars,
    };

    match strategy {
        PrefilterStrategy::None => true,
        PrefilterStrategy::Anomaly { z_threshold } => {
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let returns: Vec<f64> = closes
                .windows(2)
                .filter(|w| w[0] > 0.0)
                .map(|w| (w[1] - w[0]) / w[0])
                .collect();
            match returns.split_last() {
                Some((latest, prior)) if prior.len() >= MIN_RETURN_HISTORY => {
                    adaptive::z_score_of(*latest, prior).abs() >= *z_threshold
                }
                _ => true,
            }
        }
        PrefilterStrategy::Volume { min_ratio } => match bars.split_last() {
            Some((latest, prior)) if prior.len() >= VOLUME_BASELINE_BARS => {
                let baseline: Vec<f64> = prior[prior.len() - VOLUME_BASELINE_BARS..]
                    .iter()
                    .map(|b| b.volume)
                    .collect();
                let avg = adaptive::mean(&baseline);
                avg <= 0.0 || latest.volume >= min_ratio * avg
            }
            _ => true,
        },
    }
}

/// Deterministic selection over already-fetched series, preserving input order.
pub fn select(
    strategy: &PrefilterStrategy,
    series: &[(InstrumentId, Option<Vec<Bar>>)],
) -> ScreenOutcome {
    let mut selected = Vec::new();
    let mut filtered_out = Vec::new();
    for (id, bars) in series {
        if passes(strategy, bars.as_deref()) {
            selected.push(id.clone());
        } else {
            filtered_out.push(id.clone());
        }
    }
    ScreenOutcome {
        selected,
        filtered_out,
    }
}

/// Fetches price series through the facade and applies the pre-filter.
pub struct Prefilter {
    facade: Arc<DataFacade>,
    max_concurrency: usize,
}

impl Prefilter {
    pub fn new(facade: Arc<DataFacade>, max_concurrency: usize) -> Self {
        Self {
            facade,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn scan(&self, strategy: PrefilterStrategy, instruments: &[InstrumentId]) -> ScreenOutcome {
        if strategy == PrefilterStrategy::None {
            return ScreenOutcome {
                selected: instruments.to_vec(),
                filtered_out: Vec::new(),
            };
        }

        tracing::info!("Pre-filtering {} instruments ({:?})", instruments.len(), strategy);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let days = self.facade.price_history_days();
        let mut tasks = JoinSet::new();

        for (index, id) in instruments.iter().enumerate() {
            let facade = Arc::clone(&self.facade);
            let sem = Arc::clone(&semaphore);
            let id = id.clone();
            tasks.spawn(async move {
                let bars = match sem.acquire_owned().await {
                    Ok(_permit) => facade.price_series(&id, days).await,
                    Err(_) => Err(AnalysisError::StrategyFailed("screen cancelled".to_string())),
                };
                if let Err(e) = &bars {
                    tracing::debug!("Pre-filter could not load {}: {}", id, e);
                }
                (index, bars.ok())
            });
        }

        let mut fetched: Vec<Option<Vec<Bar>>> = vec![None; instruments.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, bars)) => fetched[index] = bars,
                Err(e) => tracing::error!("Pre-filter task error: {}", e),
            }
        }

        let series: Vec<(InstrumentId, Option<Vec<Bar>>)> =
            instruments.iter().cloned().zip(fetched).collect();
        let outcome = select(&strategy, &series);

        tracing::info!(
            "Pre-filter kept {}/{} instruments",
            outcome.selected.len(),
            instruments.len()
        );
        outcome
    }
}
