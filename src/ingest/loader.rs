use crate::core::error::CompressionError;
use crate::core::trade::{ClearingId, TradeLeg, TradePair, TradeSet};
use crate::ingest::record::{ExcludedTrade, RawTrade};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File-level ingestion failures. Bad records are exclusions, not errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse trade file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// JSON layout of a trade file: `{ "trades": [ ... ] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFile {
    pub trades: Vec<RawTrade>,
}

impl TradeFile {
    /// Both legs of every pair, in pair order.
    pub fn from_trade_set(trades: &TradeSet) -> Self {
        Self {
            trades: trades.legs().map(RawTrade::from_leg).collect(),
        }
    }
}

/// Verified trades plus everything that was left out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Portfolio {
    pub trades: TradeSet,
    pub excluded: Vec<ExcludedTrade>,
}

impl Portfolio {
    /// Clean, pair and verify raw records.
    ///
    /// Pairs keep the order in which their clearing id was first seen.
    pub fn from_raw(records: Vec<RawTrade>) -> Result<Self, IngestError> {
        let total = records.len();
        let mut excluded = Vec::new();
        let mut order: Vec<ClearingId> = Vec::new();
        let mut groups: HashMap<ClearingId, Vec<TradeLeg>> = HashMap::new();

        for record in records {
            match record.clean() {
                Ok(leg) => {
                    let legs = groups.entry(leg.clearing_id().clone()).or_insert_with(|| {
                        order.push(leg.clearing_id().clone());
                        Vec::new()
                    });
                    legs.push(leg);
                }
                Err(reason) => {
                    debug!("excluding trade {}: {}", record.trade_id, reason);
                    excluded.push(ExcludedTrade::new(record, reason));
                }
            }
        }

        let mut trades = TradeSet::new();
        for clearing_id in order {
            let legs = groups.remove(&clearing_id).unwrap_or_default();
            if let [first, second] = legs.as_slice() {
                match TradePair::new(first.clone(), second.clone()) {
                    Ok(pair) => trades.add(pair)?,
                    Err(err) => exclude_legs(&mut excluded, &legs, &err.to_string()),
                }
                continue;
            }
            let reason = if legs.len() == 1 {
                "trade not submitted on both sides".to_string()
            } else {
                format!("more than 2 trades have the same clearing id: {}", clearing_id)
            };
            exclude_legs(&mut excluded, &legs, &reason);
        }

        excluded.sort_by(|a, b| a.report_order(b));
        info!(
            "loaded {} records: {} trade pairs, {} excluded",
            total,
            trades.len(),
            excluded.len()
        );
        Ok(Portfolio { trades, excluded })
    }

    pub fn from_json_str(json: &str) -> Result<Self, IngestError> {
        let file: TradeFile = serde_json::from_str(json)?;
        Self::from_raw(file.trades)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

fn exclude_legs(excluded: &mut Vec<ExcludedTrade>, legs: &[TradeLeg], reason: &str) {
    for leg in legs {
        debug!("excluding trade {}: {}", leg.trade_id(), reason);
        excluded.push(ExcludedTrade::new(RawTrade::from_leg(leg), reason));
    }
}
